//! Compiled artifact cache for the acceleration runtime
//!
//! This crate maps `(model source, compilation target)` pairs to immutable
//! compiled artifacts. Concurrent requests for the same pair share a single
//! underlying build; failures are delivered to every waiter and never cached.

pub mod artifact;
pub mod cache;
pub mod compiler;
pub mod metadata;
pub mod source;

// Re-export commonly used types
pub use artifact::{CompiledArtifact, OptimizationOptions, OptimizationPass, ValidationResult};
pub use cache::{ArtifactCache, CacheOptions, CacheStats};
pub use compiler::{ArtifactCompiler, EnvelopeCompiler, FileFetcher, InMemoryFetcher, ModelFetcher};
pub use metadata::ArtifactMetadata;
pub use source::{CacheKey, CompilationTarget, ModelSource, SourceKind};
