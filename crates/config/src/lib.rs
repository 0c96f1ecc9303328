//! Configuration management for the acceleration runtime
//!
//! This crate provides the caller-facing configuration surfaces and the
//! layered loader that assembles them from defaults, files and environment.

pub mod acceleration;
pub mod benchmark;
pub mod logging;
pub mod manager;

// Re-export commonly used types
pub use acceleration::{AccelerationConfig, AccelerationThresholds, BackendPreference};
pub use benchmark::BenchmarkSuiteOptions;
pub use logging::{LogFormat, LoggingConfig};
pub use manager::{ConfigManager, RuntimeSettings};
