//! Benchmark harness for the acceleration runtime
//!
//! This crate measures the dispatcher's backends against the baseline path
//! across inference, tensor, memory and stress workloads, and turns the
//! measurements into a ranked, serialisable recommendation.

pub mod harness;
pub mod report;
pub mod stats;
pub mod workloads;

// Re-export commonly used types
pub use harness::{determine_best_backend, generate_recommended_config, BenchmarkHarness};
pub use report::{
    BackendRanking, BackendReport, ComprehensiveBenchmarkResult, OperationReport, RecommendedConfig, StressReport,
};
pub use stats::SampleStats;
pub use workloads::{standard_workloads, BenchmarkCategory, BenchmarkOperation};
