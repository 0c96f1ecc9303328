//! Benchmark report types

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use accel_common::{Backend, OptimizationLevel};
use accel_config::{AccelerationConfig, BackendPreference, BenchmarkSuiteOptions};
use capability_probe::CapabilityDescriptor;

use crate::stats::SampleStats;
use crate::workloads::BenchmarkCategory;

/// Measurements of one workload on one execution path
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationReport {
    /// Workload name
    pub name: String,

    /// Workload category
    pub category: BenchmarkCategory,

    /// Elapsed time of every timed iteration, failures included
    pub samples_ms: Vec<f64>,

    /// Aggregate over `samples_ms`
    pub stats: SampleStats,

    /// Successful iterations over total iterations
    pub success_rate: f64,

    /// Mean of the successful iterations only, absent when none succeeded
    pub success_mean_ms: Option<f64>,

    /// Baseline success mean for the same workload, when measured
    pub baseline_mean_ms: Option<f64>,

    /// `baseline_mean / success_mean`, `0` when either side is missing or zero
    pub speedup: f64,

    /// Memory traffic per second of successful memory iterations
    pub throughput_mb_s: Option<f64>,

    /// Distinct failure messages
    pub errors: Vec<String>,
}

/// Outcome of one concurrency level
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StressReport {
    /// Operations launched together
    pub concurrency: usize,

    /// Operations that returned successfully
    pub completed: usize,

    /// Operations that returned an error or timed out
    pub failed: usize,

    /// `completed / concurrency`
    pub success_rate: f64,

    /// At least one task panicked
    pub crashed: bool,

    /// `success_rate > 0.95` and not crashed
    pub memory_stable: bool,

    /// Wall time until every task settled
    pub total_time_ms: f64,
}

/// Everything measured for one backend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendReport {
    /// Backend measured
    pub backend: Backend,

    /// Per-workload measurements
    pub operations: Vec<OperationReport>,

    /// Per-concurrency-level measurements
    pub stress: Vec<StressReport>,

    /// Mean speedup over inference workloads
    pub inference_speedup: f64,

    /// Mean speedup over tensor workloads
    pub tensor_speedup: f64,

    /// Mean throughput over memory workloads
    pub memory_throughput_mb_s: f64,

    /// Successful iterations over total iterations, all categories
    pub success_rate: f64,
}

impl BackendReport {
    /// Measurements of one category
    pub fn category(&self, category: BenchmarkCategory) -> impl Iterator<Item = &OperationReport> {
        self.operations.iter().filter(move |op| op.category == category)
    }
}

/// Backend ranked by weighted score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendRanking {
    pub backend: Backend,
    pub score: f64,
}

/// Configuration suggested by a benchmark run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendedConfig {
    /// Preferred backend, `auto` when nothing beat the baseline
    pub backend: BackendPreference,

    /// Suggested memory ceiling in MiB
    pub memory_limit_mb: u64,

    /// Whether SIMD should be enabled
    pub enable_simd: bool,

    /// Suggested optimization level
    pub optimization_level: OptimizationLevel,

    /// Average speedup of the preferred backend
    pub average_speedup: f64,

    /// Trust in the recommendation, in `[0, 1]`
    pub confidence: f64,
}

impl RecommendedConfig {
    /// Applies the recommendation on top of a base configuration
    pub fn apply_to(&self, base: &AccelerationConfig) -> AccelerationConfig {
        AccelerationConfig {
            backend: self.backend,
            memory_limit_mb: self.memory_limit_mb,
            enable_simd: self.enable_simd,
            optimization_level: self.optimization_level,
            ..base.clone()
        }
    }
}

/// Full output of a benchmark run
#[derive(Debug, Clone, Serialize)]
pub struct ComprehensiveBenchmarkResult {
    /// Run identifier
    pub id: Uuid,

    /// Start of the run
    pub started_at: DateTime<Utc>,

    /// Wall time of the whole run
    pub duration_ms: f64,

    /// Host capabilities the run was measured under
    pub capabilities: CapabilityDescriptor,

    /// Options the run used
    pub options: BenchmarkSuiteOptions,

    /// Baseline measurements shared by every backend
    pub baseline: Vec<OperationReport>,

    /// Per-backend measurements
    pub backends: Vec<BackendReport>,

    /// Backends ordered by score, best first
    pub ranking: Vec<BackendRanking>,

    /// Top-ranked backend with a positive score
    pub best_backend: Option<Backend>,

    /// Suggested configuration
    pub recommendation: RecommendedConfig,
}

impl ComprehensiveBenchmarkResult {
    /// Report for one backend
    pub fn backend(&self, backend: Backend) -> Option<&BackendReport> {
        self.backends.iter().find(|r| r.backend == backend)
    }

    /// Pretty JSON rendering
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
