//! Per-call dispatch results

use serde::Serialize;

use accel_common::{Backend, ErrorCode};

use crate::operation::OperationOutput;

/// Outcome of one dispatched operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccelerationResult {
    /// True when a backend produced the output
    pub acceleration_used: bool,

    /// Backend that produced the output
    pub backend: Option<Backend>,

    /// Baseline estimate over measured time; finite and non-negative
    pub speedup_ratio: f64,

    /// Bytes touched by the operation
    pub memory_used_bytes: u64,

    /// Measured execution time
    pub compute_time_ms: f64,

    /// Time spent deciding where to run
    pub dispatch_overhead_ms: f64,

    /// Why the baseline path ran, when it did
    pub fallback_reason: Option<String>,

    /// Operation output
    pub output: OperationOutput,
}

impl AccelerationResult {
    /// Returns true when the baseline path produced the output
    pub fn fell_back(&self) -> bool {
        !self.acceleration_used
    }
}

/// Failure of one entry in a batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchError {
    /// Position in the submitted batch
    pub index: usize,

    /// Error class
    pub code: ErrorCode,

    /// Rendered error
    pub message: String,
}

/// Outcome of a batch, in submission order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    /// One entry per submitted operation; `None` where it failed
    pub results: Vec<Option<AccelerationResult>>,

    /// Failures by index
    pub errors: Vec<BatchError>,

    /// Wall time of the whole batch
    pub total_time_ms: f64,
}

impl BatchResult {
    /// Number of successful entries
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_some()).count()
    }
}
