//! Benchmark suite options

use std::time::Duration;

use serde::{Deserialize, Serialize};

use accel_common::{Backend, Error, Result};

/// Input surface for a benchmark run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkSuiteOptions {
    /// Backends to compare
    pub backends: Vec<Backend>,

    /// Timed iterations per operation
    pub iterations: usize,

    /// Discarded iterations per operation
    pub warmup_iterations: usize,

    /// Bound on each iteration, in milliseconds
    pub timeout_ms: u64,

    /// Run the inference category
    pub include_inference: bool,

    /// Run the tensor-ops category
    pub include_tensor_ops: bool,

    /// Run the memory category
    pub include_memory: bool,

    /// Run the stress/concurrency category
    pub include_stress: bool,

    /// Concurrent operations launched per stress level
    pub concurrency_levels: Vec<usize>,
}

impl Default for BenchmarkSuiteOptions {
    fn default() -> Self {
        Self {
            backends: vec![Backend::Native, Backend::ManagedRuntimeA, Backend::ManagedRuntimeB],
            iterations: 10,
            warmup_iterations: 3,
            timeout_ms: 10_000,
            include_inference: true,
            include_tensor_ops: true,
            include_memory: true,
            include_stress: false,
            concurrency_levels: vec![1, 4, 16],
        }
    }
}

impl BenchmarkSuiteOptions {
    /// Per-iteration timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Checks the options describe a runnable suite
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(Error::InvalidArgument("iterations must be greater than zero".into()));
        }
        if self.timeout_ms == 0 {
            return Err(Error::InvalidArgument("timeout_ms must be greater than zero".into()));
        }
        if self.include_stress && self.concurrency_levels.iter().any(|&n| n == 0) {
            return Err(Error::InvalidArgument("concurrency levels must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let options = BenchmarkSuiteOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let options = BenchmarkSuiteOptions {
            iterations: 0,
            ..Default::default()
        };
        assert!(options.validate().is_err());

        let options = BenchmarkSuiteOptions {
            include_stress: true,
            concurrency_levels: vec![4, 0],
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }
}
