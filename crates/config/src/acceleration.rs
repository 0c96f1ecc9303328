//! Acceleration configuration
//!
//! The configuration surface callers use to steer backend choice, memory
//! ceiling, SIMD opt-in, model caching and optimization level.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use accel_common::{Backend, Error, OptimizationLevel, Result};

/// Which backend the dispatcher should favour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BackendPreference {
    /// Pick the best-scoring available backend
    Auto,
    /// Require a specific backend
    Specific(Backend),
}

impl BackendPreference {
    /// Returns the required backend, if any
    pub fn backend(&self) -> Option<Backend> {
        match self {
            BackendPreference::Auto => None,
            BackendPreference::Specific(backend) => Some(*backend),
        }
    }
}

impl Default for BackendPreference {
    fn default() -> Self {
        BackendPreference::Auto
    }
}

impl fmt::Display for BackendPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendPreference::Auto => write!(f, "auto"),
            BackendPreference::Specific(backend) => write!(f, "{}", backend),
        }
    }
}

impl FromStr for BackendPreference {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(BackendPreference::Auto);
        }
        s.parse::<Backend>().map(BackendPreference::Specific)
    }
}

impl TryFrom<String> for BackendPreference {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BackendPreference> for String {
    fn from(value: BackendPreference) -> Self {
        value.to_string()
    }
}

/// Size heuristics that decide whether an operation is worth accelerating
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccelerationThresholds {
    /// Prompt characters above which inference is accelerated
    pub min_context_chars: usize,

    /// Requested output tokens above which inference is accelerated
    pub min_output_tokens: u32,

    /// Number of texts above which embedding is accelerated
    pub min_embedding_batch: usize,

    /// Element count above which tensor operations are accelerated
    pub min_tensor_elements: u64,
}

impl Default for AccelerationThresholds {
    fn default() -> Self {
        Self {
            min_context_chars: 2_000,
            min_output_tokens: 256,
            min_embedding_batch: 8,
            min_tensor_elements: 4_096,
        }
    }
}

/// Caller-supplied acceleration configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccelerationConfig {
    /// Backend preference
    pub backend: BackendPreference,

    /// Memory ceiling in MiB
    pub memory_limit_mb: u64,

    /// Worker threads handed to backends
    pub thread_count: usize,

    /// Opt into SIMD when the host supports it
    pub enable_simd: bool,

    /// Opt into bulk-memory instructions when the host supports them
    pub enable_bulk_memory: bool,

    /// Compile and cache artifacts for registered models
    pub cache_models: bool,

    /// Optimization level for compiled artifacts
    pub optimization_level: OptimizationLevel,

    /// Run the baseline path when the accelerated path fails
    pub fallback_to_baseline: bool,

    /// Bound on every backend invocation, in milliseconds
    pub operation_timeout_ms: u64,

    /// Acceleration heuristics
    pub thresholds: AccelerationThresholds,
}

impl Default for AccelerationConfig {
    fn default() -> Self {
        Self {
            backend: BackendPreference::Auto,
            memory_limit_mb: 1_024,
            thread_count: accel_common::utils::logical_cpus(),
            enable_simd: true,
            enable_bulk_memory: true,
            cache_models: true,
            optimization_level: OptimizationLevel::O2,
            fallback_to_baseline: true,
            operation_timeout_ms: 30_000,
            thresholds: AccelerationThresholds::default(),
        }
    }
}

impl AccelerationConfig {
    /// Memory ceiling in bytes
    pub fn memory_limit_bytes(&self) -> u64 {
        self.memory_limit_mb.saturating_mul(1024 * 1024)
    }

    /// Backend invocation timeout
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Checks internal consistency, independent of the host
    pub fn validate(&self) -> Result<()> {
        if self.memory_limit_mb == 0 {
            return Err(Error::Config("memory_limit_mb must be greater than zero".into()));
        }
        if self.thread_count == 0 {
            return Err(Error::Config("thread_count must be greater than zero".into()));
        }
        if self.operation_timeout_ms == 0 {
            return Err(Error::Config("operation_timeout_ms must be greater than zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AccelerationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.memory_limit_bytes(), 1_024 * 1024 * 1024);
        assert!(config.fallback_to_baseline);
    }

    #[test]
    fn test_validate_rejects_zero_fields() {
        let config = AccelerationConfig {
            thread_count: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = AccelerationConfig {
            memory_limit_mb: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backend_preference_parsing() {
        assert_eq!("auto".parse::<BackendPreference>(), Ok(BackendPreference::Auto));
        assert_eq!(
            "native".parse::<BackendPreference>(),
            Ok(BackendPreference::Specific(Backend::Native))
        );
        assert!("quantum".parse::<BackendPreference>().is_err());

        let json = serde_json::to_string(&BackendPreference::Specific(Backend::ManagedRuntimeB)).unwrap();
        assert_eq!(json, "\"managed-runtime-b\"");
    }
}
