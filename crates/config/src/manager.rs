//! Configuration manager
//!
//! Settings are layered: built-in defaults, then an optional file, then
//! `ACCEL__`-prefixed environment variables (`__` separates nested keys,
//! e.g. `ACCEL__ACCELERATION__MEMORY_LIMIT_MB=2048`).

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use accel_common::{Error, Result};

use crate::acceleration::AccelerationConfig;
use crate::benchmark::BenchmarkSuiteOptions;
use crate::logging::LoggingConfig;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "ACCEL";

/// Every configuration surface of the runtime
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Dispatcher configuration
    pub acceleration: AccelerationConfig,

    /// Benchmark suite options
    pub benchmark: BenchmarkSuiteOptions,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Loads and holds runtime settings
#[derive(Debug, Clone)]
pub struct ConfigManager {
    /// Resolved settings
    settings: RuntimeSettings,

    /// File the settings were read from, if any
    source: Option<PathBuf>,
}

impl ConfigManager {
    /// Loads settings from defaults, an optional file, and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            debug!("Reading configuration file {}", path.display());
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let settings: RuntimeSettings = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::Config(e.to_string()))?;

        settings.acceleration.validate()?;
        settings.benchmark.validate()?;

        info!(
            backend = %settings.acceleration.backend,
            memory_limit_mb = settings.acceleration.memory_limit_mb,
            "Configuration loaded"
        );

        Ok(Self {
            settings,
            source: path.map(Path::to_path_buf),
        })
    }

    /// Wraps already-built settings
    pub fn from_settings(settings: RuntimeSettings) -> Result<Self> {
        settings.acceleration.validate()?;
        settings.benchmark.validate()?;
        Ok(Self {
            settings,
            source: None,
        })
    }

    /// All settings
    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// Dispatcher configuration
    pub fn acceleration(&self) -> &AccelerationConfig {
        &self.settings.acceleration
    }

    /// Benchmark suite options
    pub fn benchmark(&self) -> &BenchmarkSuiteOptions {
        &self.settings.benchmark
    }

    /// Logging configuration
    pub fn logging(&self) -> &LoggingConfig {
        &self.settings.logging
    }

    /// File the settings were read from
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use accel_common::{Backend, OptimizationLevel};

    use super::*;
    use crate::acceleration::BackendPreference;

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[acceleration]
backend = "managed-runtime-a"
memory_limit_mb = 2048
optimization_level = "O3"

[acceleration.thresholds]
min_output_tokens = 64

[benchmark]
iterations = 5
warmup_iterations = 2
"#
        )
        .unwrap();

        let manager = ConfigManager::load(Some(file.path())).unwrap();
        let accel = manager.acceleration();
        assert_eq!(accel.backend, BackendPreference::Specific(Backend::ManagedRuntimeA));
        assert_eq!(accel.memory_limit_mb, 2048);
        assert_eq!(accel.optimization_level, OptimizationLevel::O3);
        assert_eq!(accel.thresholds.min_output_tokens, 64);
        // untouched keys keep their defaults
        assert_eq!(accel.thresholds.min_embedding_batch, 8);
        assert_eq!(manager.benchmark().iterations, 5);
        assert_eq!(manager.source(), Some(file.path()));
    }

    #[test]
    fn test_invalid_file_values_are_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "[acceleration]\nthread_count = 0\n").unwrap();

        let err = ConfigManager::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = ConfigManager::load(Some(Path::new("/nonexistent/accel.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_settings_serialize_to_toml() {
        let settings = RuntimeSettings::default();
        let rendered = toml::to_string(&settings).unwrap();
        assert!(rendered.contains("[acceleration]"));
        assert!(ConfigManager::from_settings(settings).is_ok());
    }
}
