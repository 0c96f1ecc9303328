//! Main integration module for the acceleration runtime
//!
//! This module wires the capability probe, artifact cache, dispatcher and
//! benchmark harness together through explicit construction. Nothing here
//! is global; every runtime owns its own instances.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use accel_config::{AccelerationConfig, BenchmarkSuiteOptions, RuntimeSettings};
use acceleration_dispatcher::{
    AccelerationBackend, AccelerationDispatcher, AccelerationObserver, AccelerationResult, BaselineExecutor,
    Operation,
};
use artifact_cache::{
    ArtifactCache, ArtifactCompiler, CacheOptions, CompilationTarget, CompiledArtifact, EnvelopeCompiler,
    FileFetcher, ModelFetcher, ModelSource, SourceKind, ValidationResult,
};
use benchmark_harness::{BenchmarkHarness, ComprehensiveBenchmarkResult};
use capability_probe::{CapabilityDescriptor, CapabilityProbe};

// Re-export the member crates under one roof
pub use accel_common as common;
pub use accel_config as config;
pub use acceleration_dispatcher as dispatcher;
pub use artifact_cache as cache;
pub use benchmark_harness as benchmark;
pub use capability_probe as probe;

/// Fully wired acceleration runtime
pub struct AccelerationRuntime {
    /// Settings the runtime was built from
    settings: RuntimeSettings,

    /// Capabilities detected at build time
    capabilities: Arc<CapabilityDescriptor>,

    /// Artifact cache shared with the dispatcher
    cache: ArtifactCache,

    /// Initialized dispatcher
    dispatcher: Arc<AccelerationDispatcher>,

    /// Harness over the dispatcher
    harness: BenchmarkHarness,
}

/// Builder for [`AccelerationRuntime`]
#[derive(Default)]
pub struct AccelerationRuntimeBuilder {
    settings: RuntimeSettings,
    probe: Option<CapabilityProbe>,
    capabilities: Option<CapabilityDescriptor>,
    fetcher: Option<Arc<dyn ModelFetcher>>,
    compiler: Option<Arc<dyn ArtifactCompiler>>,
    cache_options: Option<CacheOptions>,
    backends: Option<Vec<Arc<dyn AccelerationBackend>>>,
    baseline: Option<Arc<dyn BaselineExecutor>>,
    observers: Vec<Arc<dyn AccelerationObserver>>,
}

impl AccelerationRuntimeBuilder {
    /// Uses loaded settings
    pub fn settings(mut self, settings: RuntimeSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Overrides the dispatcher configuration
    pub fn acceleration(mut self, config: AccelerationConfig) -> Self {
        self.settings.acceleration = config;
        self
    }

    /// Uses a specific probe
    pub fn probe(mut self, probe: CapabilityProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Skips probing and uses the given capabilities
    pub fn capabilities(mut self, capabilities: CapabilityDescriptor) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Replaces the model fetcher
    pub fn fetcher(mut self, fetcher: Arc<dyn ModelFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Replaces the artifact compiler
    pub fn compiler(mut self, compiler: Arc<dyn ArtifactCompiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    /// Replaces the cache options
    pub fn cache_options(mut self, options: CacheOptions) -> Self {
        self.cache_options = Some(options);
        self
    }

    /// Replaces the registered backends
    pub fn backends(mut self, backends: Vec<Arc<dyn AccelerationBackend>>) -> Self {
        self.backends = Some(backends);
        self
    }

    /// Replaces the baseline path
    pub fn baseline(mut self, baseline: Arc<dyn BaselineExecutor>) -> Self {
        self.baseline = Some(baseline);
        self
    }

    /// Registers an observer before the dispatcher initializes
    pub fn observer(mut self, observer: Arc<dyn AccelerationObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Probes the host and initializes the dispatcher
    pub fn build(self) -> Result<AccelerationRuntime> {
        info!("Initializing acceleration runtime");

        let capabilities = match self.capabilities {
            Some(capabilities) => capabilities,
            None => self.probe.unwrap_or_default().detect(),
        };
        let config = self.settings.acceleration.clone();

        let cache_options = self.cache_options.unwrap_or_else(|| CacheOptions {
            memory_budget_bytes: Some(config.memory_limit_bytes()),
            ..CacheOptions::default()
        });
        let cache = ArtifactCache::with_options(
            self.fetcher.unwrap_or_else(|| Arc::new(FileFetcher::new())),
            self.compiler.unwrap_or_else(|| Arc::new(EnvelopeCompiler)),
            cache_options,
        );

        let mut dispatcher = AccelerationDispatcher::with_cache(config, cache.clone());
        if let Some(backends) = self.backends {
            dispatcher = dispatcher.with_backends(backends);
        }
        if let Some(baseline) = self.baseline {
            dispatcher = dispatcher.with_baseline(baseline);
        }
        for observer in self.observers {
            dispatcher.subscribe(observer);
        }
        dispatcher
            .initialize(&capabilities)
            .context("Failed to initialize acceleration dispatcher")?;

        let dispatcher = Arc::new(dispatcher);
        let harness = BenchmarkHarness::new(Arc::clone(&dispatcher));

        info!(
            "Acceleration runtime ready with backends {:?}",
            dispatcher.available_backends()
        );

        Ok(AccelerationRuntime {
            settings: self.settings,
            capabilities: Arc::new(capabilities),
            cache,
            dispatcher,
            harness,
        })
    }
}

impl AccelerationRuntime {
    /// Starts building a runtime
    pub fn builder() -> AccelerationRuntimeBuilder {
        AccelerationRuntimeBuilder::default()
    }

    /// Settings in use
    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// Capabilities detected at build time
    pub fn capabilities(&self) -> &CapabilityDescriptor {
        &self.capabilities
    }

    /// Shared artifact cache
    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Initialized dispatcher
    pub fn dispatcher(&self) -> &Arc<AccelerationDispatcher> {
        &self.dispatcher
    }

    /// Benchmark harness
    pub fn harness(&self) -> &BenchmarkHarness {
        &self.harness
    }

    /// Dispatches one operation
    pub async fn accelerate(&self, op: &Operation) -> Result<AccelerationResult> {
        self.dispatcher
            .accelerate(op)
            .await
            .with_context(|| format!("Failed to accelerate {}", op.kind()))
    }

    /// Runs the benchmark suite, defaulting to the configured options
    pub async fn benchmark(&self, options: Option<&BenchmarkSuiteOptions>) -> Result<ComprehensiveBenchmarkResult> {
        let options = options.unwrap_or(&self.settings.benchmark);
        self.harness
            .run(options)
            .await
            .context("Benchmark run failed")
    }

    /// Compiles a local model file and validates the artifact
    pub async fn compile_file(
        &self,
        path: &Path,
        target: &CompilationTarget,
    ) -> Result<(Arc<CompiledArtifact>, ValidationResult)> {
        let kind = SourceKind::from_path(path)
            .ok_or_else(|| anyhow!("Unrecognized model format: {}", path.display()))?;
        let source = ModelSource::new(kind, path.to_string_lossy());

        let artifact = self
            .cache
            .compile(&source, target)
            .await
            .with_context(|| format!("Failed to compile {}", path.display()))?;
        let validation = self.cache.validate(&artifact);
        if !validation.valid {
            warn!("Artifact {} failed validation: {:?}", artifact.id, validation.errors);
        }
        Ok((artifact, validation))
    }

    /// Releases backends and the cache
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down acceleration runtime");
        self.dispatcher
            .dispose()
            .await
            .context("Failed to dispose acceleration dispatcher")
    }
}
