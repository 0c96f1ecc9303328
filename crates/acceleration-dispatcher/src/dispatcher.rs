//! Acceleration dispatcher implementation
//!
//! The dispatcher applies a capability descriptor to its configuration,
//! scores registered backends per operation kind, executes on the winner and
//! falls back to the baseline path when the backend cannot or does not
//! deliver.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use accel_common::utils::{duration_ms, execute_with_timeout, finite_ratio, format_bytes, measure_async};
use accel_common::{Backend, Error, OperationKind, Result};
use accel_config::{AccelerationConfig, BackendPreference};
use artifact_cache::{ArtifactCache, CompilationTarget, EnvelopeCompiler, FileFetcher, ModelSource};
use capability_probe::CapabilityDescriptor;

use crate::backend::AccelerationBackend;
use crate::backends::SimulatedBackend;
use crate::baseline::{BaselineExecutor, ReferenceBaseline};
use crate::cost::{CostModel, HeuristicCostModel};
use crate::events::{AccelerationEvent, AccelerationObserver, ObserverSet};
use crate::metrics::{DispatchMetrics, MetricsRecorder};
use crate::operation::{EmbeddingRequest, Operation, OperationOutput};
use crate::result::{AccelerationResult, BatchError, BatchResult};
use crate::state::DispatcherState;

/// Chooses a backend per operation and executes with baseline fallback
pub struct AccelerationDispatcher {
    /// Caller configuration
    config: AccelerationConfig,

    /// Lifecycle state
    state: RwLock<DispatcherState>,

    /// Effective capabilities, set by `initialize`
    capabilities: RwLock<Option<Arc<CapabilityDescriptor>>>,

    /// Registered backends
    backends: Vec<Arc<dyn AccelerationBackend>>,

    /// Baseline path
    baseline: Arc<dyn BaselineExecutor>,

    /// Scoring and baseline estimates
    cost_model: Arc<dyn CostModel>,

    /// Compiled artifact cache
    cache: ArtifactCache,

    /// Registered models (model_id -> source)
    models: DashMap<String, ModelSource>,

    /// Artifacts resident per (model, backend)
    resident: DashMap<(String, Backend), Uuid>,

    /// Speedup estimates per kind, valid for the current capabilities
    speedup_estimates: DashMap<OperationKind, f64>,

    /// Lifecycle observers
    observers: ObserverSet,

    /// Outcome counters
    metrics: MetricsRecorder,
}

impl AccelerationDispatcher {
    /// Creates a dispatcher with simulated backends and a file-backed cache
    pub fn new(config: AccelerationConfig) -> Self {
        let cache = ArtifactCache::new(Arc::new(FileFetcher::new()), Arc::new(EnvelopeCompiler));
        Self::with_cache(config, cache)
    }

    /// Creates a dispatcher around an existing cache
    pub fn with_cache(config: AccelerationConfig, cache: ArtifactCache) -> Self {
        let cost_model: Arc<dyn CostModel> = Arc::new(HeuristicCostModel::default());
        let backends = Backend::ALL
            .iter()
            .map(|&backend| {
                Arc::new(SimulatedBackend::new(backend).with_cost_model(Arc::clone(&cost_model)))
                    as Arc<dyn AccelerationBackend>
            })
            .collect();

        Self {
            config,
            state: RwLock::new(DispatcherState::new()),
            capabilities: RwLock::new(None),
            backends,
            baseline: Arc::new(ReferenceBaseline),
            cost_model,
            cache,
            models: DashMap::new(),
            resident: DashMap::new(),
            speedup_estimates: DashMap::new(),
            observers: ObserverSet::default(),
            metrics: MetricsRecorder::default(),
        }
    }

    /// Replaces the registered backends
    pub fn with_backends(mut self, backends: Vec<Arc<dyn AccelerationBackend>>) -> Self {
        self.backends = backends;
        self
    }

    /// Replaces the baseline path
    pub fn with_baseline(mut self, baseline: Arc<dyn BaselineExecutor>) -> Self {
        self.baseline = baseline;
        self
    }

    /// Replaces the cost model used for scoring and speedup ratios
    pub fn with_cost_model(mut self, cost_model: Arc<dyn CostModel>) -> Self {
        self.cost_model = cost_model;
        self
    }

    /// Applies host capabilities and makes backends selectable
    ///
    /// Fails without leaving `Uninitialized` when the configuration asks for
    /// more memory than the host has or for a backend the host cannot run.
    pub fn initialize(&self, descriptor: &CapabilityDescriptor) -> Result<()> {
        self.ensure_not_disposed()?;
        info!("Initializing acceleration dispatcher");

        self.config.validate()?;

        let limit = self.config.memory_limit_bytes();
        if limit > descriptor.max_memory_bytes {
            return Err(Error::Memory(format!(
                "configured memory limit {} exceeds host ceiling {}",
                format_bytes(limit),
                format_bytes(descriptor.max_memory_bytes)
            )));
        }

        let mut effective = descriptor.clone();
        if self.config.enable_simd && !descriptor.simd {
            warn!("SIMD requested but not available on this host, continuing without it");
        }
        if !self.config.enable_simd {
            effective = effective.with_simd(false);
        }
        if self.config.enable_bulk_memory && !descriptor.bulk_memory {
            warn!("Bulk memory requested but not available on this host");
        }
        if self.config.thread_count > descriptor.logical_cores.max(1) {
            warn!(
                "Configured {} threads on a host with {} logical cores",
                self.config.thread_count, descriptor.logical_cores
            );
        }

        let usable = self.usable_backends(&effective);
        if let BackendPreference::Specific(preferred) = self.config.backend {
            if !usable.contains(&preferred) {
                return Err(Error::InitFailed(format!(
                    "preferred backend {} is not available on this host",
                    preferred
                )));
            }
        }
        if usable.is_empty() {
            warn!("No accelerated backend is usable, all work will run on the baseline path");
        }

        let simd = effective.simd;
        {
            let mut state = self.state.write();
            if state.is_disposed() {
                return Err(disposed());
            }
            *self.capabilities.write() = Some(Arc::new(effective));
            self.speedup_estimates.clear();
            *state = DispatcherState::Ready;
        }

        info!(simd, "Acceleration dispatcher ready with backends {:?}", usable);
        self.observers.notify(AccelerationEvent::Initialized { backends: usable, simd });
        Ok(())
    }

    /// Current lifecycle state
    pub fn state(&self) -> DispatcherState {
        *self.state.read()
    }

    /// Effective capabilities, once initialized
    pub fn capabilities(&self) -> Option<Arc<CapabilityDescriptor>> {
        self.capabilities.read().clone()
    }

    /// Configuration in use
    pub fn config(&self) -> &AccelerationConfig {
        &self.config
    }

    /// Artifact cache in use
    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Registered backend handle
    pub fn backend(&self, backend: Backend) -> Option<Arc<dyn AccelerationBackend>> {
        self.backends.iter().find(|b| b.backend() == backend).cloned()
    }

    /// Registered backends the capabilities allow, in priority order
    pub fn available_backends(&self) -> Vec<Backend> {
        match self.capabilities() {
            Some(caps) => self.usable_backends(&caps),
            None => Vec::new(),
        }
    }

    fn usable_backends(&self, caps: &CapabilityDescriptor) -> Vec<Backend> {
        let mut usable: Vec<Backend> = self
            .backends
            .iter()
            .map(|b| b.backend())
            .filter(|b| caps.supports_backend(*b))
            .collect();
        usable.sort_by_key(|b| b.priority());
        usable.dedup();
        usable
    }

    /// Adds a lifecycle observer
    pub fn subscribe(&self, observer: Arc<dyn AccelerationObserver>) {
        self.observers.subscribe(observer);
    }

    /// Emits an event to every observer
    pub fn notify(&self, event: AccelerationEvent) {
        self.observers.notify(event);
    }

    /// Outcome counters
    pub fn metrics(&self) -> DispatchMetrics {
        self.metrics.snapshot()
    }

    /// Returns true when the operation is large enough to be worth dispatching
    pub fn can_accelerate(&self, op: &Operation) -> bool {
        let thresholds = &self.config.thresholds;
        match op {
            Operation::Inference(req) => {
                op.context_chars() >= thresholds.min_context_chars
                    || req.max_tokens >= thresholds.min_output_tokens
            }
            Operation::TextEmbedding(req) => {
                req.texts.len() >= thresholds.min_embedding_batch
                    || op.context_chars() >= thresholds.min_context_chars
            }
            Operation::Tensor(_) => op.tensor_elements() >= thresholds.min_tensor_elements,
        }
    }

    /// Score of a backend for a kind; `0` when it cannot run it
    ///
    /// SIMD availability multiplies the score of SIMD-friendly kinds, and a
    /// specific backend preference excludes every other backend.
    pub fn score_backend(&self, backend: Backend, kind: OperationKind) -> f64 {
        let Some(caps) = self.capabilities() else {
            return 0.0;
        };
        if let Some(preferred) = self.config.backend.backend() {
            if preferred != backend {
                return 0.0;
            }
        }
        let registered = self
            .backends
            .iter()
            .any(|b| b.backend() == backend && b.supports(kind));
        if !registered || !caps.supports_backend(backend) {
            return 0.0;
        }

        let score = self.cost_model.speedup(backend, kind, &caps);
        if score.is_finite() && score > 0.0 {
            score
        } else {
            0.0
        }
    }

    /// Capable backends for a kind, best first, ties broken by priority
    pub fn rank_backends(&self, kind: OperationKind) -> Vec<(Backend, f64)> {
        let mut ranked: Vec<(Backend, f64)> = self
            .available_backends()
            .into_iter()
            .map(|backend| (backend, self.score_backend(backend, kind)))
            .filter(|(_, score)| *score > 0.0)
            .collect();
        ranked.sort_by(|(a, sa), (b, sb)| sb.total_cmp(sa).then(a.priority().cmp(&b.priority())));
        ranked
    }

    /// Best backend for a kind
    pub fn select_backend(&self, kind: OperationKind) -> Option<Arc<dyn AccelerationBackend>> {
        let (best, _) = self.rank_backends(kind).into_iter().next()?;
        self.backend(best)
    }

    /// Expected speedup over the baseline for a kind
    ///
    /// `1.0` when no backend can run the kind. Cached per kind until the
    /// capabilities change.
    pub fn estimate_speedup(&self, kind: OperationKind) -> f64 {
        if let Some(estimate) = self.speedup_estimates.get(&kind) {
            return *estimate;
        }
        let estimate = self
            .rank_backends(kind)
            .first()
            .map(|(_, score)| *score)
            .unwrap_or(1.0);
        if self.state().is_ready() {
            self.speedup_estimates.insert(kind, estimate);
        }
        estimate
    }

    /// Registers a model so accelerated inference can compile and load it
    pub fn register_model(&self, model_id: impl Into<String>, source: ModelSource) -> Result<()> {
        self.ensure_not_disposed()?;
        let model_id = model_id.into();
        info!("Registering model {} from {}", model_id, source.location);
        self.resident.retain(|(id, _), _| *id != model_id);
        self.models.insert(model_id, source);
        Ok(())
    }

    /// Executes an operation on the best backend, falling back when allowed
    pub async fn accelerate(&self, op: &Operation) -> Result<AccelerationResult> {
        let dispatch_start = Instant::now();
        let kind = op.kind();

        match self.state() {
            DispatcherState::Disposed => {
                self.metrics.record_failure();
                return Err(disposed());
            }
            DispatcherState::Uninitialized => {
                let reason = "dispatcher is not initialized".to_string();
                return self.run_baseline(op, None, reason, dispatch_start, false).await;
            }
            DispatcherState::Ready => {}
        }

        if !self.can_accelerate(op) {
            let reason = format!("{} is below acceleration thresholds", kind);
            return self.run_baseline(op, None, reason, dispatch_start, false).await;
        }

        let Some(backend) = self.select_backend(kind) else {
            let reason = format!("no capable backend supports {}", kind);
            if !self.config.fallback_to_baseline {
                self.metrics.record_failure();
                return Err(Error::UnsupportedOp(reason));
            }
            return self.run_baseline(op, None, reason, dispatch_start, true).await;
        };

        let accelerated_error = match self.run_accelerated(&backend, op, dispatch_start).await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if self.state().is_disposed() {
            self.metrics.record_failure();
            return Err(disposed());
        }
        if !self.config.fallback_to_baseline {
            warn!(backend = %backend.backend(), "Accelerated {} failed: {}", kind, accelerated_error);
            self.metrics.record_failure();
            return Err(accelerated_error);
        }

        warn!(
            backend = %backend.backend(),
            "Accelerated {} failed, falling back to baseline: {}",
            kind,
            accelerated_error
        );
        let reason = format!("{} backend failed: {}", backend.backend(), accelerated_error);
        self.run_baseline(op, Some(backend.backend()), reason, dispatch_start, true)
            .await
            .map_err(|baseline_error| {
                if baseline_error.is_disposed() {
                    return baseline_error;
                }
                Error::FallbackFailed {
                    accelerated: accelerated_error.to_string(),
                    baseline: baseline_error.to_string(),
                }
            })
    }

    /// Executes operations concurrently, collecting per-entry failures
    pub async fn accelerate_batch(&self, ops: &[Operation]) -> Result<BatchResult> {
        self.ensure_not_disposed()?;
        let started = Instant::now();

        let outcomes = join_all(ops.iter().map(|op| self.accelerate(op))).await;

        let mut results = Vec::with_capacity(outcomes.len());
        let mut errors = Vec::new();
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(result) => results.push(Some(result)),
                Err(e) => {
                    errors.push(BatchError {
                        index,
                        code: e.code(),
                        message: e.to_string(),
                    });
                    results.push(None);
                }
            }
        }

        debug!("Batch of {} finished with {} errors", ops.len(), errors.len());
        Ok(BatchResult {
            results,
            errors,
            total_time_ms: duration_ms(started.elapsed()),
        })
    }

    /// Embeds texts at the default width
    pub async fn embed_text(&self, texts: &[String]) -> Result<AccelerationResult> {
        let op = Operation::TextEmbedding(EmbeddingRequest::new(texts.to_vec()));
        self.accelerate(&op).await
    }

    /// Runs an operation on one specific backend, with no fallback
    pub async fn execute_on(&self, backend: Backend, op: &Operation) -> Result<(OperationOutput, Duration)> {
        self.ensure_ready()?;
        let kind = op.kind();
        let available = self.available_backends().contains(&backend);
        let handle = self
            .backend(backend)
            .filter(|b| available && b.supports(kind))
            .ok_or_else(|| Error::UnsupportedOp(format!("{} cannot run {}", backend, kind)))?;

        let (outcome, elapsed) = measure_async(execute_with_timeout(
            handle.execute(op),
            self.config.operation_timeout(),
            "accelerated execution",
        ))
        .await;
        self.ensure_not_disposed()?;
        Ok((outcome?, elapsed))
    }

    /// Runs an operation on the baseline path only
    pub async fn execute_baseline(&self, op: &Operation) -> Result<(OperationOutput, Duration)> {
        self.ensure_not_disposed()?;
        let (outcome, elapsed) = measure_async(execute_with_timeout(
            self.baseline.execute(op),
            self.config.operation_timeout(),
            "baseline execution",
        ))
        .await;
        self.ensure_not_disposed()?;
        Ok((outcome?, elapsed))
    }

    /// Releases backends and the cache; every later call fails
    pub async fn dispose(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if state.is_disposed() {
                return Ok(());
            }
            *state = DispatcherState::Disposed;
        }
        info!("Disposing acceleration dispatcher");

        let outcomes = join_all(self.backends.iter().map(|b| b.dispose())).await;
        for (backend, outcome) in self.backends.iter().zip(outcomes) {
            if let Err(e) = outcome {
                warn!("Failed to dispose {} backend: {}", backend.backend(), e);
            }
        }

        self.cache.dispose();
        self.models.clear();
        self.resident.clear();
        self.speedup_estimates.clear();
        *self.capabilities.write() = None;

        self.observers.notify(AccelerationEvent::Disposed);
        info!("Acceleration dispatcher disposed");
        Ok(())
    }

    fn ensure_not_disposed(&self) -> Result<()> {
        if self.state().is_disposed() {
            Err(disposed())
        } else {
            Ok(())
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            DispatcherState::Ready => Ok(()),
            DispatcherState::Uninitialized => {
                Err(Error::InitFailed("dispatcher is not initialized".to_string()))
            }
            DispatcherState::Disposed => Err(disposed()),
        }
    }

    async fn run_accelerated(
        &self,
        backend: &Arc<dyn AccelerationBackend>,
        op: &Operation,
        dispatch_start: Instant,
    ) -> Result<AccelerationResult> {
        let mut artifact_memory = 0;
        if self.config.cache_models {
            if let Operation::Inference(req) = op {
                artifact_memory = self.ensure_resident(&req.model_id, backend).await?;
            }
        }

        let overhead = dispatch_start.elapsed();
        let (outcome, elapsed) = measure_async(execute_with_timeout(
            backend.execute(op),
            self.config.operation_timeout(),
            "accelerated execution",
        ))
        .await;
        let output = outcome?;

        let baseline_estimate = self.cost_model.baseline_estimate(op);
        let speedup_ratio = finite_ratio(duration_ms(baseline_estimate), duration_ms(elapsed));
        self.metrics.record_accelerated(elapsed);
        debug!(
            backend = %backend.backend(),
            "{} accelerated in {:?}, speedup {:.2}",
            op.kind(),
            elapsed,
            speedup_ratio
        );

        Ok(AccelerationResult {
            acceleration_used: true,
            backend: Some(backend.backend()),
            speedup_ratio,
            memory_used_bytes: op.memory_footprint_bytes() + artifact_memory,
            compute_time_ms: duration_ms(elapsed),
            dispatch_overhead_ms: duration_ms(overhead),
            fallback_reason: None,
            output,
        })
    }

    /// Compiles and loads the model's artifact into the backend once
    async fn ensure_resident(&self, model_id: &str, backend: &Arc<dyn AccelerationBackend>) -> Result<u64> {
        let Some(source) = self.models.get(model_id).map(|entry| entry.value().clone()) else {
            debug!("Model {} is not registered, executing without an artifact", model_id);
            return Ok(0);
        };

        let target = CompilationTarget::new(backend.backend(), self.config.optimization_level);
        let artifact = self.cache.compile(&source, &target).await?;

        let required = artifact.metadata.memory_requirement_bytes;
        if required > self.config.memory_limit_bytes() {
            return Err(Error::Memory(format!(
                "model {} needs {} but the limit is {}",
                model_id,
                format_bytes(required),
                format_bytes(self.config.memory_limit_bytes())
            )));
        }

        let key = (model_id.to_string(), backend.backend());
        let already_loaded = self
            .resident
            .get(&key)
            .map(|id| *id.value() == artifact.id)
            .unwrap_or(false);
        if !already_loaded {
            backend.load_artifact(Arc::clone(&artifact)).await?;
            self.resident.insert(key, artifact.id);
            info!(backend = %backend.backend(), "Artifact {} resident for model {}", artifact.id, model_id);
            self.observers.notify(AccelerationEvent::ArtifactReady {
                model_id: model_id.to_string(),
                artifact_id: artifact.id,
                backend: backend.backend(),
            });
        }
        Ok(required)
    }

    /// Runs the baseline path; `fallback` marks recovery from a backend problem
    async fn run_baseline(
        &self,
        op: &Operation,
        backend: Option<Backend>,
        reason: String,
        dispatch_start: Instant,
        fallback: bool,
    ) -> Result<AccelerationResult> {
        let overhead = dispatch_start.elapsed();
        let (outcome, elapsed) = measure_async(execute_with_timeout(
            self.baseline.execute(op),
            self.config.operation_timeout(),
            "baseline execution",
        ))
        .await;

        // Disposal while the baseline ran fails the call
        if self.state().is_disposed() {
            self.metrics.record_failure();
            return Err(disposed());
        }

        let output = match outcome {
            Ok(output) => output,
            Err(e) => {
                self.metrics.record_failure();
                return Err(e);
            }
        };

        if fallback {
            self.metrics.record_fallback(elapsed);
            self.observers.notify(AccelerationEvent::Fallback {
                kind: op.kind(),
                backend,
                reason: reason.clone(),
            });
        } else {
            self.metrics.record_baseline(elapsed);
            debug!("{} ran on baseline: {}", op.kind(), reason);
        }

        Ok(AccelerationResult {
            acceleration_used: false,
            backend: None,
            // Baseline measured against itself
            speedup_ratio: 1.0,
            memory_used_bytes: op.memory_footprint_bytes(),
            compute_time_ms: duration_ms(elapsed),
            dispatch_overhead_ms: duration_ms(overhead),
            fallback_reason: Some(reason),
            output,
        })
    }
}

fn disposed() -> Error {
    Error::Disposed("acceleration dispatcher has been disposed".to_string())
}
