//! Coalescing artifact cache
//!
//! Each cache key is either absent, in flight, or completed. A build runs on
//! its own task so that a requester dropping its future never strands the
//! other waiters. A completed build publishes its artifact before retiring its
//! in-flight marker, which keeps a concurrent caller from starting a duplicate.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use accel_common::utils::{execute_with_timeout, format_bytes};
use accel_common::{Error, Result};

use crate::artifact::{encode_envelope, CompiledArtifact, OptimizationOptions, OptimizationPass, ValidationResult};
use crate::compiler::{estimate_artifact_speedup, ArtifactCompiler, ModelFetcher};
use crate::metadata::extract_metadata;
use crate::source::{CacheKey, CompilationTarget, ModelSource};

type BuildOutcome = Result<Arc<CompiledArtifact>>;
type SharedBuild = Shared<BoxFuture<'static, BuildOutcome>>;

/// Cache tuning knobs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheOptions {
    /// Artifacts needing more runtime memory than this get a validation warning
    pub memory_budget_bytes: Option<u64>,

    /// Builds running longer than this fail with a compile error
    pub build_timeout: Option<Duration>,
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Completed entries
    pub cached_artifacts: usize,

    /// Builds currently running
    pub active_compilations: usize,

    /// Bytes held by completed artifact binaries
    pub total_memory_usage: u64,

    /// Requests served from a completed entry
    pub hits: u64,

    /// Requests that started a build
    pub misses: u64,

    /// Requests that joined a running build
    pub coalesced: u64,

    /// Builds started
    pub builds: u64,

    /// Builds that failed
    pub failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    builds: AtomicU64,
    failures: AtomicU64,
}

struct InFlight {
    build_id: u64,
    build: SharedBuild,
    abort: AbortHandle,
}

struct CacheInner {
    fetcher: Arc<dyn ModelFetcher>,
    compiler: Arc<dyn ArtifactCompiler>,
    options: CacheOptions,
    completed: DashMap<CacheKey, Arc<CompiledArtifact>>,
    in_flight: DashMap<CacheKey, InFlight>,
    next_build_id: AtomicU64,
    /// Bumped by clear and dispose; builds from an older epoch do not publish
    epoch: AtomicU64,
    disposed: AtomicBool,
    counters: Counters,
}

/// Retires an in-flight marker when its build task ends, panics included
struct InFlightMarker {
    inner: Arc<CacheInner>,
    key: CacheKey,
    build_id: u64,
}

impl Drop for InFlightMarker {
    fn drop(&mut self) {
        let build_id = self.build_id;
        self.inner
            .in_flight
            .remove_if(&self.key, |_, in_flight| in_flight.build_id == build_id);
    }
}

/// Content-addressed cache of compiled artifacts
///
/// Cloning is cheap and clones share state.
#[derive(Clone)]
pub struct ArtifactCache {
    inner: Arc<CacheInner>,
}

impl ArtifactCache {
    /// Creates a cache with default options
    pub fn new(fetcher: Arc<dyn ModelFetcher>, compiler: Arc<dyn ArtifactCompiler>) -> Self {
        Self::with_options(fetcher, compiler, CacheOptions::default())
    }

    /// Creates a cache with explicit options
    pub fn with_options(
        fetcher: Arc<dyn ModelFetcher>,
        compiler: Arc<dyn ArtifactCompiler>,
        options: CacheOptions,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                fetcher,
                compiler,
                options,
                completed: DashMap::new(),
                in_flight: DashMap::new(),
                next_build_id: AtomicU64::new(1),
                epoch: AtomicU64::new(0),
                disposed: AtomicBool::new(false),
                counters: Counters::default(),
            }),
        }
    }

    /// Returns the artifact for `(source, target)`, building it at most once
    ///
    /// Concurrent callers for the same pair share a single build and observe
    /// the same outcome. Failed builds are not cached.
    pub async fn compile(&self, source: &ModelSource, target: &CompilationTarget) -> BuildOutcome {
        self.ensure_live()?;
        let key = CacheKey::new(source, target);

        if let Some(artifact) = self.lookup(&key) {
            return Ok(artifact);
        }

        let build = match self.inner.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                self.inner.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Joining in-flight build");
                entry.get().build.clone()
            }
            Entry::Vacant(entry) => {
                // A build may have published between the lookup and taking the entry
                if let Some(artifact) = self.lookup(&key) {
                    return Ok(artifact);
                }
                self.ensure_live()?;

                let in_flight = self.start_build(key.clone(), source.clone(), *target);
                let build = in_flight.build.clone();
                entry.insert(in_flight);
                build
            }
        };

        build.await
    }

    fn start_build(&self, key: CacheKey, source: ModelSource, target: CompilationTarget) -> InFlight {
        let counters = &self.inner.counters;
        counters.misses.fetch_add(1, Ordering::Relaxed);
        counters.builds.fetch_add(1, Ordering::Relaxed);

        let build_id = self.inner.next_build_id.fetch_add(1, Ordering::Relaxed);
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let handle = tokio::spawn(CacheInner::run_build(
            Arc::clone(&self.inner),
            key,
            source,
            target,
            build_id,
            epoch,
        ));
        let abort = handle.abort_handle();

        let build = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => {
                    Err(Error::Disposed("artifact build was cancelled".to_string()))
                }
                Err(e) => Err(Error::CompileFailed(format!("artifact build panicked: {}", e))),
            }
        }
        .boxed()
        .shared();

        InFlight { build_id, build, abort }
    }

    fn lookup(&self, key: &CacheKey) -> Option<Arc<CompiledArtifact>> {
        let artifact = self.inner.completed.get(key).map(|entry| Arc::clone(entry.value()))?;
        self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
        Some(artifact)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.inner.disposed.load(Ordering::SeqCst) {
            Err(Error::Disposed("artifact cache has been disposed".to_string()))
        } else {
            Ok(())
        }
    }

    /// Returns a completed artifact without building
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CompiledArtifact>> {
        self.inner.completed.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns true if a build for the key is running
    pub fn is_building(&self, key: &CacheKey) -> bool {
        self.inner.in_flight.contains_key(key)
    }

    /// Removes a completed entry, returning whether one existed
    pub fn evict(&self, key: &CacheKey) -> bool {
        let removed = self.inner.completed.remove(key).is_some();
        if removed {
            debug!(key = %key, "Evicted artifact");
        }
        removed
    }

    /// Drops every completed entry
    ///
    /// Running builds keep their in-flight markers, so later requests for the
    /// same key still join them. They deliver to their waiters but do not publish.
    pub fn clear(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.completed.clear();
        info!("Artifact cache cleared");
    }

    /// Aborts running builds and rejects further use
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);

        // Take markers out before aborting so no shard lock is held across abort
        let keys: Vec<CacheKey> = self.inner.in_flight.iter().map(|entry| entry.key().clone()).collect();
        let mut aborted = 0usize;
        for key in keys {
            if let Some((_, in_flight)) = self.inner.in_flight.remove(&key) {
                in_flight.abort.abort();
                aborted += 1;
            }
        }
        self.inner.completed.clear();
        info!("Artifact cache disposed, {} in-flight builds aborted", aborted);
    }

    /// Returns true once disposed
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Current statistics
    pub fn stats(&self) -> CacheStats {
        let counters = &self.inner.counters;
        CacheStats {
            cached_artifacts: self.inner.completed.len(),
            active_compilations: self.inner.in_flight.len(),
            total_memory_usage: self.inner.completed.iter().map(|entry| entry.size_bytes).sum(),
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            coalesced: counters.coalesced.load(Ordering::Relaxed),
            builds: counters.builds.load(Ordering::Relaxed),
            failures: counters.failures.load(Ordering::Relaxed),
        }
    }

    /// Checks an artifact's envelope and metadata for consistency
    pub fn validate(&self, artifact: &CompiledArtifact) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        match artifact.header() {
            Ok(header) => {
                if header.backend != artifact.target.backend {
                    errors.push(format!(
                        "envelope backend {} does not match target {}",
                        header.backend, artifact.target.backend
                    ));
                }
                if header.optimization_level != artifact.target.optimization_level {
                    errors.push(format!(
                        "envelope optimization level {} does not match target {}",
                        header.optimization_level, artifact.target.optimization_level
                    ));
                }
                if header.pass_mask != OptimizationPass::mask(&artifact.applied_passes) {
                    errors.push("envelope pass mask does not match applied passes".to_string());
                }
                if Sha256::digest(artifact.payload()).as_slice() != header.digest.as_slice() {
                    errors.push("payload checksum mismatch".to_string());
                }
            }
            Err(e) => errors.push(e.to_string()),
        }

        if artifact.size_bytes != artifact.binary.len() as u64 {
            errors.push(format!(
                "recorded size {} differs from binary size {}",
                artifact.size_bytes,
                artifact.binary.len()
            ));
        }

        let metadata = &artifact.metadata;
        if metadata.parameter_count == 0 {
            errors.push("metadata reports zero parameters".to_string());
        }
        if metadata.memory_requirement_bytes == 0 {
            errors.push("metadata reports zero memory requirement".to_string());
        }
        for (label, shapes) in [("input", &metadata.input_shapes), ("output", &metadata.output_shapes)] {
            if shapes.is_empty() {
                errors.push(format!("metadata has no {} shapes", label));
            } else if shapes.iter().any(|shape| shape.is_empty() || shape.contains(&0)) {
                errors.push(format!("metadata has a degenerate {} shape", label));
            }
        }

        if let Some(budget) = self.inner.options.memory_budget_bytes {
            if metadata.memory_requirement_bytes > budget {
                warnings.push(format!(
                    "artifact needs {} but the memory budget is {}",
                    format_bytes(metadata.memory_requirement_bytes),
                    format_bytes(budget)
                ));
            }
        }
        if !metadata.exact {
            warnings.push("metadata was estimated from payload size".to_string());
        }
        if artifact.estimated_speedup < 1.0 {
            warnings.push(format!(
                "estimated speedup {:.2} is below the baseline",
                artifact.estimated_speedup
            ));
        }

        ValidationResult::from_findings(errors, warnings)
    }

    /// Derives a new artifact with extra optimization passes applied
    ///
    /// The derived artifact gets a fresh id and its own cache entry; the input
    /// artifact is left untouched. Optimizing twice with the same passes
    /// returns the same derived artifact.
    pub fn optimize(&self, artifact: &CompiledArtifact, options: &OptimizationOptions) -> BuildOutcome {
        self.ensure_live()?;

        let requested = options.passes();
        if requested.is_empty() {
            return Err(Error::InvalidArgument("no optimization passes selected".to_string()));
        }

        let report = self.validate(artifact);
        if !report.valid {
            return Err(Error::CompileFailed(format!(
                "cannot optimize an invalid artifact: {}",
                report.errors.join("; ")
            )));
        }

        let base_mask = OptimizationPass::mask(&artifact.applied_passes);
        let new_passes: Vec<OptimizationPass> = requested
            .into_iter()
            .filter(|pass| base_mask & pass.bit() == 0)
            .collect();
        if new_passes.is_empty() {
            return Err(Error::InvalidArgument(
                "selected passes are already applied".to_string(),
            ));
        }

        let mask = base_mask | OptimizationPass::mask(&new_passes);
        let key = CacheKey::new(&artifact.source, &artifact.target).derived(mask);
        if let Some(existing) = self.lookup(&key) {
            return Ok(existing);
        }

        let started = Instant::now();
        let target = artifact.target;
        let binary = encode_envelope(target.backend, target.optimization_level, mask, artifact.payload());

        let mut metadata = artifact.metadata.clone();
        let memory_factor: f64 = new_passes.iter().map(|p| p.memory_factor()).product();
        metadata.memory_requirement_bytes =
            ((metadata.memory_requirement_bytes as f64 * memory_factor).ceil() as u64).max(1);
        let speedup_factor: f64 = new_passes.iter().map(|p| p.speedup_factor()).product();

        let optimized = Arc::new(CompiledArtifact {
            id: Uuid::new_v4(),
            key: key.clone(),
            source: artifact.source.clone(),
            target,
            size_bytes: binary.len() as u64,
            binary,
            metadata,
            estimated_speedup: artifact.estimated_speedup * speedup_factor,
            compile_duration: started.elapsed(),
            created_at: Utc::now(),
            derived_from: Some(artifact.id),
            applied_passes: OptimizationPass::from_mask(mask),
        });

        info!(
            key = %key,
            "Optimized artifact {} into {} with {} new passes",
            artifact.id,
            optimized.id,
            new_passes.len()
        );

        let stored = self.inner.completed.entry(key).or_insert(optimized);
        Ok(Arc::clone(stored.value()))
    }
}

impl CacheInner {
    async fn run_build(
        self: Arc<Self>,
        key: CacheKey,
        source: ModelSource,
        target: CompilationTarget,
        build_id: u64,
        epoch: u64,
    ) -> BuildOutcome {
        let _marker = InFlightMarker {
            inner: Arc::clone(&self),
            key: key.clone(),
            build_id,
        };

        info!(key = %key, backend = %target.backend, "Compiling artifact from {}", source.location);
        let started = Instant::now();
        let build = self.build(&key, &source, &target, started);
        let outcome = match self.options.build_timeout {
            Some(limit) => execute_with_timeout(build, limit, "artifact build").await,
            None => build.await,
        };

        match outcome {
            Ok(artifact) => {
                let artifact = Arc::new(artifact);
                if self.epoch.load(Ordering::SeqCst) == epoch && !self.disposed.load(Ordering::SeqCst) {
                    self.completed.insert(key.clone(), Arc::clone(&artifact));
                } else {
                    debug!(key = %key, "Cache was cleared during build, not publishing");
                }
                info!(
                    key = %key,
                    "Artifact {} ready ({}) in {:?}",
                    artifact.id,
                    format_bytes(artifact.size_bytes),
                    artifact.compile_duration
                );
                Ok(artifact)
            }
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                let e = match e {
                    Error::CompileFailed(_) | Error::Disposed(_) => e,
                    other => Error::CompileFailed(other.to_string()),
                };
                warn!(key = %key, "Artifact build failed: {}", e);
                Err(e)
            }
        }
    }

    async fn build(
        &self,
        key: &CacheKey,
        source: &ModelSource,
        target: &CompilationTarget,
        started: Instant,
    ) -> Result<CompiledArtifact> {
        let payload = self.fetcher.fetch(source).await?;
        let metadata = extract_metadata(source.kind, &payload, target.quantization)?;
        let binary = self.compiler.compile(target, payload, &metadata).await?;

        Ok(CompiledArtifact {
            id: Uuid::new_v4(),
            key: key.clone(),
            source: source.clone(),
            target: *target,
            size_bytes: binary.len() as u64,
            binary,
            metadata,
            estimated_speedup: estimate_artifact_speedup(target),
            compile_duration: started.elapsed(),
            created_at: Utc::now(),
            derived_from: None,
            applied_passes: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use bytes::Bytes;

    use accel_common::{Backend, OptimizationLevel};

    use crate::compiler::InMemoryFetcher;
    use crate::metadata::tests::safetensors_fixture;
    use crate::metadata::ArtifactMetadata;
    use crate::source::SourceKind;

    struct ScriptedCompiler {
        builds: AtomicUsize,
        delay: Duration,
        failures_remaining: AtomicUsize,
    }

    impl ScriptedCompiler {
        fn new(delay_ms: u64, failures: usize) -> Arc<Self> {
            Arc::new(Self {
                builds: AtomicUsize::new(0),
                delay: Duration::from_millis(delay_ms),
                failures_remaining: AtomicUsize::new(failures),
            })
        }

        fn builds(&self) -> usize {
            self.builds.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ArtifactCompiler for ScriptedCompiler {
        async fn compile(
            &self,
            target: &CompilationTarget,
            payload: Bytes,
            _metadata: &ArtifactMetadata,
        ) -> Result<Bytes> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let failing = self
                .failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(Error::CompileFailed("injected failure".to_string()));
            }
            Ok(encode_envelope(target.backend, target.optimization_level, 0, &payload))
        }
    }

    fn fetcher() -> Arc<InMemoryFetcher> {
        let fetcher = InMemoryFetcher::new();
        fetcher.insert("models/tiny.onnx", vec![7u8; 4096]);
        fetcher.insert(
            "models/tiny.safetensors",
            safetensors_fixture(&[("embed", "F32", vec![64, 8]), ("head", "F32", vec![4, 8])]),
        );
        Arc::new(fetcher)
    }

    fn cache_with(compiler: Arc<ScriptedCompiler>) -> ArtifactCache {
        ArtifactCache::new(fetcher(), compiler)
    }

    fn onnx() -> ModelSource {
        ModelSource::new(SourceKind::Onnx, "models/tiny.onnx")
    }

    fn native() -> CompilationTarget {
        CompilationTarget::new(Backend::Native, OptimizationLevel::O2)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_share_one_build() {
        let compiler = ScriptedCompiler::new(50, 0);
        let cache = cache_with(compiler.clone());
        let (source, target) = (onnx(), native());

        let results = futures::future::join_all((0..16).map(|_| cache.compile(&source, &target))).await;

        assert_eq!(compiler.builds(), 1);
        let first = results[0].as_ref().unwrap().id;
        assert!(results.iter().all(|r| r.as_ref().unwrap().id == first));

        let stats = cache.stats();
        assert_eq!(stats.builds, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.coalesced, 15);
        assert_eq!(stats.active_compilations, 0);
        assert_eq!(stats.cached_artifacts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_entry_is_served_without_rebuild() {
        let compiler = ScriptedCompiler::new(5, 0);
        let cache = cache_with(compiler.clone());

        let first = cache.compile(&onnx(), &native()).await.unwrap();
        let second = cache.compile(&onnx(), &native()).await.unwrap();

        assert_eq!(first.id, second.id);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(compiler.builds(), 1);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.get(&first.key).map(|a| a.id), Some(first.id));
        assert!(cache.stats().total_memory_usage >= first.size_bytes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_reaches_every_waiter_and_is_not_cached() {
        let compiler = ScriptedCompiler::new(20, 1);
        let cache = cache_with(compiler.clone());
        let (source, target) = (onnx(), native());

        let (a, b) = tokio::join!(cache.compile(&source, &target), cache.compile(&source, &target));
        assert!(matches!(a, Err(Error::CompileFailed(_))));
        assert_eq!(a.unwrap_err(), b.unwrap_err());
        assert_eq!(compiler.builds(), 1);
        assert_eq!(cache.stats().cached_artifacts, 0);
        assert_eq!(cache.stats().failures, 1);

        let retried = cache.compile(&source, &target).await;
        assert!(retried.is_ok());
        assert_eq!(compiler.builds(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_targets_build_separately() {
        let compiler = ScriptedCompiler::new(5, 0);
        let cache = cache_with(compiler.clone());
        let (source, target) = (onnx(), native());
        let o3 = CompilationTarget::new(Backend::Native, OptimizationLevel::O3);

        let (a, b) = tokio::join!(cache.compile(&source, &target), cache.compile(&source, &o3));
        assert_ne!(a.unwrap().id, b.unwrap().id);
        assert_eq!(compiler.builds(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_requester_does_not_strand_build() {
        let compiler = ScriptedCompiler::new(50, 0);
        let cache = cache_with(compiler.clone());

        let attempt = tokio::time::timeout(Duration::from_millis(10), cache.compile(&onnx(), &native())).await;
        assert!(attempt.is_err());
        assert!(cache.is_building(&CacheKey::new(&onnx(), &native())));

        let artifact = cache.compile(&onnx(), &native()).await.unwrap();
        assert_eq!(compiler.builds(), 1);
        assert_eq!(cache.get(&artifact.key).map(|a| a.id), Some(artifact.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_aborts_in_flight_builds() {
        let compiler = ScriptedCompiler::new(50, 0);
        let cache = cache_with(compiler.clone());

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.compile(&onnx(), &native()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.stats().active_compilations, 1);

        cache.dispose();

        let err = pending.await.unwrap().unwrap_err();
        assert!(err.is_disposed());
        assert!(cache.compile(&onnx(), &native()).await.unwrap_err().is_disposed());
        assert_eq!(cache.stats().cached_artifacts, 0);
        assert!(cache.is_disposed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_during_build_does_not_repopulate() {
        let compiler = ScriptedCompiler::new(50, 0);
        let cache = cache_with(compiler.clone());

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.compile(&onnx(), &native()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.clear();

        let artifact = pending.await.unwrap().unwrap();
        assert!(cache.get(&artifact.key).is_none());
        assert_eq!(cache.stats().cached_artifacts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_after_clear_joins_running_build() {
        let compiler = ScriptedCompiler::new(50, 0);
        let cache = cache_with(compiler.clone());

        let first = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.compile(&onnx(), &native()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.clear();
        assert!(cache.is_building(&CacheKey::new(&onnx(), &native())));

        let second = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.compile(&onnx(), &native()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.stats().active_compilations, 1);

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(compiler.builds(), 1);
        assert_eq!(first.id, second.id);
        assert_eq!(cache.stats().coalesced, 1);
        assert_eq!(cache.stats().cached_artifacts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_build_timeout_is_a_compile_failure() {
        let compiler = ScriptedCompiler::new(50, 0);
        let options = CacheOptions {
            build_timeout: Some(Duration::from_millis(20)),
            ..CacheOptions::default()
        };
        let cache = ArtifactCache::with_options(fetcher(), compiler, options);

        let err = cache.compile(&onnx(), &native()).await.unwrap_err();
        assert!(matches!(err, Error::CompileFailed(_)));
        assert_eq!(cache.stats().active_compilations, 0);
        assert_eq!(cache.stats().cached_artifacts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_model_is_compile_failure() {
        let cache = cache_with(ScriptedCompiler::new(0, 0));
        let source = ModelSource::new(SourceKind::Onnx, "models/absent.onnx");

        let err = cache.compile(&source, &native()).await.unwrap_err();
        assert!(matches!(err, Error::CompileFailed(_)));
        assert_eq!(cache.stats().failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_forces_rebuild() {
        let compiler = ScriptedCompiler::new(5, 0);
        let cache = cache_with(compiler.clone());

        let first = cache.compile(&onnx(), &native()).await.unwrap();
        assert!(cache.evict(&first.key));
        assert!(!cache.evict(&first.key));

        let second = cache.compile(&onnx(), &native()).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(compiler.builds(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validate_detects_corruption() {
        let options = CacheOptions {
            memory_budget_bytes: Some(1),
            ..CacheOptions::default()
        };
        let cache = ArtifactCache::with_options(fetcher(), ScriptedCompiler::new(0, 0), options);
        let source = ModelSource::new(SourceKind::Safetensors, "models/tiny.safetensors");
        let artifact = cache.compile(&source, &native()).await.unwrap();
        assert!(artifact.metadata.exact);

        let report = cache.validate(&artifact);
        assert!(report.valid, "{:?}", report.errors);
        assert!(report.warnings.iter().any(|w| w.contains("memory budget")));

        let mut corrupted = (*artifact).clone();
        let mut bytes = corrupted.binary.to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        corrupted.binary = Bytes::from(bytes);
        let report = cache.validate(&corrupted);
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("checksum")));

        let mut truncated = (*artifact).clone();
        truncated.binary = artifact.binary.slice(..10);
        assert!(!cache.validate(&truncated).valid);
    }

    #[tokio::test(start_paused = true)]
    async fn test_optimize_derives_new_artifact() {
        let cache = cache_with(ScriptedCompiler::new(0, 0));
        let original = cache.compile(&onnx(), &native()).await.unwrap();

        let options = OptimizationOptions {
            operator_fusion: true,
            memory_layout: true,
            ..OptimizationOptions::none()
        };
        let optimized = cache.optimize(&original, &options).unwrap();

        assert_ne!(optimized.id, original.id);
        assert_eq!(optimized.derived_from, Some(original.id));
        assert!(optimized.estimated_speedup > original.estimated_speedup);
        assert!(optimized.metadata.memory_requirement_bytes < original.metadata.memory_requirement_bytes);
        assert_eq!(optimized.payload(), original.payload());
        assert!(cache.validate(&optimized).valid);
        assert!(original.applied_passes.is_empty());
        assert_eq!(cache.get(&original.key).map(|a| a.id), Some(original.id));

        let again = cache.optimize(&original, &options).unwrap();
        assert_eq!(again.id, optimized.id);

        assert!(matches!(
            cache.optimize(&optimized, &options),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            cache.optimize(&original, &OptimizationOptions::none()),
            Err(Error::InvalidArgument(_))
        ));

        let full = cache.optimize(&optimized, &OptimizationOptions::default()).unwrap();
        assert_eq!(full.applied_passes.len(), OptimizationPass::ALL.len());
        assert_eq!(full.derived_from, Some(optimized.id));
    }
}
