//! Cost-model driven stand-in backend
//!
//! Latency is the cost model's baseline estimate divided by the backend's
//! heuristic speedup. Outputs carry the right shape but no computed values;
//! genuine kernels plug in behind [`AccelerationBackend`] instead.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use accel_common::{Backend, Error, OperationKind, Result};
use artifact_cache::compiler::backend_base_speedup;
use artifact_cache::CompiledArtifact;

use crate::backend::AccelerationBackend;
use crate::baseline::hashed_embedding;
use crate::cost::{CostModel, HeuristicCostModel};
use crate::operation::{Operation, OperationOutput};

/// Simulated accelerated backend
pub struct SimulatedBackend {
    backend: Backend,
    supported: HashSet<OperationKind>,
    speedup: f64,
    cost_model: Arc<dyn CostModel>,
    always_fail: AtomicBool,
    failures_remaining: AtomicUsize,
    fixed_latency: Option<Duration>,
    resident: DashMap<Uuid, u64>,
    executions: AtomicU64,
    disposed: AtomicBool,
    shutdown: Notify,
}

impl SimulatedBackend {
    /// Creates a backend supporting every operation kind
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            supported: OperationKind::ALL.iter().copied().collect(),
            speedup: backend_base_speedup(backend),
            cost_model: Arc::new(HeuristicCostModel::default()),
            always_fail: AtomicBool::new(false),
            failures_remaining: AtomicUsize::new(0),
            fixed_latency: None,
            resident: DashMap::new(),
            executions: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    /// Restricts the supported operation kinds
    pub fn with_supported(mut self, kinds: impl IntoIterator<Item = OperationKind>) -> Self {
        self.supported = kinds.into_iter().collect();
        self
    }

    /// Overrides the speedup over the cost model's baseline estimate
    pub fn with_speedup(mut self, speedup: f64) -> Self {
        self.speedup = speedup;
        self
    }

    /// Uses a fixed latency instead of the cost model
    pub fn with_fixed_latency(mut self, latency: Duration) -> Self {
        self.fixed_latency = Some(latency);
        self
    }

    /// Uses a different cost model for latency
    pub fn with_cost_model(mut self, cost_model: Arc<dyn CostModel>) -> Self {
        self.cost_model = cost_model;
        self
    }

    /// Makes every execution fail
    pub fn set_failing(&self, failing: bool) {
        self.always_fail.store(failing, Ordering::SeqCst);
    }

    /// Makes the next `count` executions fail
    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Executions attempted so far
    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::SeqCst)
    }

    /// Ids of resident artifacts
    pub fn resident_artifacts(&self) -> Vec<Uuid> {
        self.resident.iter().map(|entry| *entry.key()).collect()
    }

    fn latency(&self, op: &Operation) -> Duration {
        if let Some(latency) = self.fixed_latency {
            return latency;
        }
        let baseline = self.cost_model.baseline_estimate(op).as_secs_f64();
        let seconds = baseline / self.speedup;
        if seconds.is_finite() && seconds > 0.0 {
            Duration::from_secs_f64(seconds)
        } else {
            Duration::ZERO
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(Error::Disposed(format!("{} backend has been disposed", self.backend)))
        } else {
            Ok(())
        }
    }

    fn should_fail(&self) -> bool {
        self.always_fail.load(Ordering::SeqCst)
            || self
                .failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
    }
}

fn simulated_output(op: &Operation) -> OperationOutput {
    match op {
        Operation::Inference(req) => {
            let words: Vec<&str> = req.prompt.split_whitespace().take(req.max_tokens as usize).collect();
            OperationOutput::Text {
                text: words.join(" "),
                tokens: words.len() as u32,
            }
        }
        Operation::TextEmbedding(req) => OperationOutput::Embeddings {
            vectors: req.texts.iter().map(|t| hashed_embedding(t, req.dimensions)).collect(),
        },
        Operation::Tensor(tensor) => OperationOutput::Tensor {
            shape: tensor.output_shape(),
            checksum: None,
        },
    }
}

#[async_trait]
impl AccelerationBackend for SimulatedBackend {
    fn backend(&self) -> Backend {
        self.backend
    }

    fn supports(&self, kind: OperationKind) -> bool {
        self.supported.contains(&kind)
    }

    async fn execute(&self, op: &Operation) -> Result<OperationOutput> {
        self.ensure_live()?;
        let kind = op.kind();
        if !self.supports(kind) {
            return Err(Error::UnsupportedOp(format!("{} on {}", kind, self.backend)));
        }
        self.executions.fetch_add(1, Ordering::SeqCst);

        tokio::select! {
            _ = tokio::time::sleep(self.latency(op)) => {}
            _ = self.shutdown.notified() => {
                return Err(Error::Disposed(format!("{} backend disposed mid-execution", self.backend)));
            }
        }

        if self.should_fail() {
            return Err(Error::Runtime(format!("{} backend failed executing {}", self.backend, kind)));
        }
        Ok(simulated_output(op))
    }

    async fn load_artifact(&self, artifact: Arc<CompiledArtifact>) -> Result<()> {
        self.ensure_live()?;
        if artifact.target.backend != self.backend {
            return Err(Error::InvalidArgument(format!(
                "artifact {} targets {}, not {}",
                artifact.id, artifact.target.backend, self.backend
            )));
        }
        debug!("Loading artifact {} into {}", artifact.id, self.backend);
        self.resident.insert(artifact.id, artifact.metadata.memory_requirement_bytes);
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        self.disposed.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
        self.resident.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{InferenceRequest, TensorOperation};

    #[tokio::test(start_paused = true)]
    async fn test_latency_follows_cost_model() {
        let cost_model = HeuristicCostModel {
            nanos_per_work_unit: 10.0,
            fixed_overhead: Duration::ZERO,
        };
        let backend = SimulatedBackend::new(Backend::Native)
            .with_speedup(4.0)
            .with_cost_model(Arc::new(cost_model));
        let op = Operation::Tensor(TensorOperation::MatMul { m: 100, k: 100, n: 100 });

        let started = tokio::time::Instant::now();
        let output = backend.execute(&op).await.unwrap();

        // 2e6 work units at 10ns, four times faster
        assert_eq!(started.elapsed(), Duration::from_millis(5));
        assert_eq!(
            output,
            OperationOutput::Tensor {
                shape: vec![100, 100],
                checksum: None
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_injection() {
        let backend = SimulatedBackend::new(Backend::ManagedRuntimeA).with_fixed_latency(Duration::from_millis(1));
        let op = Operation::Inference(InferenceRequest::new("m", "hello world", 8));

        backend.fail_next(1);
        assert!(matches!(backend.execute(&op).await, Err(Error::Runtime(_))));
        assert!(backend.execute(&op).await.is_ok());

        backend.set_failing(true);
        assert!(backend.execute(&op).await.is_err());
        assert_eq!(backend.executions(), 3);
    }

    #[tokio::test]
    async fn test_unsupported_kind_rejected() {
        let backend = SimulatedBackend::new(Backend::Custom).with_supported([OperationKind::MatMul]);
        assert!(!backend.supports(OperationKind::Softmax));
        let op = Operation::Tensor(TensorOperation::Softmax { rows: 1, cols: 1 });
        assert!(matches!(backend.execute(&op).await, Err(Error::UnsupportedOp(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_interrupts_execution() {
        let backend = Arc::new(SimulatedBackend::new(Backend::Native).with_fixed_latency(Duration::from_secs(10)));
        let op = Operation::Tensor(TensorOperation::Softmax { rows: 1, cols: 1 });

        let running = {
            let backend = Arc::clone(&backend);
            tokio::spawn(async move { backend.execute(&op).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        backend.dispose().await.unwrap();

        assert!(running.await.unwrap().unwrap_err().is_disposed());
        let op = Operation::Tensor(TensorOperation::Softmax { rows: 1, cols: 1 });
        assert!(backend.execute(&op).await.unwrap_err().is_disposed());
    }
}
