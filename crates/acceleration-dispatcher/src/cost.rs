//! Cost model behind speedup estimates and baseline timing estimates
//!
//! Numbers are static per operation kind. They are the bootstrap values the
//! dispatcher scores with until a measured model replaces them through the
//! [`CostModel`] seam.

use std::time::Duration;

use accel_common::{Backend, OperationKind};
use capability_probe::CapabilityDescriptor;

use crate::operation::Operation;

/// Throughput multiplier applied to SIMD-friendly kinds when SIMD is on
pub const SIMD_MULTIPLIER: f64 = 1.6;

/// Extra multiplier for the thread-oriented runtime on tensor kinds
pub const THREADING_MULTIPLIER: f64 = 1.2;

/// Prices operations for scoring and speedup reporting
pub trait CostModel: Send + Sync {
    /// Expected baseline execution time
    fn baseline_estimate(&self, op: &Operation) -> Duration;

    /// Expected speedup of `backend` over the baseline for `kind`
    fn speedup(&self, backend: Backend, kind: OperationKind, capabilities: &CapabilityDescriptor) -> f64;
}

/// Work units times a fixed per-unit cost
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeuristicCostModel {
    /// Baseline nanoseconds per work unit
    pub nanos_per_work_unit: f64,

    /// Fixed per-call baseline cost
    pub fixed_overhead: Duration,
}

impl Default for HeuristicCostModel {
    fn default() -> Self {
        Self {
            nanos_per_work_unit: 1.0,
            fixed_overhead: Duration::from_micros(50),
        }
    }
}

fn kind_speedup(kind: OperationKind) -> f64 {
    match kind {
        OperationKind::Inference => 2.5,
        OperationKind::TextEmbedding => 2.0,
        OperationKind::MatMul => 4.0,
        OperationKind::Convolution => 3.5,
        OperationKind::Softmax => 2.0,
        OperationKind::Attention => 3.0,
        OperationKind::EmbeddingLookup => 1.5,
    }
}

fn backend_weight(backend: Backend) -> f64 {
    match backend {
        Backend::Native => 1.0,
        Backend::ManagedRuntimeA => 0.8,
        Backend::ManagedRuntimeB => 0.7,
        Backend::Custom => 0.6,
    }
}

impl CostModel for HeuristicCostModel {
    fn baseline_estimate(&self, op: &Operation) -> Duration {
        let nanos = op.work_units() as f64 * self.nanos_per_work_unit;
        let nanos = if nanos.is_finite() && nanos > 0.0 { nanos } else { 0.0 };
        self.fixed_overhead + Duration::from_nanos(nanos as u64)
    }

    fn speedup(&self, backend: Backend, kind: OperationKind, capabilities: &CapabilityDescriptor) -> f64 {
        let mut speedup = kind_speedup(kind) * backend_weight(backend);
        if capabilities.simd && kind.benefits_from_simd() {
            speedup *= SIMD_MULTIPLIER;
        }
        if backend == Backend::ManagedRuntimeB && capabilities.threading && kind.is_tensor_op() {
            speedup *= THREADING_MULTIPLIER;
        }
        speedup
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::TensorOperation;

    fn host(simd: bool) -> CapabilityDescriptor {
        CapabilityDescriptor::new(simd, true, true, 8 << 30, Backend::ALL)
    }

    #[test]
    fn test_simd_never_lowers_speedup() {
        let model = HeuristicCostModel::default();
        for backend in Backend::ALL {
            for kind in OperationKind::ALL {
                let with = model.speedup(backend, kind, &host(true));
                let without = model.speedup(backend, kind, &host(false));
                assert!(without <= with, "{} {}", backend, kind);
                if kind.benefits_from_simd() {
                    assert!(without < with);
                }
            }
        }
    }

    #[test]
    fn test_baseline_estimate_scales_with_work() {
        let model = HeuristicCostModel::default();
        let op = Operation::Tensor(TensorOperation::MatMul { m: 100, k: 100, n: 100 });
        assert_eq!(
            model.baseline_estimate(&op),
            Duration::from_micros(50) + Duration::from_nanos(2_000_000)
        );
    }
}
