//! Standard benchmark workloads

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use accel_config::BenchmarkSuiteOptions;
use acceleration_dispatcher::{InferenceRequest, Operation, TensorOperation};

/// Group of workloads reported together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkCategory {
    /// Text generation
    Inference,
    /// Tensor kernels
    TensorOps,
    /// Memory-bound lookups, reported as throughput
    Memory,
    /// Concurrent load
    Stress,
}

impl fmt::Display for BenchmarkCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BenchmarkCategory::Inference => write!(f, "inference"),
            BenchmarkCategory::TensorOps => write!(f, "tensor_ops"),
            BenchmarkCategory::Memory => write!(f, "memory"),
            BenchmarkCategory::Stress => write!(f, "stress"),
        }
    }
}

/// Named, repeatable unit of benchmark work
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkOperation {
    /// Display name, unique within a suite
    pub name: String,

    /// Reporting category
    pub category: BenchmarkCategory,

    /// Work executed every iteration
    pub operation: Operation,

    /// Timed iterations
    pub iterations: usize,

    /// Discarded iterations
    pub warmup_iterations: usize,

    /// Bound on each iteration
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
}

impl BenchmarkOperation {
    /// Creates an operation using the suite's iteration counts and timeout
    pub fn new(
        name: impl Into<String>,
        category: BenchmarkCategory,
        operation: Operation,
        options: &BenchmarkSuiteOptions,
    ) -> Self {
        Self {
            name: name.into(),
            category,
            operation,
            iterations: options.iterations,
            warmup_iterations: options.warmup_iterations,
            timeout: options.timeout(),
        }
    }
}

/// Workloads for every category the options enable, stress excluded
///
/// Stress reuses the first tensor workload at each concurrency level.
pub fn standard_workloads(options: &BenchmarkSuiteOptions) -> Vec<BenchmarkOperation> {
    let mut workloads = Vec::new();

    if options.include_inference {
        let prompt = "Summarize the following passage about vectorized kernels. ".repeat(16);
        workloads.push(BenchmarkOperation::new(
            "inference_short",
            BenchmarkCategory::Inference,
            Operation::Inference(InferenceRequest::new("benchmark", prompt.clone(), 32)),
            options,
        ));
        workloads.push(BenchmarkOperation::new(
            "inference_long",
            BenchmarkCategory::Inference,
            Operation::Inference(InferenceRequest::new("benchmark", prompt.repeat(4), 128)),
            options,
        ));
    }

    if options.include_tensor_ops {
        let tensor_ops = [
            ("matmul_128", TensorOperation::MatMul { m: 128, k: 128, n: 128 }),
            (
                "conv_3x3",
                TensorOperation::Convolution {
                    batch: 1,
                    channels: 3,
                    height: 32,
                    width: 32,
                    kernel_size: 3,
                    filters: 8,
                },
            ),
            ("softmax_256", TensorOperation::Softmax { rows: 256, cols: 256 }),
            (
                "attention_4h",
                TensorOperation::Attention {
                    batch: 1,
                    heads: 4,
                    seq_len: 64,
                    head_dim: 32,
                },
            ),
        ];
        for (name, op) in tensor_ops {
            workloads.push(BenchmarkOperation::new(
                name,
                BenchmarkCategory::TensorOps,
                Operation::Tensor(op),
                options,
            ));
        }
    }

    if options.include_memory {
        let vocab_size = 8_192;
        workloads.push(BenchmarkOperation::new(
            "embedding_lookup_1k",
            BenchmarkCategory::Memory,
            Operation::Tensor(TensorOperation::EmbeddingLookup {
                vocab_size,
                dim: 256,
                token_ids: (0..1_024u32).map(|i| (i * 7) % vocab_size as u32).collect(),
            }),
            options,
        ));
    }

    workloads
}

/// Operation launched concurrently by the stress category
pub fn stress_operation() -> Operation {
    Operation::Tensor(TensorOperation::MatMul { m: 64, k: 64, n: 64 })
}

mod duration_millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories_follow_toggles() {
        let options = BenchmarkSuiteOptions {
            include_inference: false,
            include_memory: false,
            ..Default::default()
        };
        let workloads = standard_workloads(&options);
        assert!(!workloads.is_empty());
        assert!(workloads.iter().all(|w| w.category == BenchmarkCategory::TensorOps));
        assert!(workloads.iter().all(|w| w.iterations == options.iterations));
    }

    #[test]
    fn test_memory_workload_indices_in_range() {
        let workloads = standard_workloads(&BenchmarkSuiteOptions::default());
        let memory = workloads
            .iter()
            .find(|w| w.category == BenchmarkCategory::Memory)
            .unwrap();
        match &memory.operation {
            Operation::Tensor(TensorOperation::EmbeddingLookup { vocab_size, token_ids, .. }) => {
                assert!(token_ids.iter().all(|&t| (t as usize) < *vocab_size));
            }
            other => panic!("unexpected workload {:?}", other),
        }
    }

    #[test]
    fn test_workload_serializes_timeout_as_millis() {
        let workloads = standard_workloads(&BenchmarkSuiteOptions::default());
        let json = serde_json::to_value(&workloads[0]).unwrap();
        assert_eq!(json["timeout"], 10_000);
        assert_eq!(json["category"], "inference");
    }
}
