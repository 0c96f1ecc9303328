//! Baseline (non-accelerated) execution path
//!
//! [`ReferenceBaseline`] runs plain `ndarray` kernels on deterministic
//! inputs generated from the operation's shape. It is the safety net the
//! dispatcher falls back to and the reference the harness measures against.

use async_trait::async_trait;
use ndarray::{s, Array2, Array4, Axis};
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use tracing::debug;

use accel_common::{Error, Result};

use crate::operation::{EmbeddingRequest, InferenceRequest, Operation, OperationOutput, TensorOperation};

/// Operations above this many work units are computed on the blocking pool
const BLOCKING_WORK_THRESHOLD: u64 = 1 << 22;

/// Executes operations without acceleration
#[async_trait]
pub trait BaselineExecutor: Send + Sync {
    /// Executes an operation on the baseline path
    async fn execute(&self, op: &Operation) -> Result<OperationOutput>;
}

/// Reference kernels
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceBaseline;

impl ReferenceBaseline {
    /// Computes an operation synchronously
    pub fn compute(op: &Operation) -> Result<OperationOutput> {
        match op {
            Operation::Inference(req) => Ok(complete(req)),
            Operation::TextEmbedding(req) => embed(req),
            Operation::Tensor(tensor) => tensor_kernel(tensor),
        }
    }
}

#[async_trait]
impl BaselineExecutor for ReferenceBaseline {
    async fn execute(&self, op: &Operation) -> Result<OperationOutput> {
        if op.work_units() <= BLOCKING_WORK_THRESHOLD {
            return Self::compute(op);
        }

        debug!("Running {} baseline on the blocking pool", op.kind());
        let owned = op.clone();
        tokio::task::spawn_blocking(move || Self::compute(&owned))
            .await
            .map_err(|e| Error::Runtime(format!("baseline task failed: {}", e)))?
    }
}

fn complete(req: &InferenceRequest) -> OperationOutput {
    let words: Vec<&str> = req
        .prompt
        .split_whitespace()
        .take(req.max_tokens as usize)
        .collect();
    let text = if req.max_tokens == 0 {
        String::new()
    } else {
        format!("[{}] {}", req.model_id, words.join(" "))
    };
    OperationOutput::Text {
        text,
        tokens: words.len() as u32,
    }
}

/// Deterministic feature-hashed embedding, L2 normalised
pub fn hashed_embedding(text: &str, dimensions: usize) -> Vec<f32> {
    let mut vector = vec![0f32; dimensions];
    if dimensions == 0 {
        return vector;
    }

    for token in text.split_whitespace() {
        let digest = Sha256::digest(token.to_lowercase().as_bytes());
        let bucket = digest[..8].iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[(bucket % dimensions as u64) as usize] += sign;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
    vector
}

fn embed(req: &EmbeddingRequest) -> Result<OperationOutput> {
    if req.dimensions == 0 {
        return Err(Error::InvalidArgument("embedding dimensions must be positive".to_string()));
    }
    let vectors = req
        .texts
        .par_iter()
        .map(|text| hashed_embedding(text, req.dimensions))
        .collect();
    Ok(OperationOutput::Embeddings { vectors })
}

fn fill(rows: usize, cols: usize, seed: usize) -> Array2<f32> {
    Array2::from_shape_fn((rows, cols), |(i, j)| {
        ((i * 31 + j * 17 + seed) % 13) as f32 / 13.0 - 0.5
    })
}

fn softmax_rows(mut x: Array2<f32>) -> Array2<f32> {
    for mut row in x.axis_iter_mut(Axis(0)) {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        if sum > 0.0 {
            row.mapv_inplace(|v| v / sum);
        }
    }
    x
}

fn checksum<'a>(values: impl Iterator<Item = &'a f32>) -> f64 {
    values.map(|&v| v as f64).sum()
}

fn tensor_kernel(op: &TensorOperation) -> Result<OperationOutput> {
    let shape = op.output_shape();
    let sum = match op {
        TensorOperation::MatMul { m, k, n } => {
            let product = fill(*m, *k, 1).dot(&fill(*k, *n, 2));
            checksum(product.iter())
        }
        TensorOperation::Softmax { rows, cols } => checksum(softmax_rows(fill(*rows, *cols, 3)).iter()),
        TensorOperation::Convolution {
            batch,
            channels,
            height,
            width,
            kernel_size,
            filters,
        } => {
            let k = *kernel_size;
            if k == 0 || k > *height || k > *width {
                return Err(Error::InvalidArgument(format!(
                    "kernel {} does not fit a {}x{} input",
                    k, height, width
                )));
            }
            let input = Array4::from_shape_fn((*batch, *channels, *height, *width), |(b, c, y, x)| {
                ((b * 7 + c * 5 + y * 3 + x) % 11) as f32 / 11.0 - 0.5
            });
            let weights = Array4::from_shape_fn((*filters, *channels, k, k), |(f, c, y, x)| {
                ((f * 3 + c + y * 2 + x) % 5) as f32 / 5.0 - 0.4
            });
            let output = Array4::from_shape_fn((shape[0], shape[1], shape[2], shape[3]), |(b, f, y, x)| {
                let patch = input.slice(s![b, .., y..y + k, x..x + k]);
                let kernel = weights.slice(s![f, .., .., ..]);
                (&patch * &kernel).sum()
            });
            checksum(output.iter())
        }
        TensorOperation::Attention {
            batch,
            heads,
            seq_len,
            head_dim,
        } => {
            let scale = 1.0 / ((*head_dim).max(1) as f32).sqrt();
            (0..batch * heads)
                .into_par_iter()
                .map(|head| {
                    let q = fill(*seq_len, *head_dim, head);
                    let k = fill(*seq_len, *head_dim, head + 1);
                    let v = fill(*seq_len, *head_dim, head + 2);
                    let weights = softmax_rows(q.dot(&k.t()) * scale);
                    checksum(weights.dot(&v).iter())
                })
                .sum::<f64>()
        }
        TensorOperation::EmbeddingLookup {
            vocab_size,
            dim,
            token_ids,
        } => {
            let table = fill(*vocab_size, *dim, 5);
            let mut total = 0.0;
            for &id in token_ids {
                let row = id as usize;
                if row >= *vocab_size {
                    return Err(Error::InvalidArgument(format!(
                        "token id {} outside vocabulary of {}",
                        id, vocab_size
                    )));
                }
                total += checksum(table.row(row).iter());
            }
            total
        }
    };

    Ok(OperationOutput::Tensor {
        shape,
        checksum: Some(sum),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor_checksum(output: OperationOutput) -> (Vec<usize>, f64) {
        match output {
            OperationOutput::Tensor { shape, checksum } => (shape, checksum.unwrap()),
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_softmax_rows_sum_to_one() {
        let op = Operation::Tensor(TensorOperation::Softmax { rows: 4, cols: 10 });
        let (shape, sum) = tensor_checksum(ReferenceBaseline.execute(&op).await.unwrap());
        assert_eq!(shape, vec![4, 10]);
        assert!((sum - 4.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_matmul_matches_manual_product() {
        let op = Operation::Tensor(TensorOperation::MatMul { m: 2, k: 3, n: 2 });
        let (shape, sum) = tensor_checksum(ReferenceBaseline.execute(&op).await.unwrap());
        assert_eq!(shape, vec![2, 2]);

        let a = fill(2, 3, 1);
        let b = fill(3, 2, 2);
        let mut expected = 0.0f64;
        for i in 0..2 {
            for j in 0..2 {
                for k in 0..3 {
                    expected += (a[[i, k]] * b[[k, j]]) as f64;
                }
            }
        }
        assert!((sum - expected).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_attention_rows_are_convex_combinations() {
        let op = Operation::Tensor(TensorOperation::Attention {
            batch: 1,
            heads: 2,
            seq_len: 4,
            head_dim: 8,
        });
        let (shape, sum) = tensor_checksum(ReferenceBaseline.execute(&op).await.unwrap());
        assert_eq!(shape, vec![1, 2, 4, 8]);
        assert!(sum.is_finite());
    }

    #[tokio::test]
    async fn test_convolution_rejects_oversized_kernel() {
        let ok = Operation::Tensor(TensorOperation::Convolution {
            batch: 1,
            channels: 2,
            height: 5,
            width: 5,
            kernel_size: 3,
            filters: 2,
        });
        let (shape, _) = tensor_checksum(ReferenceBaseline.execute(&ok).await.unwrap());
        assert_eq!(shape, vec![1, 2, 3, 3]);

        let bad = Operation::Tensor(TensorOperation::Convolution {
            batch: 1,
            channels: 1,
            height: 2,
            width: 2,
            kernel_size: 3,
            filters: 1,
        });
        assert!(matches!(ReferenceBaseline.execute(&bad).await, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_embedding_lookup_bounds() {
        let op = Operation::Tensor(TensorOperation::EmbeddingLookup {
            vocab_size: 10,
            dim: 4,
            token_ids: vec![0, 9, 3],
        });
        let (shape, _) = tensor_checksum(ReferenceBaseline.execute(&op).await.unwrap());
        assert_eq!(shape, vec![3, 4]);

        let bad = Operation::Tensor(TensorOperation::EmbeddingLookup {
            vocab_size: 10,
            dim: 4,
            token_ids: vec![10],
        });
        assert!(ReferenceBaseline.execute(&bad).await.is_err());
    }

    #[test]
    fn test_hashed_embeddings_are_deterministic_and_normalised() {
        let a = hashed_embedding("The quick brown fox", 64);
        let b = hashed_embedding("the QUICK brown fox", 64);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(hashed_embedding("", 8).iter().all(|&v| v == 0.0));
    }

    #[tokio::test]
    async fn test_templated_completion_respects_token_limit() {
        let op = Operation::Inference(InferenceRequest::new("tiny", "one two three four five", 3));
        match ReferenceBaseline.execute(&op).await.unwrap() {
            OperationOutput::Text { text, tokens } => {
                assert_eq!(tokens, 3);
                assert_eq!(text, "[tiny] one two three");
            }
            other => panic!("unexpected output {:?}", other),
        }
    }
}
