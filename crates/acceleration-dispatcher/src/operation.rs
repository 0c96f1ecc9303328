//! Units of work accepted by the dispatcher
//!
//! Every variant carries its own payload shape, so adding a kind is a
//! compile-checked change across the dispatcher, backends and baseline.

use serde::{Deserialize, Serialize};

use accel_common::OperationKind;

/// Embedding width used when a request does not specify one
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;

/// Text generation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceRequest {
    /// Model identifier
    pub model_id: String,

    /// Prompt text
    pub prompt: String,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Whether the caller wants streamed output
    #[serde(default)]
    pub stream: bool,
}

impl InferenceRequest {
    /// Creates a non-streaming request
    pub fn new(model_id: impl Into<String>, prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model_id: model_id.into(),
            prompt: prompt.into(),
            max_tokens,
            stream: false,
        }
    }
}

/// Text embedding request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// Texts to embed
    pub texts: Vec<String>,

    /// Output vector width
    pub dimensions: usize,
}

impl EmbeddingRequest {
    /// Creates a request with the default width
    pub fn new(texts: Vec<String>) -> Self {
        Self {
            texts,
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }

    fn total_chars(&self) -> usize {
        self.texts.iter().map(|t| t.chars().count()).sum()
    }

    fn total_words(&self) -> usize {
        self.texts.iter().map(|t| t.split_whitespace().count()).sum()
    }
}

/// Tensor operation with its shape payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TensorOperation {
    /// `[m, k] x [k, n]`
    MatMul { m: usize, k: usize, n: usize },

    /// Valid-padding 2D convolution over `[batch, channels, height, width]`
    Convolution {
        batch: usize,
        channels: usize,
        height: usize,
        width: usize,
        kernel_size: usize,
        filters: usize,
    },

    /// Row-wise softmax over `[rows, cols]`
    Softmax { rows: usize, cols: usize },

    /// Scaled dot-product attention over `[batch, heads, seq_len, head_dim]`
    Attention {
        batch: usize,
        heads: usize,
        seq_len: usize,
        head_dim: usize,
    },

    /// Gathers rows of a `[vocab_size, dim]` table
    EmbeddingLookup {
        vocab_size: usize,
        dim: usize,
        token_ids: Vec<u32>,
    },
}

impl TensorOperation {
    /// Operation kind
    pub fn kind(&self) -> OperationKind {
        match self {
            TensorOperation::MatMul { .. } => OperationKind::MatMul,
            TensorOperation::Convolution { .. } => OperationKind::Convolution,
            TensorOperation::Softmax { .. } => OperationKind::Softmax,
            TensorOperation::Attention { .. } => OperationKind::Attention,
            TensorOperation::EmbeddingLookup { .. } => OperationKind::EmbeddingLookup,
        }
    }

    /// Shape of the result tensor
    pub fn output_shape(&self) -> Vec<usize> {
        match self {
            TensorOperation::MatMul { m, n, .. } => vec![*m, *n],
            TensorOperation::Convolution {
                batch,
                height,
                width,
                kernel_size,
                filters,
                ..
            } => vec![
                *batch,
                *filters,
                (height + 1).saturating_sub(*kernel_size),
                (width + 1).saturating_sub(*kernel_size),
            ],
            TensorOperation::Softmax { rows, cols } => vec![*rows, *cols],
            TensorOperation::Attention {
                batch,
                heads,
                seq_len,
                head_dim,
            } => vec![*batch, *heads, *seq_len, *head_dim],
            TensorOperation::EmbeddingLookup { dim, token_ids, .. } => vec![token_ids.len(), *dim],
        }
    }

    /// Number of input elements
    pub fn input_elements(&self) -> u64 {
        let elements = match self {
            TensorOperation::MatMul { m, k, n } => m * k + k * n,
            TensorOperation::Convolution {
                batch,
                channels,
                height,
                width,
                kernel_size,
                filters,
            } => batch * channels * height * width + filters * channels * kernel_size * kernel_size,
            TensorOperation::Softmax { rows, cols } => rows * cols,
            TensorOperation::Attention {
                batch,
                heads,
                seq_len,
                head_dim,
            } => 3 * batch * heads * seq_len * head_dim,
            TensorOperation::EmbeddingLookup {
                vocab_size,
                dim,
                token_ids,
            } => vocab_size * dim + token_ids.len(),
        };
        elements as u64
    }

    fn output_elements(&self) -> u64 {
        self.output_shape().iter().map(|&d| d as u64).product()
    }

    fn work_units(&self) -> u64 {
        match self {
            TensorOperation::MatMul { m, k, n } => 2 * (*m as u64) * (*k as u64) * (*n as u64),
            TensorOperation::Convolution {
                channels,
                kernel_size,
                ..
            } => 2 * self.output_elements() * (*channels as u64) * (*kernel_size as u64).pow(2),
            TensorOperation::Softmax { rows, cols } => 3 * (*rows as u64) * (*cols as u64),
            TensorOperation::Attention {
                batch,
                heads,
                seq_len,
                head_dim,
            } => {
                let per_head = 4 * (*seq_len as u64).pow(2) * (*head_dim as u64) + 3 * (*seq_len as u64).pow(2);
                (*batch as u64) * (*heads as u64) * per_head
            }
            TensorOperation::EmbeddingLookup { dim, token_ids, .. } => (token_ids.len() * dim) as u64,
        }
    }
}

/// A unit of work handed to the dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Operation {
    /// Text generation
    Inference(InferenceRequest),

    /// Text embedding
    TextEmbedding(EmbeddingRequest),

    /// Tensor primitive
    Tensor(TensorOperation),
}

/// Rough token width used when sizing prompts
const CHARS_PER_TOKEN: u64 = 4;

/// Work units charged per generated or consumed token
const WORK_PER_TOKEN: u64 = 200_000;

/// Work units charged per embedded word and output dimension
const WORK_PER_EMBEDDED_WORD_DIM: u64 = 50;

impl Operation {
    /// Operation kind
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Inference(_) => OperationKind::Inference,
            Operation::TextEmbedding(_) => OperationKind::TextEmbedding,
            Operation::Tensor(op) => op.kind(),
        }
    }

    /// Abstract amount of compute, the unit the cost model prices
    pub fn work_units(&self) -> u64 {
        match self {
            Operation::Inference(req) => {
                let prompt_tokens = req.prompt.chars().count() as u64 / CHARS_PER_TOKEN;
                (prompt_tokens + req.max_tokens as u64) * WORK_PER_TOKEN
            }
            Operation::TextEmbedding(req) => {
                (req.total_words().max(req.texts.len()) * req.dimensions) as u64 * WORK_PER_EMBEDDED_WORD_DIM
            }
            Operation::Tensor(op) => op.work_units(),
        }
    }

    /// Bytes touched while executing
    pub fn memory_footprint_bytes(&self) -> u64 {
        match self {
            Operation::Inference(req) => req.prompt.len() as u64 + req.max_tokens as u64 * CHARS_PER_TOKEN,
            Operation::TextEmbedding(req) => {
                req.texts.iter().map(|t| t.len() as u64).sum::<u64>()
                    + (req.texts.len() * req.dimensions * 4) as u64
            }
            Operation::Tensor(op) => 4 * (op.input_elements() + op.output_elements()),
        }
    }

    /// Characters of text input
    pub fn context_chars(&self) -> usize {
        match self {
            Operation::Inference(req) => req.prompt.chars().count(),
            Operation::TextEmbedding(req) => req.total_chars(),
            Operation::Tensor(_) => 0,
        }
    }

    /// Number of tensor input elements
    pub fn tensor_elements(&self) -> u64 {
        match self {
            Operation::Tensor(op) => op.input_elements(),
            _ => 0,
        }
    }
}

/// Result payload of an executed operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationOutput {
    /// Generated text
    Text { text: String, tokens: u32 },

    /// One vector per input text
    Embeddings { vectors: Vec<Vec<f32>> },

    /// Result tensor summary; `checksum` is the element sum when computed
    Tensor { shape: Vec<usize>, checksum: Option<f64> },
}
