//! Common types for the acceleration runtime
//!
//! This module defines the backend, operation and compilation enums shared
//! by the probe, cache, dispatcher and benchmark crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Accelerated execution provider
///
/// Declaration order is the tie-break priority order used when two
/// backends score equally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// Native machine code
    Native,
    /// First managed runtime (SIMD-oriented)
    ManagedRuntimeA,
    /// Second managed runtime (thread-oriented)
    ManagedRuntimeB,
    /// Caller-supplied provider
    Custom,
}

impl Backend {
    /// All backends in priority order
    pub const ALL: [Backend; 4] = [
        Backend::Native,
        Backend::ManagedRuntimeA,
        Backend::ManagedRuntimeB,
        Backend::Custom,
    ];

    /// Priority rank, lower wins ties
    pub fn priority(&self) -> u8 {
        match self {
            Backend::Native => 0,
            Backend::ManagedRuntimeA => 1,
            Backend::ManagedRuntimeB => 2,
            Backend::Custom => 3,
        }
    }

    /// Stable one-byte tag used in artifact binaries
    pub fn tag(&self) -> u8 {
        self.priority() + 1
    }

    /// Resolves a binary tag back into a backend
    pub fn from_tag(tag: u8) -> Option<Backend> {
        Backend::ALL.iter().copied().find(|b| b.tag() == tag)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Native => write!(f, "native"),
            Backend::ManagedRuntimeA => write!(f, "managed-runtime-a"),
            Backend::ManagedRuntimeB => write!(f, "managed-runtime-b"),
            Backend::Custom => write!(f, "custom"),
        }
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "native" => Ok(Backend::Native),
            "managed-runtime-a" | "runtime-a" => Ok(Backend::ManagedRuntimeA),
            "managed-runtime-b" | "runtime-b" => Ok(Backend::ManagedRuntimeB),
            "custom" => Ok(Backend::Custom),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Kind of unit of work handed to the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Text generation request
    Inference,
    /// Text embedding request
    TextEmbedding,
    /// Matrix multiplication
    MatMul,
    /// 2D convolution
    Convolution,
    /// Row-wise softmax
    Softmax,
    /// Scaled dot-product attention
    Attention,
    /// Embedding table lookup
    EmbeddingLookup,
}

impl OperationKind {
    /// All operation kinds
    pub const ALL: [OperationKind; 7] = [
        OperationKind::Inference,
        OperationKind::TextEmbedding,
        OperationKind::MatMul,
        OperationKind::Convolution,
        OperationKind::Softmax,
        OperationKind::Attention,
        OperationKind::EmbeddingLookup,
    ];

    /// Returns true for tensor operations
    pub fn is_tensor_op(&self) -> bool {
        !matches!(self, OperationKind::Inference | OperationKind::TextEmbedding)
    }

    /// Returns true for kinds whose throughput scales with SIMD width
    pub fn benefits_from_simd(&self) -> bool {
        self.is_tensor_op() || matches!(self, OperationKind::Inference)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Inference => "inference",
            OperationKind::TextEmbedding => "text_embedding",
            OperationKind::MatMul => "matmul",
            OperationKind::Convolution => "convolution",
            OperationKind::Softmax => "softmax",
            OperationKind::Attention => "attention",
            OperationKind::EmbeddingLookup => "embedding_lookup",
        };
        write!(f, "{}", name)
    }
}

/// Compiler optimization level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptimizationLevel {
    /// No optimization
    O0,
    /// Basic optimization
    O1,
    /// Standard optimization
    O2,
    /// Aggressive optimization
    O3,
    /// Optimize for size
    Os,
}

impl OptimizationLevel {
    /// Stable one-byte tag used in artifact binaries
    pub fn tag(&self) -> u8 {
        match self {
            OptimizationLevel::O0 => 0,
            OptimizationLevel::O1 => 1,
            OptimizationLevel::O2 => 2,
            OptimizationLevel::O3 => 3,
            OptimizationLevel::Os => 4,
        }
    }

    /// Resolves a binary tag back into a level
    pub fn from_tag(tag: u8) -> Option<OptimizationLevel> {
        match tag {
            0 => Some(OptimizationLevel::O0),
            1 => Some(OptimizationLevel::O1),
            2 => Some(OptimizationLevel::O2),
            3 => Some(OptimizationLevel::O3),
            4 => Some(OptimizationLevel::Os),
            _ => None,
        }
    }

    /// Heuristic throughput multiplier contributed by the level
    pub fn speedup_factor(&self) -> f64 {
        match self {
            OptimizationLevel::O0 => 1.0,
            OptimizationLevel::O1 => 1.15,
            OptimizationLevel::O2 => 1.3,
            OptimizationLevel::O3 => 1.45,
            OptimizationLevel::Os => 1.1,
        }
    }
}

impl Default for OptimizationLevel {
    fn default() -> Self {
        OptimizationLevel::O2
    }
}

impl fmt::Display for OptimizationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationLevel::O0 => write!(f, "O0"),
            OptimizationLevel::O1 => write!(f, "O1"),
            OptimizationLevel::O2 => write!(f, "O2"),
            OptimizationLevel::O3 => write!(f, "O3"),
            OptimizationLevel::Os => write!(f, "Os"),
        }
    }
}

impl FromStr for OptimizationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "o0" | "0" | "none" => Ok(OptimizationLevel::O0),
            "o1" | "1" | "basic" => Ok(OptimizationLevel::O1),
            "o2" | "2" | "standard" => Ok(OptimizationLevel::O2),
            "o3" | "3" | "aggressive" => Ok(OptimizationLevel::O3),
            "os" | "s" | "size" => Ok(OptimizationLevel::Os),
            _ => Err(format!("Unknown optimization level: {}", s)),
        }
    }
}

/// Weight quantization applied while compiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantizationType {
    /// Half precision floats
    F16,
    /// 8-bit integers
    Int8,
    /// 4-bit integers
    Int4,
}

impl QuantizationType {
    /// Bytes per parameter after quantization
    pub fn bytes_per_param(&self) -> f64 {
        match self {
            QuantizationType::F16 => 2.0,
            QuantizationType::Int8 => 1.0,
            QuantizationType::Int4 => 0.5,
        }
    }

    /// Heuristic throughput multiplier contributed by quantization
    pub fn speedup_factor(&self) -> f64 {
        match self {
            QuantizationType::F16 => 1.1,
            QuantizationType::Int8 => 1.2,
            QuantizationType::Int4 => 1.4,
        }
    }
}

impl fmt::Display for QuantizationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuantizationType::F16 => write!(f, "f16"),
            QuantizationType::Int8 => write!(f, "int8"),
            QuantizationType::Int4 => write!(f, "int4"),
        }
    }
}

impl FromStr for QuantizationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "f16" | "fp16" => Ok(QuantizationType::F16),
            "int8" | "q8" => Ok(QuantizationType::Int8),
            "int4" | "q4" => Ok(QuantizationType::Int4),
            _ => Err(format!("Unknown quantization: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_round_trip_through_str() {
        for backend in Backend::ALL {
            assert_eq!(backend.to_string().parse::<Backend>(), Ok(backend));
            assert_eq!(Backend::from_tag(backend.tag()), Some(backend));
        }
        assert!("gpu".parse::<Backend>().is_err());
        assert_eq!(Backend::from_tag(0), None);
    }

    #[test]
    fn test_backend_priority_follows_declaration_order() {
        let mut sorted = Backend::ALL.to_vec();
        sorted.sort_by_key(|b| b.priority());
        assert_eq!(sorted, Backend::ALL.to_vec());
        assert!(Backend::Native < Backend::Custom);
    }

    #[test]
    fn test_operation_kind_classification() {
        assert!(!OperationKind::Inference.is_tensor_op());
        assert!(!OperationKind::TextEmbedding.is_tensor_op());
        assert!(OperationKind::MatMul.is_tensor_op());
        assert!(OperationKind::Inference.benefits_from_simd());
        assert!(!OperationKind::TextEmbedding.benefits_from_simd());
    }

    #[test]
    fn test_backend_serde_names() {
        let json = serde_json::to_string(&Backend::ManagedRuntimeA).unwrap();
        assert_eq!(json, "\"managed-runtime-a\"");
        let level: OptimizationLevel = serde_json::from_str("\"O3\"").unwrap();
        assert_eq!(level, OptimizationLevel::O3);
        assert_eq!("size".parse::<OptimizationLevel>(), Ok(OptimizationLevel::Os));
    }
}
