//! Compiled artifacts and their binary envelope
//!
//! Envelope layout, little endian:
//!
//! | field          | size |
//! |----------------|------|
//! | magic `ACAR`   | 4    |
//! | version        | 2    |
//! | backend tag    | 1    |
//! | opt level tag  | 1    |
//! | pass bitmask   | 1    |
//! | payload length | 8    |
//! | SHA-256        | 32   |
//! | payload        | n    |

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use accel_common::{Backend, Error, OptimizationLevel, Result};

use crate::metadata::ArtifactMetadata;
use crate::source::{CacheKey, CompilationTarget, ModelSource};

/// Envelope magic bytes
pub const ARTIFACT_MAGIC: &[u8; 4] = b"ACAR";

/// Current envelope version
pub const ARTIFACT_VERSION: u16 = 1;

/// Size of the fixed envelope header
pub const HEADER_LEN: usize = 4 + 2 + 1 + 1 + 1 + 8 + 32;

/// Post-compilation optimization passes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationPass {
    DeadCodeElimination,
    ConstantFolding,
    OperatorFusion,
    MemoryLayout,
    InstructionSelection,
}

impl OptimizationPass {
    /// All passes in application order
    pub const ALL: [OptimizationPass; 5] = [
        OptimizationPass::DeadCodeElimination,
        OptimizationPass::ConstantFolding,
        OptimizationPass::OperatorFusion,
        OptimizationPass::MemoryLayout,
        OptimizationPass::InstructionSelection,
    ];

    /// Bit used in the envelope pass mask
    pub fn bit(&self) -> u8 {
        match self {
            OptimizationPass::DeadCodeElimination => 1 << 0,
            OptimizationPass::ConstantFolding => 1 << 1,
            OptimizationPass::OperatorFusion => 1 << 2,
            OptimizationPass::MemoryLayout => 1 << 3,
            OptimizationPass::InstructionSelection => 1 << 4,
        }
    }

    /// Multiplier applied to the estimated speedup
    pub fn speedup_factor(&self) -> f64 {
        match self {
            OptimizationPass::DeadCodeElimination => 1.03,
            OptimizationPass::ConstantFolding => 1.02,
            OptimizationPass::OperatorFusion => 1.12,
            OptimizationPass::MemoryLayout => 1.05,
            OptimizationPass::InstructionSelection => 1.08,
        }
    }

    /// Multiplier applied to the runtime memory requirement
    pub fn memory_factor(&self) -> f64 {
        match self {
            OptimizationPass::DeadCodeElimination => 0.97,
            OptimizationPass::MemoryLayout => 0.9,
            _ => 1.0,
        }
    }

    /// Decodes a pass mask
    pub fn from_mask(mask: u8) -> Vec<OptimizationPass> {
        Self::ALL.iter().copied().filter(|p| mask & p.bit() != 0).collect()
    }

    /// Encodes a set of passes
    pub fn mask(passes: &[OptimizationPass]) -> u8 {
        passes.iter().fold(0, |mask, p| mask | p.bit())
    }
}

/// Which passes an optimize call should apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationOptions {
    pub dead_code_elimination: bool,
    pub constant_folding: bool,
    pub operator_fusion: bool,
    pub memory_layout: bool,
    pub instruction_selection: bool,
}

impl Default for OptimizationOptions {
    fn default() -> Self {
        Self {
            dead_code_elimination: true,
            constant_folding: true,
            operator_fusion: true,
            memory_layout: true,
            instruction_selection: true,
        }
    }
}

impl OptimizationOptions {
    /// No passes selected
    pub fn none() -> Self {
        Self {
            dead_code_elimination: false,
            constant_folding: false,
            operator_fusion: false,
            memory_layout: false,
            instruction_selection: false,
        }
    }

    /// Selected passes in application order
    pub fn passes(&self) -> Vec<OptimizationPass> {
        let mut passes = Vec::new();
        if self.dead_code_elimination {
            passes.push(OptimizationPass::DeadCodeElimination);
        }
        if self.constant_folding {
            passes.push(OptimizationPass::ConstantFolding);
        }
        if self.operator_fusion {
            passes.push(OptimizationPass::OperatorFusion);
        }
        if self.memory_layout {
            passes.push(OptimizationPass::MemoryLayout);
        }
        if self.instruction_selection {
            passes.push(OptimizationPass::InstructionSelection);
        }
        passes
    }
}

/// Outcome of an artifact integrity check
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// True when no errors were found
    pub valid: bool,

    /// Problems that make the artifact unusable
    pub errors: Vec<String>,

    /// Problems worth reporting that do not block use
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub(crate) fn from_findings(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

/// Decoded envelope header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeHeader {
    pub version: u16,
    pub backend: Backend,
    pub optimization_level: OptimizationLevel,
    pub pass_mask: u8,
    pub payload_len: u64,
    pub digest: [u8; 32],
}

/// Wraps a payload in an artifact envelope
pub fn encode_envelope(
    backend: Backend,
    level: OptimizationLevel,
    pass_mask: u8,
    payload: &[u8],
) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_slice(ARTIFACT_MAGIC);
    buf.put_u16_le(ARTIFACT_VERSION);
    buf.put_u8(backend.tag());
    buf.put_u8(level.tag());
    buf.put_u8(pass_mask);
    buf.put_u64_le(payload.len() as u64);
    buf.put_slice(&Sha256::digest(payload));
    buf.put_slice(payload);
    buf.freeze()
}

/// Reads an envelope header, checking structure but not the digest
pub fn decode_header(binary: &[u8]) -> Result<EnvelopeHeader> {
    if binary.len() < HEADER_LEN {
        return Err(Error::CompileFailed(format!(
            "artifact is {} bytes, shorter than the {} byte header",
            binary.len(),
            HEADER_LEN
        )));
    }
    let mut cursor = binary;
    if &cursor[..4] != ARTIFACT_MAGIC {
        return Err(Error::CompileFailed("artifact magic mismatch".to_string()));
    }
    cursor.advance(4);

    let version = cursor.get_u16_le();
    if version != ARTIFACT_VERSION {
        return Err(Error::CompileFailed(format!("unsupported artifact version {}", version)));
    }
    let backend_tag = cursor.get_u8();
    let backend = Backend::from_tag(backend_tag)
        .ok_or_else(|| Error::CompileFailed(format!("unknown backend tag {}", backend_tag)))?;
    let level_tag = cursor.get_u8();
    let optimization_level = OptimizationLevel::from_tag(level_tag)
        .ok_or_else(|| Error::CompileFailed(format!("unknown optimization level tag {}", level_tag)))?;
    let pass_mask = cursor.get_u8();
    let payload_len = cursor.get_u64_le();
    let mut digest = [0u8; 32];
    cursor.copy_to_slice(&mut digest);

    if cursor.remaining() as u64 != payload_len {
        return Err(Error::CompileFailed(format!(
            "artifact payload is {} bytes, header declares {}",
            cursor.remaining(),
            payload_len
        )));
    }

    Ok(EnvelopeHeader {
        version,
        backend,
        optimization_level,
        pass_mask,
        payload_len,
        digest,
    })
}

/// Payload section of an envelope
pub fn envelope_payload(binary: &[u8]) -> &[u8] {
    binary.get(HEADER_LEN..).unwrap_or(&[])
}

/// Compiled artifact, immutable once produced
#[derive(Debug, Clone, Serialize)]
pub struct CompiledArtifact {
    /// Unique artifact id
    pub id: Uuid,

    /// Cache key the artifact is stored under
    pub key: CacheKey,

    /// Model the artifact was compiled from
    pub source: ModelSource,

    /// Target the artifact was compiled for
    pub target: CompilationTarget,

    /// Envelope bytes
    #[serde(skip)]
    pub binary: Bytes,

    /// Model metadata
    pub metadata: ArtifactMetadata,

    /// Envelope size in bytes
    pub size_bytes: u64,

    /// Estimated speedup over the baseline path
    pub estimated_speedup: f64,

    /// Time spent fetching and compiling
    pub compile_duration: Duration,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Artifact this one was optimized from
    pub derived_from: Option<Uuid>,

    /// Optimization passes applied
    pub applied_passes: Vec<OptimizationPass>,
}

impl CompiledArtifact {
    /// Decoded envelope header
    pub fn header(&self) -> Result<EnvelopeHeader> {
        decode_header(&self.binary)
    }

    /// Model payload carried in the envelope
    pub fn payload(&self) -> &[u8] {
        envelope_payload(&self.binary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_header_fields() {
        let mask = OptimizationPass::mask(&[OptimizationPass::OperatorFusion]);
        let binary = encode_envelope(Backend::ManagedRuntimeA, OptimizationLevel::O3, mask, b"weights");

        assert_eq!(binary.len(), HEADER_LEN + 7);
        let header = decode_header(&binary).unwrap();
        assert_eq!(header.backend, Backend::ManagedRuntimeA);
        assert_eq!(header.optimization_level, OptimizationLevel::O3);
        assert_eq!(OptimizationPass::from_mask(header.pass_mask), vec![OptimizationPass::OperatorFusion]);
        assert_eq!(header.digest.as_slice(), Sha256::digest(b"weights").as_slice());
        assert_eq!(envelope_payload(&binary), b"weights");
    }

    #[test]
    fn test_truncated_envelope_rejected() {
        let binary = encode_envelope(Backend::Native, OptimizationLevel::O2, 0, b"weights");
        assert!(decode_header(&binary[..HEADER_LEN - 1]).is_err());
        assert!(decode_header(&binary[..binary.len() - 1]).is_err());

        let mut bad_magic = binary.to_vec();
        bad_magic[0] = b'X';
        assert!(decode_header(&bad_magic).is_err());
    }

    #[test]
    fn test_options_select_passes() {
        assert_eq!(OptimizationOptions::default().passes().len(), 5);
        assert!(OptimizationOptions::none().passes().is_empty());

        let fusion_only = OptimizationOptions {
            operator_fusion: true,
            ..OptimizationOptions::none()
        };
        assert_eq!(fusion_only.passes(), vec![OptimizationPass::OperatorFusion]);
    }
}
