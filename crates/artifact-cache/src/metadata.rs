//! Model metadata extraction
//!
//! safetensors headers are parsed exactly. GGUF files are sniffed for their
//! header counters and sized by payload length. Other formats fall back to a
//! size-based estimate assuming fp32 weights.

use std::collections::HashMap;

use bytes::Buf;
use serde::{Deserialize, Serialize};
use tracing::debug;

use accel_common::{Error, QuantizationType, Result};

use crate::source::SourceKind;

/// Sequence length assumed when a format carries no shape information
pub const DEFAULT_SEQUENCE_LENGTH: usize = 512;

/// Runtime memory overhead applied on top of raw weight bytes (20%)
const MEMORY_OVERHEAD: f64 = 1.2;

const GGUF_MAGIC: &[u8; 4] = b"GGUF";

/// Facts about the model an artifact was compiled from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Total number of parameters
    pub parameter_count: u64,

    /// Input tensor shapes
    pub input_shapes: Vec<Vec<usize>>,

    /// Output tensor shapes
    pub output_shapes: Vec<Vec<usize>>,

    /// Memory required to hold the model at runtime
    pub memory_requirement_bytes: u64,

    /// Format the model was read from
    pub source_format: SourceKind,

    /// Number of tensors, when the format exposes it
    pub tensor_count: Option<u64>,

    /// Whether counts were read from headers rather than estimated
    pub exact: bool,
}

#[derive(Debug, Deserialize)]
struct SafetensorsEntry {
    dtype: String,
    shape: Vec<usize>,
    data_offsets: [u64; 2],
}

/// Extracts metadata from a fetched model payload
pub fn extract_metadata(
    kind: SourceKind,
    payload: &[u8],
    quantization: Option<QuantizationType>,
) -> Result<ArtifactMetadata> {
    if payload.is_empty() {
        return Err(Error::CompileFailed("model payload is empty".to_string()));
    }

    let metadata = match kind {
        SourceKind::Safetensors => parse_safetensors(payload, quantization)?,
        SourceKind::Gguf => parse_gguf(payload, quantization)?,
        SourceKind::Onnx | SourceKind::HostedHub => estimate(kind, payload.len() as u64, 4.0, quantization, None),
    };

    debug!(
        "Extracted {} metadata: {} parameters, {} bytes required",
        kind, metadata.parameter_count, metadata.memory_requirement_bytes
    );
    Ok(metadata)
}

fn dtype_size(dtype: &str) -> Option<u64> {
    match dtype {
        "F64" | "I64" | "U64" => Some(8),
        "F32" | "I32" | "U32" => Some(4),
        "F16" | "BF16" | "I16" | "U16" => Some(2),
        "I8" | "U8" | "BOOL" | "F8_E4M3" | "F8_E5M2" => Some(1),
        _ => None,
    }
}

fn parse_safetensors(payload: &[u8], quantization: Option<QuantizationType>) -> Result<ArtifactMetadata> {
    let mut cursor = payload;
    if cursor.remaining() < 8 {
        return Err(Error::CompileFailed(
            "safetensors payload is shorter than its length prefix".to_string(),
        ));
    }
    let header_len = cursor.get_u64_le();
    if header_len > cursor.remaining() as u64 {
        return Err(Error::CompileFailed(format!(
            "safetensors header length {} exceeds payload",
            header_len
        )));
    }

    let header: HashMap<String, serde_json::Value> = serde_json::from_slice(&cursor[..header_len as usize])
        .map_err(|e| Error::CompileFailed(format!("invalid safetensors header: {}", e)))?;

    let mut tensors = Vec::with_capacity(header.len());
    for (name, value) in header {
        if name == "__metadata__" {
            continue;
        }
        let entry: SafetensorsEntry = serde_json::from_value(value)
            .map_err(|e| Error::CompileFailed(format!("invalid tensor entry '{}': {}", name, e)))?;
        tensors.push(entry);
    }
    if tensors.is_empty() {
        return Err(Error::CompileFailed("safetensors header lists no tensors".to_string()));
    }
    tensors.sort_by_key(|t| t.data_offsets[0]);

    let mut parameter_count = 0u64;
    let mut weight_bytes = 0u64;
    for tensor in &tensors {
        let elements: u64 = tensor.shape.iter().map(|&d| d as u64).product();
        let size = dtype_size(&tensor.dtype).ok_or_else(|| {
            Error::CompileFailed(format!("unsupported safetensors dtype {}", tensor.dtype))
        })?;
        parameter_count += elements;
        weight_bytes += elements * size;
    }

    let memory = match quantization {
        Some(q) => parameter_count as f64 * q.bytes_per_param(),
        None => weight_bytes as f64,
    };

    let first = &tensors[0];
    let last = &tensors[tensors.len() - 1];
    let input_width = first.shape.last().copied().unwrap_or(1).max(1);
    let output_width = last.shape.first().copied().unwrap_or(1).max(1);

    Ok(ArtifactMetadata {
        parameter_count,
        input_shapes: vec![vec![1, input_width]],
        output_shapes: vec![vec![1, output_width]],
        memory_requirement_bytes: (memory * MEMORY_OVERHEAD).ceil() as u64,
        source_format: SourceKind::Safetensors,
        tensor_count: Some(tensors.len() as u64),
        exact: true,
    })
}

fn parse_gguf(payload: &[u8], quantization: Option<QuantizationType>) -> Result<ArtifactMetadata> {
    let mut cursor = payload;
    if cursor.remaining() < 8 || &cursor[..4] != GGUF_MAGIC {
        return Err(Error::CompileFailed("payload is not a GGUF file".to_string()));
    }
    cursor.advance(4);
    let version = cursor.get_u32_le();

    // Version 1 used 32-bit counters
    let tensor_count = match version {
        1 if cursor.remaining() >= 4 => Some(cursor.get_u32_le() as u64),
        v if v >= 2 && cursor.remaining() >= 8 => Some(cursor.get_u64_le()),
        _ => None,
    };

    // GGUF weights are usually stored half precision or below
    Ok(estimate(SourceKind::Gguf, payload.len() as u64, 2.0, quantization, tensor_count))
}

fn estimate(
    kind: SourceKind,
    payload_len: u64,
    stored_bytes_per_param: f64,
    quantization: Option<QuantizationType>,
    tensor_count: Option<u64>,
) -> ArtifactMetadata {
    let parameter_count = ((payload_len as f64 / stored_bytes_per_param).ceil() as u64).max(1);
    let bytes_per_param = quantization
        .map(|q| q.bytes_per_param())
        .unwrap_or(stored_bytes_per_param);
    let memory = parameter_count as f64 * bytes_per_param * MEMORY_OVERHEAD;

    ArtifactMetadata {
        parameter_count,
        input_shapes: vec![vec![1, DEFAULT_SEQUENCE_LENGTH]],
        output_shapes: vec![vec![1, DEFAULT_SEQUENCE_LENGTH]],
        memory_requirement_bytes: memory.ceil() as u64,
        source_format: kind,
        tensor_count,
        exact: false,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds a minimal safetensors file with the given `(name, dtype, shape)` tensors
    pub(crate) fn safetensors_fixture(tensors: &[(&str, &str, Vec<usize>)]) -> Vec<u8> {
        let mut header = serde_json::Map::new();
        let mut offset = 0u64;
        for (name, dtype, shape) in tensors {
            let elements: u64 = shape.iter().map(|&d| d as u64).product();
            let end = offset + elements * dtype_size(dtype).unwrap();
            header.insert(
                name.to_string(),
                serde_json::json!({ "dtype": dtype, "shape": shape, "data_offsets": [offset, end] }),
            );
            offset = end;
        }
        header.insert("__metadata__".to_string(), serde_json::json!({ "format": "pt" }));

        let header = serde_json::to_vec(&header).unwrap();
        let mut file = (header.len() as u64).to_le_bytes().to_vec();
        file.extend_from_slice(&header);
        file.resize(file.len() + offset as usize, 0);
        file
    }

    #[test]
    fn test_safetensors_counts_are_exact() {
        let file = safetensors_fixture(&[
            ("embed.weight", "F32", vec![100, 16]),
            ("head.weight", "F16", vec![10, 16]),
        ]);

        let meta = extract_metadata(SourceKind::Safetensors, &file, None).unwrap();
        assert!(meta.exact);
        assert_eq!(meta.parameter_count, 1600 + 160);
        assert_eq!(meta.tensor_count, Some(2));
        assert_eq!(meta.input_shapes, vec![vec![1, 16]]);
        assert_eq!(meta.output_shapes, vec![vec![1, 10]]);
        // (1600 * 4 + 160 * 2) * 1.2
        assert_eq!(meta.memory_requirement_bytes, 8064);
    }

    #[test]
    fn test_safetensors_quantization_shrinks_memory() {
        let file = safetensors_fixture(&[("w", "F32", vec![1000])]);
        let full = extract_metadata(SourceKind::Safetensors, &file, None).unwrap();
        let int8 = extract_metadata(SourceKind::Safetensors, &file, Some(QuantizationType::Int8)).unwrap();
        assert!(int8.memory_requirement_bytes < full.memory_requirement_bytes);
    }

    #[test]
    fn test_safetensors_rejects_bad_header() {
        let mut file = (10_000u64).to_le_bytes().to_vec();
        file.extend_from_slice(b"{}");
        let err = extract_metadata(SourceKind::Safetensors, &file, None).unwrap_err();
        assert!(matches!(err, Error::CompileFailed(_)));

        let empty = safetensors_fixture(&[]);
        assert!(extract_metadata(SourceKind::Safetensors, &empty, None).is_err());
    }

    #[test]
    fn test_gguf_sniffing() {
        let mut file = b"GGUF".to_vec();
        file.extend_from_slice(&3u32.to_le_bytes());
        file.extend_from_slice(&7u64.to_le_bytes());
        file.extend_from_slice(&2u64.to_le_bytes());
        file.resize(4096, 0);

        let meta = extract_metadata(SourceKind::Gguf, &file, None).unwrap();
        assert!(!meta.exact);
        assert_eq!(meta.tensor_count, Some(7));
        assert_eq!(meta.parameter_count, 2048);

        let err = extract_metadata(SourceKind::Gguf, b"NOPE0000", None).unwrap_err();
        assert!(matches!(err, Error::CompileFailed(_)));
    }

    #[test]
    fn test_empty_payload_fails() {
        assert!(extract_metadata(SourceKind::Onnx, &[], None).is_err());
    }
}
