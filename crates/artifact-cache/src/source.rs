//! Model sources, compilation targets and cache keys

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use accel_common::{Backend, OptimizationLevel, QuantizationType};

/// Where a model's weights come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Model hub repository
    HostedHub,
    /// GGUF weights file
    Gguf,
    /// ONNX graph
    Onnx,
    /// safetensors weights file
    Safetensors,
}

impl SourceKind {
    /// Guesses the kind from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "gguf" => Some(SourceKind::Gguf),
            "onnx" => Some(SourceKind::Onnx),
            "safetensors" => Some(SourceKind::Safetensors),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::HostedHub => write!(f, "hosted-hub"),
            SourceKind::Gguf => write!(f, "gguf"),
            SourceKind::Onnx => write!(f, "onnx"),
            SourceKind::Safetensors => write!(f, "safetensors"),
        }
    }
}

/// Model origin descriptor
///
/// The credential never takes part in identity and is not serialized.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSource {
    /// Origin type
    pub kind: SourceKind,

    /// Path, URL or repository id
    pub location: String,

    /// Access credential for the origin
    #[serde(skip_serializing, default)]
    pub credential: Option<String>,
}

impl ModelSource {
    /// Creates a source without credential
    pub fn new(kind: SourceKind, location: impl Into<String>) -> Self {
        Self {
            kind,
            location: location.into(),
            credential: None,
        }
    }

    /// Attaches a credential
    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    fn identity(&self) -> String {
        format!("{}|{}", self.kind, self.location)
    }
}

impl fmt::Debug for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSource")
            .field("kind", &self.kind)
            .field("location", &self.location)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// What an artifact is compiled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompilationTarget {
    /// Backend the artifact runs on
    pub backend: Backend,

    /// Optimization level
    pub optimization_level: OptimizationLevel,

    /// Weight quantization, if any
    pub quantization: Option<QuantizationType>,
}

impl CompilationTarget {
    /// Creates an unquantized target
    pub fn new(backend: Backend, optimization_level: OptimizationLevel) -> Self {
        Self {
            backend,
            optimization_level,
            quantization: None,
        }
    }

    /// Sets the quantization
    pub fn quantized(mut self, quantization: QuantizationType) -> Self {
        self.quantization = Some(quantization);
        self
    }

    fn identity(&self) -> String {
        let quant = self
            .quantization
            .map(|q| q.to_string())
            .unwrap_or_else(|| "none".to_string());
        format!("{}|{}|{}", self.backend, self.optimization_level, quant)
    }
}

/// Content-derived cache key: `hash(source) + hash(target)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for a source/target pair
    pub fn new(source: &ModelSource, target: &CompilationTarget) -> Self {
        let source_digest = hex::encode(Sha256::digest(source.identity().as_bytes()));
        let target_digest = hex::encode(Sha256::digest(target.identity().as_bytes()));
        CacheKey(format!("{}:{}", source_digest, target_digest))
    }

    /// Key of an optimized derivative of this entry
    pub fn derived(&self, pass_mask: u8) -> Self {
        CacheKey(format!("{}+{:02x}", self.0, pass_mask))
    }

    /// Key as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable
        write!(f, "{}", &self.0[..self.0.len().min(16)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ignores_credential() {
        let target = CompilationTarget::new(Backend::Native, OptimizationLevel::O2);
        let plain = ModelSource::new(SourceKind::Gguf, "/models/a.gguf");
        let secret = plain.clone().with_credential("hunter2");

        assert_eq!(CacheKey::new(&plain, &target), CacheKey::new(&secret, &target));
    }

    #[test]
    fn test_key_distinguishes_targets() {
        let source = ModelSource::new(SourceKind::Onnx, "/models/b.onnx");
        let o2 = CompilationTarget::new(Backend::Native, OptimizationLevel::O2);
        let o3 = CompilationTarget::new(Backend::Native, OptimizationLevel::O3);
        let int8 = o2.quantized(QuantizationType::Int8);

        let keys = [
            CacheKey::new(&source, &o2),
            CacheKey::new(&source, &o3),
            CacheKey::new(&source, &int8),
        ];
        assert_ne!(keys[0], keys[1]);
        assert_ne!(keys[0], keys[2]);
        assert_ne!(keys[0].derived(0x03), keys[0]);
    }

    #[test]
    fn test_debug_redacts_credential() {
        let source = ModelSource::new(SourceKind::HostedHub, "org/model").with_credential("hf_secret");
        let rendered = format!("{:?}", source);
        assert!(!rendered.contains("hf_secret"));
        assert!(rendered.contains("<redacted>"));

        let json = serde_json::to_string(&source).unwrap();
        assert!(!json.contains("hf_secret"));
    }

    #[test]
    fn test_kind_from_path() {
        assert_eq!(SourceKind::from_path(Path::new("m.GGUF")), Some(SourceKind::Gguf));
        assert_eq!(SourceKind::from_path(Path::new("m.safetensors")), Some(SourceKind::Safetensors));
        assert_eq!(SourceKind::from_path(Path::new("m.bin")), None);
    }
}
