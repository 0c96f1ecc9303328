//! Fetch and compile collaborators used by the artifact cache

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tracing::debug;

use accel_common::{Backend, Error, Result};

use crate::artifact::encode_envelope;
use crate::metadata::ArtifactMetadata;
use crate::source::{CompilationTarget, ModelSource, SourceKind};

/// Retrieves raw model bytes for a source
#[async_trait]
pub trait ModelFetcher: Send + Sync {
    /// Fetches the model payload
    async fn fetch(&self, source: &ModelSource) -> Result<Bytes>;
}

/// Turns model bytes into an artifact binary for a target
#[async_trait]
pub trait ArtifactCompiler: Send + Sync {
    /// Compiles a payload
    async fn compile(
        &self,
        target: &CompilationTarget,
        payload: Bytes,
        metadata: &ArtifactMetadata,
    ) -> Result<Bytes>;
}

/// Reads model files from the local filesystem
///
/// Hosted hub sources resolve under an optional mirror directory.
#[derive(Debug, Clone, Default)]
pub struct FileFetcher {
    hub_mirror: Option<PathBuf>,
}

impl FileFetcher {
    /// Creates a fetcher without a hub mirror
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves hosted hub sources as `<mirror>/<repository id>`
    pub fn with_hub_mirror(mut self, dir: impl Into<PathBuf>) -> Self {
        self.hub_mirror = Some(dir.into());
        self
    }

    fn resolve(&self, source: &ModelSource) -> Result<PathBuf> {
        match (source.kind, &self.hub_mirror) {
            (SourceKind::HostedHub, Some(mirror)) => Ok(mirror.join(&source.location)),
            (SourceKind::HostedHub, None) => Err(Error::NotFound(format!(
                "no hub mirror configured for {}",
                source.location
            ))),
            _ => Ok(PathBuf::from(&source.location)),
        }
    }
}

#[async_trait]
impl ModelFetcher for FileFetcher {
    async fn fetch(&self, source: &ModelSource) -> Result<Bytes> {
        let path = self.resolve(source)?;
        debug!("Reading model from {}", path.display());
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("model file {}", path.display())))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Serves model payloads registered in memory, keyed by location
#[derive(Debug, Default)]
pub struct InMemoryFetcher {
    models: DashMap<String, Bytes>,
}

impl InMemoryFetcher {
    /// Creates an empty fetcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a payload under a location
    pub fn insert(&self, location: impl Into<String>, payload: impl Into<Bytes>) {
        self.models.insert(location.into(), payload.into());
    }
}

#[async_trait]
impl ModelFetcher for InMemoryFetcher {
    async fn fetch(&self, source: &ModelSource) -> Result<Bytes> {
        self.models
            .get(&source.location)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::NotFound(format!("model {}", source.location)))
    }
}

/// Wraps the payload in an artifact envelope for the target backend
///
/// Digesting large payloads runs on the blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeCompiler;

#[async_trait]
impl ArtifactCompiler for EnvelopeCompiler {
    async fn compile(
        &self,
        target: &CompilationTarget,
        payload: Bytes,
        _metadata: &ArtifactMetadata,
    ) -> Result<Bytes> {
        let backend = target.backend;
        let level = target.optimization_level;
        tokio::task::spawn_blocking(move || encode_envelope(backend, level, 0, &payload))
            .await
            .map_err(|e| Error::CompileFailed(format!("envelope task failed: {}", e)))
    }
}

/// Base speedup over the baseline path for each backend
pub fn backend_base_speedup(backend: Backend) -> f64 {
    match backend {
        Backend::Native => 3.0,
        Backend::ManagedRuntimeA => 2.2,
        Backend::ManagedRuntimeB => 1.8,
        Backend::Custom => 1.5,
    }
}

/// Heuristic speedup of an artifact compiled for `target`
pub fn estimate_artifact_speedup(target: &CompilationTarget) -> f64 {
    let quantization = target.quantization.map(|q| q.speedup_factor()).unwrap_or(1.0);
    backend_base_speedup(target.backend) * target.optimization_level.speedup_factor() * quantization
}
