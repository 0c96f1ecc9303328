//! Capability interface implemented by every accelerated backend

use std::sync::Arc;

use async_trait::async_trait;

use accel_common::{Backend, OperationKind, Result};
use artifact_cache::CompiledArtifact;

use crate::operation::{Operation, OperationOutput};

/// Accelerated execution provider
///
/// The dispatcher only ever holds backends behind this trait.
#[async_trait]
pub trait AccelerationBackend: Send + Sync {
    /// Which backend this is
    fn backend(&self) -> Backend;

    /// Returns true if the backend can execute the operation kind
    fn supports(&self, kind: OperationKind) -> bool;

    /// Executes an operation
    async fn execute(&self, op: &Operation) -> Result<OperationOutput>;

    /// Makes a compiled artifact resident
    async fn load_artifact(&self, artifact: Arc<CompiledArtifact>) -> Result<()>;

    /// Releases backend handles; later calls must fail
    async fn dispose(&self) -> Result<()>;
}
