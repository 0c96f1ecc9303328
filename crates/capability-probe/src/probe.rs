//! Capability probe
//!
//! Detection must never be fatal: a check that errors or panics is logged
//! and treated as unsupported.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{info, warn};

use accel_common::utils::format_bytes;
use accel_common::{Backend, Result};

use crate::descriptor::{backend_available, CapabilityDescriptor};
use crate::inspector::{HostInspector, SystemInspector};

/// Memory ceiling assumed when the host refuses to report one
pub const FALLBACK_MEMORY_BYTES: u64 = 1024 * 1024 * 1024;

/// Produces [`CapabilityDescriptor`]s
///
/// Detection is cheap but not free; callers should keep the descriptor
/// rather than probing per dispatch.
pub struct CapabilityProbe {
    /// Host inspector
    inspector: Arc<dyn HostInspector>,

    /// Whether the custom backend may be advertised
    custom_backend: bool,
}

impl CapabilityProbe {
    /// Creates a probe over the running system
    pub fn new() -> Self {
        Self::with_inspector(Arc::new(SystemInspector::new()))
    }

    /// Creates a probe over an arbitrary inspector
    pub fn with_inspector(inspector: Arc<dyn HostInspector>) -> Self {
        Self {
            inspector,
            custom_backend: false,
        }
    }

    /// Advertises the custom backend as usable
    pub fn enable_custom_backend(mut self, enabled: bool) -> Self {
        self.custom_backend = enabled;
        self
    }

    /// Inspects the host
    pub fn detect(&self) -> CapabilityDescriptor {
        let inspector = &self.inspector;

        let simd = guarded("simd", false, || inspector.simd());
        let threading = guarded("threading", false, || inspector.threading());
        let bulk_memory = guarded("bulk_memory", false, || inspector.bulk_memory());
        let max_memory_bytes =
            guarded("total_memory", FALLBACK_MEMORY_BYTES, || inspector.total_memory_bytes());
        let logical_cores = guarded("logical_cores", 1, || inspector.logical_cores()).max(1);
        let cpu_model = guarded("cpu_model", String::new(), || inspector.cpu_model());

        let available_backends = Backend::ALL
            .iter()
            .copied()
            .filter(|&b| backend_available(b, simd, threading, self.custom_backend))
            .collect();

        let descriptor = CapabilityDescriptor {
            simd,
            threading,
            bulk_memory,
            max_memory_bytes,
            available_backends,
            logical_cores,
            cpu_model,
        };

        info!(
            simd,
            threading,
            bulk_memory,
            max_memory = %format_bytes(max_memory_bytes),
            backends = ?descriptor.available_backends,
            "Host capabilities detected"
        );

        descriptor
    }
}

impl Default for CapabilityProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs one check, mapping errors and panics to `default`
fn guarded<T, F>(name: &str, default: T, check: F) -> T
where
    F: FnOnce() -> Result<T>,
{
    match panic::catch_unwind(AssertUnwindSafe(check)) {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => {
            warn!(check = name, error = %e, "Capability check failed; assuming unsupported");
            default
        }
        Err(_) => {
            warn!(check = name, "Capability check panicked; assuming unsupported");
            default
        }
    }
}
