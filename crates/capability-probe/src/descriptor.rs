//! Capability descriptor

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use accel_common::Backend;

/// Immutable snapshot of what the host supports
///
/// Produced once by [`crate::CapabilityProbe`] and shared behind an `Arc`;
/// nothing mutates it afterwards. Derivations such as [`with_simd`] return
/// a new descriptor.
///
/// [`with_simd`]: CapabilityDescriptor::with_simd
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// SIMD instructions usable
    pub simd: bool,

    /// More than one hardware thread usable
    pub threading: bool,

    /// Bulk memory copy/fill instructions usable
    pub bulk_memory: bool,

    /// Largest addressable memory in bytes
    pub max_memory_bytes: u64,

    /// Backends that can execute on this host
    pub available_backends: BTreeSet<Backend>,

    /// Logical cores
    pub logical_cores: usize,

    /// CPU brand string, empty when unknown
    pub cpu_model: String,
}

impl CapabilityDescriptor {
    /// Creates a descriptor from explicit values
    pub fn new(
        simd: bool,
        threading: bool,
        bulk_memory: bool,
        max_memory_bytes: u64,
        available_backends: impl IntoIterator<Item = Backend>,
    ) -> Self {
        Self {
            simd,
            threading,
            bulk_memory,
            max_memory_bytes,
            available_backends: available_backends.into_iter().collect(),
            logical_cores: if threading { 2 } else { 1 },
            cpu_model: String::new(),
        }
    }

    /// Returns true when the backend can execute on this host
    pub fn supports_backend(&self, backend: Backend) -> bool {
        self.available_backends.contains(&backend)
    }

    /// Derives a sibling descriptor with SIMD forced on or off
    ///
    /// Backend availability is carried over unchanged.
    pub fn with_simd(&self, simd: bool) -> Self {
        Self {
            simd,
            ..self.clone()
        }
    }

    /// Memory ceiling in MiB
    pub fn max_memory_mb(&self) -> u64 {
        self.max_memory_bytes / (1024 * 1024)
    }
}

/// Decides whether a backend can run given host features
pub fn backend_available(backend: Backend, simd: bool, threading: bool, custom_enabled: bool) -> bool {
    match backend {
        Backend::Native => true,
        Backend::ManagedRuntimeA => simd,
        Backend::ManagedRuntimeB => threading,
        Backend::Custom => custom_enabled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_simd_leaves_original_untouched() {
        let original = CapabilityDescriptor::new(true, true, true, 1 << 30, Backend::ALL);
        let derived = original.with_simd(false);

        assert!(original.simd);
        assert!(!derived.simd);
        assert_eq!(original.available_backends, derived.available_backends);
        assert_eq!(original.max_memory_mb(), 1024);
    }

    #[test]
    fn test_backend_requirements() {
        assert!(backend_available(Backend::Native, false, false, false));
        assert!(!backend_available(Backend::ManagedRuntimeA, false, true, false));
        assert!(backend_available(Backend::ManagedRuntimeA, true, false, false));
        assert!(!backend_available(Backend::ManagedRuntimeB, true, false, false));
        assert!(!backend_available(Backend::Custom, true, true, false));
        assert!(backend_available(Backend::Custom, false, false, true));
    }
}
