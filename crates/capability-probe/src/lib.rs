//! Host capability detection for the acceleration runtime
//!
//! This crate inspects the host once and produces an immutable
//! [`CapabilityDescriptor`] describing SIMD, threading, bulk-memory support,
//! the memory ceiling and the backends that can run here.

pub mod descriptor;
pub mod inspector;
pub mod probe;

// Re-export commonly used types
pub use descriptor::CapabilityDescriptor;
pub use inspector::{HostInspector, SystemInspector};
pub use probe::CapabilityProbe;
