//! Host inspection
//!
//! [`HostInspector`] is the seam between the probe and the machine. Each
//! check is fallible on its own so the probe can degrade one capability
//! without losing the rest.

use sysinfo::{System, SystemExt};

use accel_common::{Error, Result};

/// Individual host capability checks
pub trait HostInspector: Send + Sync {
    /// SIMD instructions usable
    fn simd(&self) -> Result<bool>;

    /// More than one hardware thread usable
    fn threading(&self) -> Result<bool>;

    /// Bulk memory copy/fill instructions usable
    fn bulk_memory(&self) -> Result<bool>;

    /// Total physical memory in bytes
    fn total_memory_bytes(&self) -> Result<u64>;

    /// Logical cores
    fn logical_cores(&self) -> Result<usize>;

    /// CPU brand string
    fn cpu_model(&self) -> Result<String>;
}

/// Inspects the machine the process runs on
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemInspector;

impl SystemInspector {
    /// Creates a new system inspector
    pub fn new() -> Self {
        Self
    }
}

impl HostInspector for SystemInspector {
    fn simd(&self) -> Result<bool> {
        #[cfg(target_arch = "x86_64")]
        {
            Ok(is_x86_feature_detected!("avx2") || is_x86_feature_detected!("sse4.1"))
        }

        #[cfg(target_arch = "aarch64")]
        {
            Ok(std::arch::is_aarch64_feature_detected!("neon"))
        }

        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            Ok(false)
        }
    }

    fn threading(&self) -> Result<bool> {
        Ok(num_cpus::get() > 1)
    }

    fn bulk_memory(&self) -> Result<bool> {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        {
            let cpuid = raw_cpuid::CpuId::new();
            Ok(cpuid
                .get_extended_feature_info()
                .map_or(false, |features| features.has_rep_movsb_stosb()))
        }

        #[cfg(target_arch = "aarch64")]
        {
            Ok(true)
        }

        #[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
        {
            Ok(false)
        }
    }

    fn total_memory_bytes(&self) -> Result<u64> {
        let mut system = System::new();
        system.refresh_memory();
        match system.total_memory() {
            0 => Err(Error::InitFailed("host reported zero total memory".into())),
            bytes => Ok(bytes),
        }
    }

    fn logical_cores(&self) -> Result<usize> {
        Ok(num_cpus::get())
    }

    fn cpu_model(&self) -> Result<String> {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        {
            raw_cpuid::CpuId::new()
                .get_processor_brand_string()
                .map(|brand| brand.as_str().trim().to_string())
                .ok_or_else(|| Error::NotFound("processor brand string".into()))
        }

        #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
        {
            Err(Error::NotFound("processor brand string".into()))
        }
    }
}
