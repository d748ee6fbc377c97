//! Backend seam: the bundle of platform pieces a session is built from.
//!
//! A backend supplies the codec engine, creates GPU devices bound to an
//! adapter, and enumerates adapters per vendor for the capability probe.
//! Platform implementations live outside this crate; the C ABI layer reaches
//! its backend through a process-wide registry installed once by the host.

use crate::common::{AdapterDesc, AdapterVendor, Luid, RawDeviceHandle};
use crate::device::GpuDevice;
use crate::engine::CodecEngine;
use crate::error::NativeError;
use log::error;
use std::sync::{Arc, OnceLock};

/// Everything a decoder session needs from the platform.
pub trait Backend: Send + Sync {
    /// The codec engine shared by all sessions on this backend.
    fn codec_engine(&self) -> Arc<dyn CodecEngine>;

    /// Create a native GPU device. When `existing` is non-null the device
    /// wraps it instead of creating a new one from `luid`. `pool_capacity`
    /// sizes the output-texture ring.
    fn create_device(
        &self,
        existing: RawDeviceHandle,
        luid: Luid,
        pool_capacity: usize,
    ) -> Result<Box<dyn GpuDevice>, NativeError>;

    /// All adapters of one vendor present on this host. An empty list is a
    /// valid answer.
    fn enumerate_adapters(&self, vendor: AdapterVendor) -> Vec<AdapterDesc>;
}

static BACKEND: OnceLock<Arc<dyn Backend>> = OnceLock::new();

/// Install the process-wide backend used by the C ABI entry points. Only the
/// first installation wins; later calls return the rejected backend.
pub fn install_backend(backend: Arc<dyn Backend>) -> Result<(), Arc<dyn Backend>> {
    BACKEND.set(backend)
}

/// The installed backend, if any.
pub fn installed_backend() -> Option<Arc<dyn Backend>> {
    let backend = BACKEND.get().cloned();
    if backend.is_none() {
        error!("no decode backend installed");
    }
    backend
}
