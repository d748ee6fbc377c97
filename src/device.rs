//! Native GPU device seam.
//!
//! The device owns the graphics context, the ring of output textures and the
//! biplanar-to-packed conversion shader. Creating one is a backend concern
//! (`backend::Backend::create_device`); the session only drives the contract
//! below. The ring cursor plus completion query are what keep a texture
//! handed to the caller from being overwritten while its conversion write is
//! still in flight.

use crate::common::{Luid, RawDeviceHandle, TextureHandle};
use crate::error::NativeError;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// The per-session mutual-exclusion capability.
///
/// One clone is wired into the codec's hardware device context so the
/// engine's internal hardware calls serialize against the session's own
/// conversion window. Cloning shares the underlying mutex.
#[derive(Clone, Default)]
pub struct SessionLock {
    inner: Arc<Mutex<()>>,
}

impl SessionLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for the duration of the returned guard.
    pub fn guard(&self) -> MutexGuard<'_, ()> {
        self.inner.lock()
    }
}

impl std::fmt::Debug for SessionLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLock")
            .field("locked", &self.inner.is_locked())
            .finish()
    }
}

/// Native GPU device bound to one adapter.
///
/// All methods execute on the caller's thread. `wait_query` is the only
/// blocking call; it returns once previously issued GPU work has landed.
pub trait GpuDevice: Send {
    /// Raw handle to the underlying graphics device, for binding into the
    /// codec's hardware device context.
    fn raw_handle(&self) -> RawDeviceHandle;

    /// Adapter identity this device was created on.
    fn luid(&self) -> Luid;

    /// Make the output-texture ring match `width` x `height`, reallocating
    /// every slot when dimensions changed.
    fn ensure_outputs(&mut self, width: u32, height: u32) -> Result<(), NativeError>;

    /// Advance the ring cursor to the next slot and return its index.
    fn advance_output(&mut self) -> usize;

    /// Texture at the current cursor, if the ring has been allocated.
    fn current_output(&self) -> Option<TextureHandle>;

    /// Shareable handle of the current slot, when the backend supports
    /// cross-device export.
    fn current_shared_handle(&self) -> Option<u64>;

    /// Open a GPU completion query covering subsequently issued work.
    fn begin_query(&mut self);

    /// Close the completion query.
    fn end_query(&mut self);

    /// Block until the work bracketed by the query has completed.
    fn wait_query(&mut self) -> Result<(), NativeError>;

    /// Dispatch the biplanar 4:2:0 to packed 32-bit conversion shader from
    /// `src` (slice `src_array_index`) into `dst`.
    fn convert_nv12_to_bgra(
        &mut self,
        width: u32,
        height: u32,
        src: TextureHandle,
        src_array_index: u32,
        dst: TextureHandle,
    ) -> Result<(), NativeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_lock_clones_share_one_mutex() {
        let lock = SessionLock::new();
        let clone = lock.clone();
        let held = lock.guard();
        assert!(clone.inner.try_lock().is_none());
        drop(held);
        assert!(clone.inner.try_lock().is_some());
    }
}
