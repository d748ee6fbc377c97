//! C ABI for embedding the decoder in non-Rust hosts.
//!
//! Raw integer arguments are validated here, before a session exists; the
//! exported functions never panic across the boundary and report failure as
//! a negative return. Handles are tracked in a process-wide registry so a
//! stale or doubled `destroy` is a no-op instead of a fault.
//!
//! The host must install a [`Backend`](crate::backend::Backend) via
//! [`install_backend`](crate::backend::install_backend) before calling any
//! entry point.

use crate::backend::installed_backend;
use crate::common::{DataFormat, DecodeConfig, HwApi, Luid, RawDeviceHandle};
use crate::probe::probe;
use crate::session::{DecodeOutcome, DecoderSession, OutputFrame};
use log::error;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::OnceLock;

/// Frame callback: receives the output texture and the host's opaque object.
/// The texture is only valid for the duration of the call.
pub type DecodeCallback = Option<unsafe extern "C" fn(texture: *mut c_void, obj: *const c_void)>;

/// Adapter record written by [`vramdec_probe`]. Field layout is part of the
/// ABI.
#[repr(C)]
pub struct VramdecAdapterDesc {
    pub vendor: i32,
    pub luid: i64,
}

fn live_sessions() -> &'static Mutex<HashSet<usize>> {
    static LIVE: OnceLock<Mutex<HashSet<usize>>> = OnceLock::new();
    LIVE.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Create a decoder session.
///
/// `device` may be null to create a device from `luid`. Returns an opaque
/// handle, or null on any failure.
///
/// # Safety
/// `device`, when non-null, must be a valid device pointer for the installed
/// backend, and must outlive the session.
#[no_mangle]
pub unsafe extern "C" fn vramdec_new_decoder(
    device: *mut c_void,
    luid: i64,
    api: i32,
    data_format: i32,
) -> *mut DecoderSession {
    catch_unwind(AssertUnwindSafe(|| {
        let Some(backend) = installed_backend() else {
            return std::ptr::null_mut();
        };
        let (Some(api), Some(data_format)) = (HwApi::from_raw(api), DataFormat::from_raw(data_format))
        else {
            error!("unsupported api or data format at the C boundary");
            return std::ptr::null_mut();
        };
        let config = DecodeConfig {
            device: RawDeviceHandle(device as u64),
            luid: Luid(luid),
            api,
            data_format,
            output_shared_handle: false,
        };
        match DecoderSession::new(backend, config) {
            Ok(session) => {
                let handle = Box::into_raw(Box::new(session));
                live_sessions().lock().insert(handle as usize);
                handle
            }
            Err(err) => {
                error!("new decoder failed: {err}");
                std::ptr::null_mut()
            }
        }
    }))
    .unwrap_or(std::ptr::null_mut())
}

/// Feed `length` bytes to the session and deliver converted frames through
/// `callback`. Returns 0 when at least one frame was delivered, a positive
/// parser byte count while an access unit is still incomplete, and a
/// negative code on failure.
///
/// # Safety
/// `handle` must come from [`vramdec_new_decoder`] and not be destroyed;
/// `data` must point to `length` readable bytes. Calls into one session must
/// be serialized by the host.
#[no_mangle]
pub unsafe extern "C" fn vramdec_decode(
    handle: *mut DecoderSession,
    data: *const u8,
    length: i32,
    callback: DecodeCallback,
    obj: *const c_void,
) -> i32 {
    if handle.is_null() || !live_sessions().lock().contains(&(handle as usize)) {
        error!("decode on an unknown decoder handle");
        return -1;
    }
    if data.is_null() || length <= 0 {
        error!("illegal decode parameter");
        return -1;
    }
    catch_unwind(AssertUnwindSafe(|| {
        let session = &mut *handle;
        let bytes = std::slice::from_raw_parts(data, length as usize);
        let mut sink = |frame: OutputFrame| {
            if let Some(cb) = callback {
                cb(frame.texture.as_ptr(), obj);
            }
        };
        match session.decode(bytes, Some(&mut sink)) {
            Ok(DecodeOutcome::Delivered(_)) => 0,
            Ok(DecodeOutcome::Buffering(consumed)) => consumed as i32,
            Err(err) => err.return_code(),
        }
    }))
    .unwrap_or(-1)
}

/// Destroy a session and release everything it owns. Null, unknown and
/// already-destroyed handles return success, so the call is idempotent.
///
/// # Safety
/// `handle` must be null or a value previously returned by
/// [`vramdec_new_decoder`], with no decode in flight on it.
#[no_mangle]
pub unsafe extern "C" fn vramdec_destroy_decoder(handle: *mut DecoderSession) -> i32 {
    if handle.is_null() {
        return 0;
    }
    if !live_sessions().lock().remove(&(handle as usize)) {
        return 0;
    }
    catch_unwind(AssertUnwindSafe(|| {
        drop(Box::from_raw(handle));
        0
    }))
    .unwrap_or(-1)
}

/// Probe adapters able to decode `data` and write up to `max_desc_num`
/// records to `out_descs`. The verified count goes to `out_desc_num`.
/// Returns 0 on success, negative on bad arguments or a missing backend.
///
/// # Safety
/// `out_descs` must point to `max_desc_num` writable records, `out_desc_num`
/// to a writable i32, and `data` to `length` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn vramdec_probe(
    out_descs: *mut VramdecAdapterDesc,
    max_desc_num: i32,
    out_desc_num: *mut i32,
    api: i32,
    data_format: i32,
    data: *const u8,
    length: i32,
) -> i32 {
    if out_descs.is_null() || out_desc_num.is_null() || max_desc_num <= 0 {
        return -1;
    }
    if data.is_null() || length <= 0 {
        return -1;
    }
    catch_unwind(AssertUnwindSafe(|| {
        let Some(backend) = installed_backend() else {
            return -1;
        };
        let (Some(api), Some(data_format)) = (HwApi::from_raw(api), DataFormat::from_raw(data_format))
        else {
            error!("unsupported api or data format at the C boundary");
            return -1;
        };
        let sample = std::slice::from_raw_parts(data, length as usize);
        let found = probe(&backend, max_desc_num as usize, api, data_format, sample);
        for (i, desc) in found.iter().enumerate() {
            out_descs.add(i).write(VramdecAdapterDesc {
                vendor: desc.vendor as i32,
                luid: desc.luid.0,
            });
        }
        out_desc_num.write(found.len() as i32);
        0
    }))
    .unwrap_or(-1)
}
