//! Shared value types: codec formats, acceleration APIs, adapter identities.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Compressed elementary-stream format accepted by a decoder session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataFormat {
    H264,
    H265,
}

impl DataFormat {
    /// Codec name used to resolve a decoder in the external engine.
    pub fn codec_name(self) -> &'static str {
        match self {
            DataFormat::H264 => "h264",
            DataFormat::H265 => "hevc",
        }
    }

    /// Decode the raw C-boundary value. Layout matches the original header:
    /// 0 = H264, 1 = H265.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(DataFormat::H264),
            1 => Some(DataFormat::H265),
            _ => None,
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.codec_name())
    }
}

/// Hardware acceleration API a session binds to. Only one is defined today;
/// the raw value space at the C boundary is wider and validated in `capi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HwApi {
    D3d11,
}

impl HwApi {
    /// Decode the raw C-boundary value (0 = D3D11).
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(HwApi::D3d11),
            _ => None,
        }
    }
}

/// GPU adapter vendor tag used by the capability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterVendor {
    Intel,
    Nvidia,
    Amd,
}

/// Probe order. Intel first matches the original enumeration order; the list
/// is a constant, not process state.
pub const PROBE_VENDORS: [AdapterVendor; 3] =
    [AdapterVendor::Intel, AdapterVendor::Nvidia, AdapterVendor::Amd];

/// Locally-unique identifier of a GPU adapter instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Luid(pub i64);

impl fmt::Display for Luid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Read-only record produced by the capability probe: an adapter verified
/// able to decode the supplied sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterDesc {
    pub vendor: AdapterVendor,
    pub luid: Luid,
}

/// Opaque GPU texture handle. The value is backend-defined (a COM pointer,
/// a Vulkan image handle, a test id); zero is never a valid texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct TextureHandle(pub u64);

impl TextureHandle {
    pub fn as_ptr(self) -> *mut std::ffi::c_void {
        self.0 as *mut std::ffi::c_void
    }
}

/// Raw handle to an existing graphics device the caller wants the session to
/// share. Zero means "none, create one from the LUID".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct RawDeviceHandle(pub u64);

impl RawDeviceHandle {
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Number of output textures in a session's ring buffer.
pub const TEXTURE_POOL_CAPACITY: usize = 16;

/// Everything needed to create a decoder session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeConfig {
    /// Existing device to share, or null to create one from `luid`.
    pub device: RawDeviceHandle,
    /// Adapter to bind when `device` is null.
    pub luid: Luid,
    pub api: HwApi,
    pub data_format: DataFormat,
    /// Hand the callback the ring slot's shareable handle in addition to the
    /// texture, for import into another device.
    pub output_shared_handle: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_format_values_match_header_layout() {
        assert_eq!(DataFormat::from_raw(0), Some(DataFormat::H264));
        assert_eq!(DataFormat::from_raw(1), Some(DataFormat::H265));
        assert_eq!(DataFormat::from_raw(2), None);
        assert_eq!(HwApi::from_raw(0), Some(HwApi::D3d11));
        assert_eq!(HwApi::from_raw(1), None);
    }

    #[test]
    fn codec_names() {
        assert_eq!(DataFormat::H264.codec_name(), "h264");
        assert_eq!(DataFormat::H265.codec_name(), "hevc");
    }
}
