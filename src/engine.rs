//! Hardware codec engine seam.
//!
//! These traits mirror the call surface of the external decode library:
//! resolve a decoder by codec name, allocate a codec context, allocate and
//! initialize a hardware device context with the session's lock wired in,
//! initialize a bitstream parser, open, then submit/receive. The session
//! owns one object of each and drives them in that order; backends implement
//! them over the real library.

use crate::common::TextureHandle;
use crate::device::SessionLock;
use crate::error::NativeError;
use std::any::Any;

/// Single reusable staging slot for one complete access unit. Not a queue:
/// the session keeps exactly one unit in flight.
#[derive(Debug, Default)]
pub struct Packet {
    data: Vec<u8>,
}

impl Packet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a complete access unit, replacing any previous contents.
    pub fn stage(&mut self, unit: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(unit);
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Release the staged input buffer reference. Called on every exit path
    /// of the drain loop.
    pub fn unref(&mut self) {
        self.data.clear();
    }
}

/// Where a decoded frame's pixels live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStorage {
    /// GPU texture produced by the hardware path. The only storage this
    /// session accepts.
    Hardware,
    /// Host memory (a software or hybrid fallback inside the engine).
    System,
}

/// Pixel layout of a decoded surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceFormat {
    /// Biplanar 4:2:0 — luma plane plus interleaved half-resolution chroma.
    Nv12,
    /// 10-bit biplanar 4:2:0.
    P010,
}

/// Single reusable staging slot for one decoded surface. The engine writes
/// into it on a successful receive; `clear` resets it between frames.
#[derive(Debug)]
pub struct Frame {
    pub storage: FrameStorage,
    pub format: SurfaceFormat,
    /// Backing texture. Absent when the engine produced a surface without a
    /// real texture behind it, which the conversion pipeline rejects.
    pub texture: Option<TextureHandle>,
    /// Slice within the decoder's texture array.
    pub array_index: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            storage: FrameStorage::System,
            format: SurfaceFormat::Nv12,
            texture: None,
            array_index: 0,
            width: 0,
            height: 0,
        }
    }
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Options applied when allocating a codec context.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextOptions {
    /// Instruct the codec not to introduce reordering latency, so output
    /// order equals submission order.
    pub low_delay: bool,
}

/// Options applied when initializing a bitstream parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParserOptions {
    /// Every staged unit is a complete frame; the parser never splits one
    /// across packets.
    pub complete_frames: bool,
}

/// What the session hands the engine to build a hardware device context:
/// the raw graphics device and the lock the engine must take around its own
/// hardware-touching operations.
pub struct HwDeviceBinding {
    pub device: crate::common::RawDeviceHandle,
    pub lock: SessionLock,
}

/// Opaque hardware device context. The session owns it and releases it last
/// during teardown; the codec context only borrows it at bind time.
pub trait HwDeviceContext: Send {
    /// Downcast support for backend implementations at bind time.
    fn as_any(&self) -> &dyn Any;
}

/// Result of attempting to receive a decoded surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveStatus {
    /// A surface was written into the frame slot.
    Frame,
    /// The codec needs more input before it can emit another surface. Not an
    /// error; it ends the drain loop.
    NeedMoreInput,
}

/// Entry point into the external codec library.
pub trait CodecEngine: Send + Sync {
    /// Resolve a decoder implementation by codec name ("h264", "hevc").
    fn find_decoder(&self, name: &str) -> Option<Box<dyn CodecDecoder>>;
}

/// A resolved decoder: the factory for contexts, hardware bindings and
/// parsers of one codec.
pub trait CodecDecoder: Send {
    fn alloc_context(&self, opts: ContextOptions) -> Result<Box<dyn CodecContext>, NativeError>;

    /// Allocate and initialize a hardware device context with the session's
    /// device and lock wired in.
    fn alloc_hw_device_ctx(
        &self,
        binding: HwDeviceBinding,
    ) -> Result<Box<dyn HwDeviceContext>, NativeError>;

    fn new_parser(&self, opts: ParserOptions) -> Result<Box<dyn BitstreamParser>, NativeError>;
}

/// An allocated codec context: bind hardware, open, then submit/receive.
pub trait CodecContext: Send {
    /// Point the context at the session's hardware device context.
    fn bind_hw_device(&mut self, hw: &dyn HwDeviceContext) -> Result<(), NativeError>;

    fn open(&mut self) -> Result<(), NativeError>;

    /// Submit one staged access unit for decoding.
    fn submit(&mut self, packet: &Packet) -> Result<(), NativeError>;

    /// Try to receive the next decoded surface into `frame`.
    fn receive(&mut self, frame: &mut Frame) -> Result<ReceiveStatus, NativeError>;
}

/// Stateful bitstream parser retained across `decode` calls. It accumulates
/// partial byte ranges until a complete access unit is recognized, then
/// stages it into the packet slot.
pub trait BitstreamParser: Send {
    /// Feed a byte range. Returns the number of bytes consumed; when a
    /// complete access unit was delimited it is staged into `packet`
    /// (`packet.size() > 0`). Negative library results surface as errors.
    fn parse(&mut self, data: &[u8], packet: &mut Packet) -> Result<usize, NativeError>;

    /// Coded dimensions reported by the parser once known. The conversion
    /// pipeline sizes the output ring from these.
    fn dimensions(&self) -> Option<(u32, u32)>;
}
