//! In-memory backend for tests and host-side smoke runs.
//!
//! The mock speaks a tiny synthetic access-unit format instead of a real
//! elementary stream, so tests can fabricate decodable, rejected and
//! malformed units byte for byte:
//!
//! ```text
//! magic(2) = A5 01 | flags(1) | width(2, LE) | height(2, LE) |
//! payload_len(2, LE) | payload
//! ```
//!
//! Every hardware-touching operation appends to a shared journal so tests
//! can assert call ordering across the codec and device seams. The engine
//! takes the session lock inside submit/receive, the same way a real
//! hardware device context does, so a session that wrongly held the lock
//! across those calls would deadlock immediately.

use crate::backend::Backend;
use crate::common::{AdapterDesc, AdapterVendor, Luid, RawDeviceHandle, TextureHandle};
use crate::device::{GpuDevice, SessionLock};
use crate::engine::{
    BitstreamParser, CodecContext, CodecDecoder, CodecEngine, ContextOptions, Frame, FrameStorage,
    HwDeviceBinding, HwDeviceContext, Packet, ParserOptions, ReceiveStatus, SurfaceFormat,
};
use crate::error::NativeError;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

const AU_MAGIC: [u8; 2] = [0xa5, 0x01];
const AU_HEADER_LEN: usize = 9;

/// Per-unit behavior switches encoded into the synthetic bitstream.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuFlags {
    system_storage: bool,
    p010: bool,
    no_texture: bool,
    rejected: bool,
    error_after_frame: bool,
}

impl AuFlags {
    /// Unit decodes into a host-memory surface instead of a texture.
    pub fn system_storage() -> Self {
        Self {
            system_storage: true,
            ..Self::default()
        }
    }

    /// Unit decodes into a 10-bit surface.
    pub fn p010() -> Self {
        Self {
            p010: true,
            ..Self::default()
        }
    }

    /// Unit decodes into a hardware surface with no backing texture.
    pub fn no_texture() -> Self {
        Self {
            no_texture: true,
            ..Self::default()
        }
    }

    /// The codec refuses the unit at submit time.
    pub fn rejected() -> Self {
        Self {
            rejected: true,
            ..Self::default()
        }
    }

    /// Unit decodes into one good frame, then the next receive fails.
    pub fn error_after_frame() -> Self {
        Self {
            error_after_frame: true,
            ..Self::default()
        }
    }

    fn to_byte(self) -> u8 {
        (self.system_storage as u8)
            | (self.p010 as u8) << 1
            | (self.no_texture as u8) << 2
            | (self.rejected as u8) << 3
            | (self.error_after_frame as u8) << 4
    }

    fn from_byte(b: u8) -> Self {
        Self {
            system_storage: b & 1 != 0,
            p010: b & 2 != 0,
            no_texture: b & 4 != 0,
            rejected: b & 8 != 0,
            error_after_frame: b & 16 != 0,
        }
    }
}

/// Fabricate one complete synthetic access unit.
pub fn sample_au(width: u32, height: u32, flags: AuFlags) -> Vec<u8> {
    let payload = [0x42u8; 32];
    let mut out = Vec::with_capacity(AU_HEADER_LEN + payload.len());
    out.extend_from_slice(&AU_MAGIC);
    out.push(flags.to_byte());
    out.extend_from_slice(&(width as u16).to_le_bytes());
    out.extend_from_slice(&(height as u16).to_le_bytes());
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(&payload);
    out
}

/// Shared observable state of a [`MockBackend`].
#[derive(Default)]
pub struct MockState {
    journal: Mutex<Vec<String>>,
    failing_luids: Mutex<HashSet<i64>>,
    panic_wait_luids: Mutex<HashSet<i64>>,
    adapters: Mutex<Vec<(AdapterVendor, Luid)>>,
}

impl MockState {
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().clone()
    }

    pub fn journal_len(&self) -> usize {
        self.journal.lock().len()
    }

    pub fn journal_push(&self, event: &str) {
        self.journal.lock().push(event.to_owned());
    }

    /// Make device creation fail for this adapter.
    pub fn fail_device_for(&self, luid: Luid) {
        self.failing_luids.lock().insert(luid.0);
    }

    /// Make `wait_query` panic on devices bound to this adapter.
    pub fn panic_on_wait_for(&self, luid: Luid) {
        self.panic_wait_luids.lock().insert(luid.0);
    }

    pub fn add_adapter(&self, vendor: AdapterVendor, luid: Luid) {
        self.adapters.lock().push((vendor, luid));
    }
}

/// Backend over the synthetic codec and an in-memory GPU device.
pub struct MockBackend {
    state: Arc<MockState>,
    engine: Arc<MockEngine>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        let state = Arc::new(MockState::default());
        let engine = Arc::new(MockEngine {
            state: state.clone(),
        });
        Arc::new(Self { state, engine })
    }

    /// Backend with one Nvidia adapter.
    pub fn with_adapter(luid: Luid) -> Arc<Self> {
        Self::with_adapters(&[luid])
    }

    /// Backend with several Nvidia adapters.
    pub fn with_adapters(luids: &[Luid]) -> Arc<Self> {
        let backend = Self::new();
        for luid in luids {
            backend.state.add_adapter(AdapterVendor::Nvidia, *luid);
        }
        backend
    }

    pub fn state(&self) -> Arc<MockState> {
        self.state.clone()
    }
}

impl Backend for MockBackend {
    fn codec_engine(&self) -> Arc<dyn CodecEngine> {
        self.engine.clone()
    }

    fn create_device(
        &self,
        existing: RawDeviceHandle,
        luid: Luid,
        pool_capacity: usize,
    ) -> Result<Box<dyn GpuDevice>, NativeError> {
        if self.state.failing_luids.lock().contains(&luid.0) {
            return Err(NativeError::new("create_device", -3));
        }
        let raw = if existing.is_null() {
            RawDeviceHandle(0xd3d_0000 | (luid.0 as u64) << 32)
        } else {
            existing
        };
        Ok(Box::new(MockDevice {
            state: self.state.clone(),
            raw,
            luid,
            capacity: pool_capacity,
            dims: None,
            generation: 0,
            cursor: 0,
            slots: Vec::new(),
            query_open: false,
            query_ended: false,
        }))
    }

    fn enumerate_adapters(&self, vendor: AdapterVendor) -> Vec<AdapterDesc> {
        self.state
            .adapters
            .lock()
            .iter()
            .filter(|(v, _)| *v == vendor)
            .map(|(vendor, luid)| AdapterDesc {
                vendor: *vendor,
                luid: *luid,
            })
            .collect()
    }
}

struct MockEngine {
    state: Arc<MockState>,
}

impl CodecEngine for MockEngine {
    fn find_decoder(&self, name: &str) -> Option<Box<dyn CodecDecoder>> {
        match name {
            "h264" | "hevc" => Some(Box::new(MockDecoder {
                state: self.state.clone(),
            })),
            _ => None,
        }
    }
}

struct MockDecoder {
    state: Arc<MockState>,
}

impl CodecDecoder for MockDecoder {
    fn alloc_context(&self, opts: ContextOptions) -> Result<Box<dyn CodecContext>, NativeError> {
        if !opts.low_delay {
            return Err(NativeError::new("alloc_context", -1));
        }
        Ok(Box::new(MockContext {
            state: self.state.clone(),
            lock: None,
            opened: false,
            pending: VecDeque::new(),
            decoded_units: 0,
        }))
    }

    fn alloc_hw_device_ctx(
        &self,
        binding: HwDeviceBinding,
    ) -> Result<Box<dyn HwDeviceContext>, NativeError> {
        if binding.device.is_null() {
            return Err(NativeError::new("alloc_hw_device_ctx", -2));
        }
        Ok(Box::new(MockHwCtx { binding }))
    }

    fn new_parser(&self, opts: ParserOptions) -> Result<Box<dyn BitstreamParser>, NativeError> {
        if !opts.complete_frames {
            return Err(NativeError::new("parser_init", -1));
        }
        Ok(Box::new(MockParser {
            buf: Vec::new(),
            dims: None,
        }))
    }
}

struct MockHwCtx {
    binding: HwDeviceBinding,
}

impl HwDeviceContext for MockHwCtx {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct AuDesc {
    flags: AuFlags,
    width: u32,
    height: u32,
}

fn parse_au(data: &[u8]) -> Option<AuDesc> {
    if data.len() < AU_HEADER_LEN || data[..2] != AU_MAGIC {
        return None;
    }
    let payload_len = u16::from_le_bytes([data[7], data[8]]) as usize;
    if data.len() != AU_HEADER_LEN + payload_len {
        return None;
    }
    Some(AuDesc {
        flags: AuFlags::from_byte(data[2]),
        width: u16::from_le_bytes([data[3], data[4]]) as u32,
        height: u16::from_le_bytes([data[5], data[6]]) as u32,
    })
}

struct MockContext {
    state: Arc<MockState>,
    /// Session lock cloned out of the hardware device context at bind time.
    lock: Option<SessionLock>,
    opened: bool,
    pending: VecDeque<Result<AuDesc, NativeError>>,
    decoded_units: u64,
}

impl CodecContext for MockContext {
    fn bind_hw_device(&mut self, hw: &dyn HwDeviceContext) -> Result<(), NativeError> {
        let ctx = hw
            .as_any()
            .downcast_ref::<MockHwCtx>()
            .ok_or(NativeError::new("bind_hw_device", -1))?;
        self.lock = Some(ctx.binding.lock.clone());
        Ok(())
    }

    fn open(&mut self) -> Result<(), NativeError> {
        if self.lock.is_none() {
            return Err(NativeError::new("open", -1));
        }
        self.opened = true;
        Ok(())
    }

    fn submit(&mut self, packet: &Packet) -> Result<(), NativeError> {
        if !self.opened {
            return Err(NativeError::new("send_packet", -1));
        }
        // Serialized against the session's conversion window.
        let lock = self.lock.clone().ok_or(NativeError::new("send_packet", -1))?;
        let _hw = lock.guard();
        self.state.journal_push("send_packet");
        let au = parse_au(packet.data()).ok_or(NativeError::new("send_packet", -22))?;
        if au.flags.rejected {
            return Err(NativeError::new("send_packet", -22));
        }
        let error_after = au.flags.error_after_frame;
        self.pending.push_back(Ok(au));
        if error_after {
            self.pending.push_back(Err(NativeError::new("receive_frame", -12)));
        }
        Ok(())
    }

    fn receive(&mut self, frame: &mut Frame) -> Result<ReceiveStatus, NativeError> {
        let lock = self
            .lock
            .clone()
            .ok_or(NativeError::new("receive_frame", -1))?;
        let _hw = lock.guard();
        let au = match self.pending.pop_front() {
            Some(Ok(au)) => au,
            Some(Err(err)) => return Err(err),
            None => return Ok(ReceiveStatus::NeedMoreInput),
        };
        self.state.journal_push("receive_frame");
        self.decoded_units += 1;
        frame.storage = if au.flags.system_storage {
            FrameStorage::System
        } else {
            FrameStorage::Hardware
        };
        frame.format = if au.flags.p010 {
            SurfaceFormat::P010
        } else {
            SurfaceFormat::Nv12
        };
        frame.texture = if au.flags.no_texture {
            None
        } else {
            Some(TextureHandle(0x5000_0000 + self.decoded_units))
        };
        frame.array_index = (self.decoded_units % 8) as u32;
        frame.width = au.width;
        frame.height = au.height;
        Ok(ReceiveStatus::Frame)
    }
}

struct MockParser {
    buf: Vec<u8>,
    dims: Option<(u32, u32)>,
}

impl BitstreamParser for MockParser {
    fn parse(&mut self, data: &[u8], packet: &mut Packet) -> Result<usize, NativeError> {
        self.buf.extend_from_slice(data);
        if self.buf.len() >= 2 && self.buf[..2] != AU_MAGIC {
            self.buf.clear();
            return Err(NativeError::new("parse", -22));
        }
        if self.buf.len() >= AU_HEADER_LEN {
            let payload_len = u16::from_le_bytes([self.buf[7], self.buf[8]]) as usize;
            let total = AU_HEADER_LEN + payload_len;
            if self.buf.len() >= total {
                let unit: Vec<u8> = self.buf.drain(..total).collect();
                self.dims = Some((
                    u16::from_le_bytes([unit[3], unit[4]]) as u32,
                    u16::from_le_bytes([unit[5], unit[6]]) as u32,
                ));
                packet.stage(&unit);
            }
        }
        Ok(data.len())
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.dims
    }
}

struct MockDevice {
    state: Arc<MockState>,
    raw: RawDeviceHandle,
    luid: Luid,
    capacity: usize,
    dims: Option<(u32, u32)>,
    generation: u64,
    cursor: usize,
    slots: Vec<TextureHandle>,
    query_open: bool,
    query_ended: bool,
}

impl GpuDevice for MockDevice {
    fn raw_handle(&self) -> RawDeviceHandle {
        self.raw
    }

    fn luid(&self) -> Luid {
        self.luid
    }

    fn ensure_outputs(&mut self, width: u32, height: u32) -> Result<(), NativeError> {
        if width == 0 || height == 0 {
            return Err(NativeError::new("ensure_outputs", -1));
        }
        if self.dims != Some((width, height)) {
            self.generation += 1;
            // Slot handles stay unique per device and generation.
            let base = (self.luid.0 as u64) << 40 | self.generation << 16 | 0x6000_0000_0000;
            self.slots = (0..self.capacity)
                .map(|slot| TextureHandle(base + slot as u64))
                .collect();
            self.cursor = 0;
            self.dims = Some((width, height));
        }
        Ok(())
    }

    fn advance_output(&mut self) -> usize {
        self.state.journal_push("advance");
        if !self.slots.is_empty() {
            self.cursor = (self.cursor + 1) % self.slots.len();
        }
        self.cursor
    }

    fn current_output(&self) -> Option<TextureHandle> {
        self.slots.get(self.cursor).copied()
    }

    fn current_shared_handle(&self) -> Option<u64> {
        self.slots.get(self.cursor).map(|t| t.0 | 0x8000_0000_0000_0000)
    }

    fn begin_query(&mut self) {
        self.state.journal_push("begin_query");
        self.query_open = true;
        self.query_ended = false;
    }

    fn end_query(&mut self) {
        self.state.journal_push("end_query");
        self.query_open = false;
        self.query_ended = true;
    }

    fn wait_query(&mut self) -> Result<(), NativeError> {
        self.state.journal_push("wait_query");
        if self.state.panic_wait_luids.lock().contains(&self.luid.0) {
            panic!("simulated device removal while waiting on the query");
        }
        if !self.query_ended {
            return Err(NativeError::new("wait_query", -1));
        }
        Ok(())
    }

    fn convert_nv12_to_bgra(
        &mut self,
        width: u32,
        height: u32,
        src: TextureHandle,
        _src_array_index: u32,
        dst: TextureHandle,
    ) -> Result<(), NativeError> {
        self.state.journal_push("dispatch");
        if !self.query_open {
            return Err(NativeError::new("dispatch", -1));
        }
        if self.dims != Some((width, height)) {
            return Err(NativeError::new("dispatch", -2));
        }
        if src.as_ptr().is_null() || self.current_output() != Some(dst) {
            return Err(NativeError::new("dispatch", -3));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn au_flags_round_trip_through_the_wire_byte() {
        for flags in [
            AuFlags::default(),
            AuFlags::system_storage(),
            AuFlags::p010(),
            AuFlags::no_texture(),
            AuFlags::rejected(),
            AuFlags::error_after_frame(),
        ] {
            let b = flags.to_byte();
            let back = AuFlags::from_byte(b);
            assert_eq!(back.to_byte(), b);
        }
    }

    #[test]
    fn parser_stages_only_complete_units() {
        let mut parser = MockParser {
            buf: Vec::new(),
            dims: None,
        };
        let au = sample_au(640, 480, AuFlags::default());
        let mut packet = Packet::new();

        let consumed = parser.parse(&au[..5], &mut packet).expect("partial");
        assert_eq!(consumed, 5);
        assert_eq!(packet.size(), 0);

        parser.parse(&au[5..], &mut packet).expect("rest");
        assert_eq!(packet.size(), au.len());
        assert_eq!(parser.dimensions(), Some((640, 480)));
    }

    #[test]
    fn parser_rejects_bad_magic() {
        let mut parser = MockParser {
            buf: Vec::new(),
            dims: None,
        };
        let mut packet = Packet::new();
        let err = parser.parse(&[0x00, 0x00, 0x01], &mut packet).unwrap_err();
        assert_eq!(err.code, -22);
    }

    #[test]
    fn unknown_codec_name_resolves_to_none() {
        let backend = MockBackend::new();
        assert!(backend.codec_engine().find_decoder("av1").is_none());
    }
}
