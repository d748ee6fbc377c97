//! Hardware decode session.
//!
//! A session owns one codec context, one hardware device binding, one
//! bitstream parser and single packet/frame staging slots, and drives them
//! through a synchronous feed → submit → drain → convert pipeline:
//!
//! 1. `decode()` feeds bytes to the parser until a complete access unit is
//!    staged in the packet slot.
//! 2. The staged unit is submitted to the codec and decoded surfaces are
//!    drained until the codec wants more input.
//! 3. Each hardware surface is converted NV12 → BGRA on the GPU into the
//!    next slot of the device's output-texture ring, the completion query is
//!    waited on, and the texture is handed to the caller's sink.
//!
//! The session's lock is also wired into the codec's hardware device context,
//! so the engine's internal hardware calls and the explicit conversion window
//! share one mutual-exclusion domain. The two windows are sequential by
//! construction: the lock is taken around conversion only, never around
//! submit/receive.
//!
//! Callers must serialize calls into one session; independent sessions are
//! fully isolated and may run on separate threads. `destroy()` concurrent
//! with an in-flight `decode()` on the same session is not supported.

use crate::backend::Backend;
use crate::common::{DecodeConfig, TextureHandle, TEXTURE_POOL_CAPACITY};
use crate::device::{GpuDevice, SessionLock};
use crate::engine::{
    BitstreamParser, CodecContext, CodecDecoder, ContextOptions, Frame, FrameStorage,
    HwDeviceBinding, HwDeviceContext, Packet, ParserOptions, ReceiveStatus, SurfaceFormat,
};
use crate::error::{DecodeError, NativeError, Result};
use log::{debug, error};
use std::sync::Arc;

/// A converted frame delivered to the caller's sink. The texture belongs to
/// the session's output ring; it must not be retained past the slot's next
/// reuse.
#[derive(Debug, Clone, Copy)]
pub struct OutputFrame {
    pub texture: TextureHandle,
    /// Shareable handle of the same slot, when the session was configured
    /// with `output_shared_handle` and the backend supports export.
    pub shared_handle: Option<u64>,
    pub width: u32,
    pub height: u32,
}

/// Outcome of a `decode` call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// At least one frame was converted and delivered to the sink.
    Delivered(usize),
    /// No complete access unit yet; the parser consumed this many bytes and
    /// carries the partial state into the next call.
    Buffering(usize),
}

/// Sink receiving converted frames synchronously within `decode`.
pub type FrameSink<'a> = &'a mut dyn FnMut(OutputFrame);

fn fail_init(err: NativeError) -> DecodeError {
    error!("{err}");
    DecodeError::Initialization(err)
}

fn fail_conversion(err: NativeError) -> DecodeError {
    error!("{err}");
    DecodeError::Conversion(err)
}

/// Hardware-accelerated decoder session. See the module docs for the
/// pipeline and threading contract.
pub struct DecoderSession {
    backend: Arc<dyn Backend>,
    config: DecodeConfig,
    codec_name: &'static str,

    /// Created lazily on first reset, reused across later resets.
    native: Option<Box<dyn GpuDevice>>,
    decoder: Option<Box<dyn CodecDecoder>>,
    ctx: Option<Box<dyn CodecContext>>,
    /// Owned by the session and released last; the codec context only
    /// borrows it at bind time.
    hw_ctx: Option<Box<dyn HwDeviceContext>>,
    parser: Option<Box<dyn BitstreamParser>>,
    packet: Option<Packet>,
    frame: Option<Frame>,

    ready: bool,
    lock: SessionLock,
}

impl std::fmt::Debug for DecoderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderSession")
            .field("codec_name", &self.codec_name)
            .field("ready", &self.ready)
            .finish_non_exhaustive()
    }
}

impl DecoderSession {
    /// Create and initialize a session. Any initialization failure is fatal:
    /// the returned error means the session was never usable.
    pub fn new(backend: Arc<dyn Backend>, config: DecodeConfig) -> Result<Self> {
        let codec_name = config.data_format.codec_name();
        let mut session = Self {
            backend,
            config,
            codec_name,
            native: None,
            decoder: None,
            ctx: None,
            hw_ctx: None,
            parser: None,
            packet: None,
            frame: None,
            ready: false,
            lock: SessionLock::new(),
        };
        session.reset()?;
        Ok(session)
    }

    /// Idempotent reinitialize: tear down every owned codec resource, then
    /// rebuild. `ready` becomes true only after every step succeeded; on
    /// failure the failing call is logged and already-acquired resources
    /// stay owned by the session until the next `reset` or `destroy`.
    pub fn reset(&mut self) -> Result<()> {
        self.teardown();

        // The native device survives resets once created.
        let raw_device = match &self.native {
            Some(device) => device.raw_handle(),
            None => {
                let device = self
                    .backend
                    .create_device(self.config.device, self.config.luid, TEXTURE_POOL_CAPACITY)
                    .map_err(fail_init)?;
                let raw = device.raw_handle();
                self.native = Some(device);
                raw
            }
        };

        let engine = self.backend.codec_engine();
        let decoder = match engine.find_decoder(self.codec_name) {
            Some(decoder) => decoder,
            None => {
                error!("find_decoder {} failed", self.codec_name);
                return Err(DecodeError::Initialization(NativeError::new(
                    "find_decoder",
                    -1,
                )));
            }
        };

        // Low delay keeps output order equal to submission order.
        let mut ctx = decoder
            .alloc_context(ContextOptions { low_delay: true })
            .map_err(fail_init)?;

        let hw_ctx = decoder
            .alloc_hw_device_ctx(HwDeviceBinding {
                device: raw_device,
                lock: self.lock.clone(),
            })
            .map_err(fail_init)?;
        ctx.bind_hw_device(hw_ctx.as_ref()).map_err(fail_init)?;

        let parser = decoder
            .new_parser(ParserOptions {
                complete_frames: true,
            })
            .map_err(fail_init)?;

        self.decoder = Some(decoder);
        self.ctx = Some(ctx);
        self.hw_ctx = Some(hw_ctx);
        self.parser = Some(parser);
        self.packet = Some(Packet::new());
        self.frame = Some(Frame::new());

        if let Some(ctx) = self.ctx.as_mut() {
            ctx.open().map_err(fail_init)?;
        }

        self.ready = true;
        debug!(
            "decoder session ready: codec={} luid={}",
            self.codec_name, self.config.luid
        );
        Ok(())
    }

    /// Release codec-side resources in dependency order: frame slot, packet
    /// slot, parser, codec context, hardware device context. The native
    /// device is kept for the next reset.
    fn teardown(&mut self) {
        self.ready = false;
        self.frame = None;
        self.packet = None;
        self.parser = None;
        self.ctx = None;
        self.hw_ctx = None;
        self.decoder = None;
    }

    /// Release everything the session owns, including the native device.
    /// Safe to call repeatedly and on a partially constructed session.
    pub fn destroy(&mut self) {
        self.teardown();
        self.native = None;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn config(&self) -> &DecodeConfig {
        &self.config
    }

    /// Feed a byte range of the elementary stream. Chunking is transparent:
    /// the parser carries partial state across calls, and the sink only runs
    /// once complete access units decode into hardware surfaces.
    pub fn decode(&mut self, data: &[u8], sink: Option<FrameSink<'_>>) -> Result<DecodeOutcome> {
        if data.is_empty() {
            error!("illegal decode parameter: empty input");
            return Err(DecodeError::InvalidArgument("empty input"));
        }
        if !self.ready {
            error!("decode called on a session that is not ready");
            return Err(DecodeError::NotReady);
        }

        let consumed = {
            let (parser, packet) = match (self.parser.as_mut(), self.packet.as_mut()) {
                (Some(parser), Some(packet)) => (parser, packet),
                _ => return Err(DecodeError::NotReady),
            };
            parser.parse(data, packet).map_err(|err| {
                error!("{err}");
                DecodeError::Parse { code: err.code }
            })?
        };

        if self.packet.as_ref().map_or(0, Packet::size) > 0 {
            let delivered = self.drain(sink)?;
            Ok(DecodeOutcome::Delivered(delivered))
        } else {
            Ok(DecodeOutcome::Buffering(consumed))
        }
    }

    /// Submit the staged access unit and drain decoded surfaces through the
    /// conversion pipeline. The packet slot is unreferenced on every exit
    /// path. Succeeds iff at least one frame was delivered this call; an
    /// error after an earlier success in the same call is logged but masked.
    fn drain(&mut self, mut sink: Option<FrameSink<'_>>) -> Result<usize> {
        let Self {
            config,
            native,
            ctx,
            parser,
            packet,
            frame,
            lock,
            ..
        } = self;
        let (native, ctx, parser, packet, frame) = match (
            native.as_mut(),
            ctx.as_mut(),
            parser.as_ref(),
            packet.as_mut(),
            frame.as_mut(),
        ) {
            (Some(n), Some(c), Some(p), Some(k), Some(f)) => (n, c, p, k, f),
            _ => return Err(DecodeError::NotReady),
        };

        if let Err(err) = ctx.submit(packet) {
            error!("{err}");
            packet.unref();
            return Err(DecodeError::Codec(err));
        }

        let mut delivered = 0usize;
        let mut failure: Option<DecodeError> = None;

        loop {
            frame.clear();
            match ctx.receive(frame) {
                Ok(ReceiveStatus::NeedMoreInput) => break,
                Err(err) => {
                    error!("{err}");
                    failure = Some(DecodeError::Codec(err));
                    break;
                }
                Ok(ReceiveStatus::Frame) => {}
            }

            if frame.storage != FrameStorage::Hardware {
                error!("decoded surface is not a hardware surface");
                failure = Some(DecodeError::UnsupportedSurface("not a hardware surface"));
                break;
            }

            // Conversion uses the parser-reported coded size.
            let (width, height) = parser.dimensions().unwrap_or((frame.width, frame.height));

            // The lock covers only the conversion window; the codec takes the
            // same lock internally during submit/receive, so the two windows
            // stay sequential and never nest.
            let converted = {
                let _hw = lock.guard();
                convert(native.as_mut(), width, height, frame, config.output_shared_handle)
            };
            match converted {
                Ok(output) => {
                    if let Some(sink) = sink.as_mut() {
                        sink(output);
                    }
                    delivered += 1;
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        packet.unref();

        if delivered > 0 {
            Ok(delivered)
        } else {
            Err(failure
                .unwrap_or_else(|| DecodeError::Codec(NativeError::new("receive_frame", -1))))
        }
    }
}

/// Convert one decoded biplanar surface into the next output-ring slot and
/// wait for the GPU write to land.
fn convert(
    native: &mut dyn GpuDevice,
    width: u32,
    height: u32,
    frame: &Frame,
    want_shared_handle: bool,
) -> Result<OutputFrame> {
    let src = match frame.texture {
        Some(texture) => texture,
        None => {
            error!("decoded surface has no backing texture");
            return Err(DecodeError::UnsupportedSurface("missing texture"));
        }
    };
    if frame.format != SurfaceFormat::Nv12 {
        error!("only NV12 surfaces are supported, got {:?}", frame.format);
        return Err(DecodeError::UnsupportedSurface("not NV12"));
    }

    native.ensure_outputs(width, height).map_err(fail_conversion)?;

    // Advancing before the write decorrelates the target from the previous
    // frame's still-possibly-in-use texture.
    native.advance_output();
    let dst = match native.current_output() {
        Some(texture) => texture,
        None => {
            error!("output ring has no current texture");
            return Err(DecodeError::Conversion(NativeError::new(
                "current_output",
                -1,
            )));
        }
    };

    native.begin_query();
    let dispatched = native.convert_nv12_to_bgra(width, height, src, frame.array_index, dst);
    // The query is ended even when the dispatch failed, so no query state
    // leaks across frames.
    native.end_query();
    dispatched.map_err(fail_conversion)?;
    native.wait_query().map_err(fail_conversion)?;

    let shared_handle = if want_shared_handle {
        native.current_shared_handle()
    } else {
        None
    };

    Ok(OutputFrame {
        texture: dst,
        shared_handle,
        width,
        height,
    })
}

impl Drop for DecoderSession {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{DataFormat, HwApi, Luid, RawDeviceHandle};
    use crate::mock::{sample_au, AuFlags, MockBackend};
    use std::sync::Arc;

    fn init_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn new_session(backend: &Arc<MockBackend>) -> DecoderSession {
        let config = DecodeConfig {
            device: RawDeviceHandle::default(),
            luid: Luid(0x10),
            api: HwApi::D3d11,
            data_format: DataFormat::H264,
            output_shared_handle: false,
        };
        DecoderSession::new(backend.clone(), config).expect("session init")
    }

    #[test]
    fn empty_input_is_rejected_without_side_effects() {
        init_logs();
        let backend = MockBackend::with_adapter(Luid(0x10));
        let mut session = new_session(&backend);
        let before = backend.state().journal_len();
        let err = session.decode(&[], None).unwrap_err();
        assert_eq!(err, DecodeError::InvalidArgument("empty input"));
        assert_eq!(backend.state().journal_len(), before);
    }

    #[test]
    fn destroyed_session_reports_not_ready() {
        init_logs();
        let backend = MockBackend::with_adapter(Luid(0x10));
        let mut session = new_session(&backend);
        session.destroy();
        let au = sample_au(1280, 720, AuFlags::default());
        assert_eq!(session.decode(&au, None).unwrap_err(), DecodeError::NotReady);
        // destroy is idempotent
        session.destroy();
        session.destroy();
    }

    #[test]
    fn reset_reinitializes_a_destroyed_session() {
        init_logs();
        let backend = MockBackend::with_adapter(Luid(0x10));
        let mut session = new_session(&backend);
        session.destroy();
        session.reset().expect("reset after destroy");
        assert!(session.is_ready());
        let au = sample_au(640, 360, AuFlags::default());
        let outcome = session.decode(&au, None).expect("decode after reset");
        assert!(matches!(outcome, DecodeOutcome::Delivered(1)));
    }

    #[test]
    fn one_access_unit_delivers_one_frame_with_coded_dimensions() {
        init_logs();
        let backend = MockBackend::with_adapter(Luid(0x10));
        let mut session = new_session(&backend);
        let au = sample_au(1920, 1080, AuFlags::default());

        let mut frames = Vec::new();
        let mut sink = |frame: OutputFrame| frames.push(frame);
        let outcome = session.decode(&au, Some(&mut sink)).expect("decode");

        assert_eq!(outcome, DecodeOutcome::Delivered(1));
        assert_eq!(frames.len(), 1);
        assert_eq!((frames[0].width, frames[0].height), (1920, 1080));
    }

    #[test]
    fn callback_order_matches_submission_order() {
        init_logs();
        let backend = MockBackend::with_adapter(Luid(0x10));
        let mut session = new_session(&backend);

        let mut seen = Vec::new();
        for n in 0..5u16 {
            // Encode the submission index into the coded width.
            let au = sample_au(320 + n as u32, 240, AuFlags::default());
            let mut sink = |frame: OutputFrame| seen.push(frame.width);
            session.decode(&au, Some(&mut sink)).expect("decode");
        }
        assert_eq!(seen, vec![320, 321, 322, 323, 324]);
    }

    #[test]
    fn truncated_access_unit_buffers_without_callbacks() {
        init_logs();
        let backend = MockBackend::with_adapter(Luid(0x10));
        let mut session = new_session(&backend);
        let au = sample_au(1280, 720, AuFlags::default());
        let (head, tail) = au.split_at(au.len() / 2);

        let mut calls = 0usize;
        let mut sink = |_: OutputFrame| calls += 1;
        let outcome = session.decode(head, Some(&mut sink)).expect("feed head");
        assert_eq!(outcome, DecodeOutcome::Buffering(head.len()));
        assert_eq!(calls, 0);

        // The parser carries the partial state into the next call.
        let mut sink = |_: OutputFrame| calls += 1;
        let outcome = session.decode(tail, Some(&mut sink)).expect("feed tail");
        assert_eq!(outcome, DecodeOutcome::Delivered(1));
        assert_eq!(calls, 1);
    }

    #[test]
    fn unsupported_surface_never_reaches_the_sink() {
        init_logs();
        let backend = MockBackend::with_adapter(Luid(0x10));
        let mut session = new_session(&backend);

        for flags in [AuFlags::system_storage(), AuFlags::p010(), AuFlags::no_texture()] {
            let au = sample_au(1280, 720, flags);
            let mut calls = 0usize;
            let mut sink = |_: OutputFrame| calls += 1;
            let err = session.decode(&au, Some(&mut sink)).unwrap_err();
            assert!(
                matches!(err, DecodeError::UnsupportedSurface(_)),
                "expected unsupported surface, got {err:?}"
            );
            assert_eq!(calls, 0);
        }

        // The session stays usable afterwards.
        let au = sample_au(1280, 720, AuFlags::default());
        assert!(session.decode(&au, None).is_ok());
    }

    #[test]
    fn rejected_access_unit_fails_and_releases_the_packet() {
        init_logs();
        let backend = MockBackend::with_adapter(Luid(0x10));
        let mut session = new_session(&backend);
        let au = sample_au(1280, 720, AuFlags::rejected());
        let err = session.decode(&au, None).unwrap_err();
        assert!(matches!(err, DecodeError::Codec(_)));
        // A following good unit decodes: the packet slot was released.
        let au = sample_au(1280, 720, AuFlags::default());
        assert!(matches!(
            session.decode(&au, None),
            Ok(DecodeOutcome::Delivered(1))
        ));
    }

    #[test]
    fn error_after_a_delivered_frame_in_the_same_call_is_masked() {
        init_logs();
        let backend = MockBackend::with_adapter(Luid(0x10));
        let mut session = new_session(&backend);

        // One submitted unit yields a good frame, then receive fails.
        let au = sample_au(1280, 720, AuFlags::error_after_frame());
        let mut calls = 0usize;
        let mut sink = |_: OutputFrame| calls += 1;
        let outcome = session.decode(&au, Some(&mut sink)).expect("decode");
        assert_eq!(outcome, DecodeOutcome::Delivered(1));
        assert_eq!(calls, 1);

        // The same failure with no delivered frame surfaces as an error.
        let au = sample_au(1280, 720, AuFlags::rejected());
        assert!(session.decode(&au, None).is_err());
    }

    #[test]
    fn conversion_write_completes_before_the_sink_runs() {
        init_logs();
        let backend = MockBackend::with_adapter(Luid(0x10));
        let mut session = new_session(&backend);
        let au = sample_au(1280, 720, AuFlags::default());

        let state = backend.state();
        let mut sink = |_: OutputFrame| state.journal_push("sink");
        session.decode(&au, Some(&mut sink)).expect("decode");

        let journal = backend.state().journal();
        let order: Vec<&str> = journal.iter().map(String::as_str).collect();
        // Cursor advances before the write; the query is waited before the
        // sink observes the texture.
        let expected = [
            "advance",
            "begin_query",
            "dispatch",
            "end_query",
            "wait_query",
            "sink",
        ];
        let start = order
            .iter()
            .position(|e| *e == "advance")
            .expect("advance logged");
        assert_eq!(&order[start..start + expected.len()], &expected);
    }

    #[test]
    fn ring_cursor_walks_all_slots_before_reuse() {
        init_logs();
        let backend = MockBackend::with_adapter(Luid(0x10));
        let mut session = new_session(&backend);

        let mut textures = Vec::new();
        for _ in 0..TEXTURE_POOL_CAPACITY {
            let au = sample_au(1280, 720, AuFlags::default());
            let mut sink = |frame: OutputFrame| textures.push(frame.texture);
            session.decode(&au, Some(&mut sink)).expect("decode");
        }
        let mut unique = textures.clone();
        unique.sort_by_key(|t| t.0);
        unique.dedup();
        assert_eq!(unique.len(), TEXTURE_POOL_CAPACITY);
    }

    #[test]
    fn two_sessions_do_not_share_frames_or_state() {
        init_logs();
        let backend = MockBackend::with_adapters(&[Luid(0x10), Luid(0x20)]);
        let make = |luid| {
            DecoderSession::new(
                backend.clone(),
                DecodeConfig {
                    device: RawDeviceHandle::default(),
                    luid,
                    api: HwApi::D3d11,
                    data_format: DataFormat::H264,
                    output_shared_handle: false,
                },
            )
            .expect("session")
        };
        let mut a = make(Luid(0x10));
        let mut b = make(Luid(0x20));

        let mut a_frames = Vec::new();
        let mut b_frames = Vec::new();
        for n in 0..3u32 {
            let au_a = sample_au(100 + n, 100, AuFlags::default());
            let au_b = sample_au(200 + n, 200, AuFlags::default());
            let mut sink = |f: OutputFrame| a_frames.push(f);
            a.decode(&au_a, Some(&mut sink)).expect("a");
            let mut sink = |f: OutputFrame| b_frames.push(f);
            b.decode(&au_b, Some(&mut sink)).expect("b");
        }

        assert!(a_frames.iter().all(|f| f.height == 100));
        assert!(b_frames.iter().all(|f| f.height == 200));
        let a_tex: Vec<_> = a_frames.iter().map(|f| f.texture).collect();
        assert!(b_frames.iter().all(|f| !a_tex.contains(&f.texture)));
    }

    #[test]
    fn shared_handle_is_exported_on_request() {
        init_logs();
        let backend = MockBackend::with_adapter(Luid(0x10));
        let config = DecodeConfig {
            device: RawDeviceHandle::default(),
            luid: Luid(0x10),
            api: HwApi::D3d11,
            data_format: DataFormat::H265,
            output_shared_handle: true,
        };
        let mut session = DecoderSession::new(backend.clone(), config).expect("session");
        let au = sample_au(1280, 720, AuFlags::default());
        let mut shared = None;
        let mut sink = |frame: OutputFrame| shared = frame.shared_handle;
        session.decode(&au, Some(&mut sink)).expect("decode");
        assert!(shared.is_some());
    }

    #[test]
    fn failed_device_creation_fails_session_construction() {
        init_logs();
        let backend = MockBackend::with_adapter(Luid(0x10));
        backend.state().fail_device_for(Luid(0xdead));
        let config = DecodeConfig {
            device: RawDeviceHandle::default(),
            luid: Luid(0xdead),
            api: HwApi::D3d11,
            data_format: DataFormat::H264,
            output_shared_handle: false,
        };
        let err = DecoderSession::new(backend.clone(), config).unwrap_err();
        assert!(matches!(err, DecodeError::Initialization(_)));
    }
}
