//! GPU-resident hardware video decode sessions.
//!
//! Compressed H.264/H.265 elementary-stream bytes go in; decoded frames come
//! back as packed BGRA textures that never leave the GPU. A session parses
//! the stream into complete access units, submits them to a hardware codec
//! bound to one adapter, converts each decoded NV12 surface with a GPU
//! shader into a 16-slot output-texture ring, and hands the texture to a
//! synchronous callback.
//!
//! The crate is platform-agnostic: the codec engine and the GPU device sit
//! behind traits ([`engine`], [`device`]) bundled by a [`backend::Backend`].
//! A host installs its backend once and then drives sessions either through
//! the Rust API ([`session::DecoderSession`], [`probe::probe`]) or the C ABI
//! ([`capi`]).

pub mod backend;
pub mod capi;
pub mod common;
pub mod device;
pub mod engine;
pub mod error;
#[cfg(any(test, feature = "mock-backend"))]
pub mod mock;
pub mod probe;
pub mod session;

pub use backend::{install_backend, installed_backend, Backend};
pub use common::{
    AdapterDesc, AdapterVendor, DataFormat, DecodeConfig, HwApi, Luid, RawDeviceHandle,
    TextureHandle, TEXTURE_POOL_CAPACITY,
};
pub use error::{DecodeError, NativeError, Result};
pub use probe::probe;
pub use session::{DecodeOutcome, DecoderSession, OutputFrame};
