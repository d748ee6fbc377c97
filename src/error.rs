//! Error types for decode sessions.
//!
//! Raw failures from the codec engine and GPU device cross the trait seams as
//! [`NativeError`] (originating call plus numeric code, the way the external
//! libraries report them). The session classifies those into [`DecodeError`]
//! at the public boundary; the C ABI layer flattens everything to a negative
//! return via [`DecodeError::return_code`].

use thiserror::Error;

/// A failed call into an external native library: which call, and the code it
/// returned. Codes are library-defined and negative by convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeError {
    pub call: &'static str,
    pub code: i32,
}

impl NativeError {
    pub fn new(call: &'static str, code: i32) -> Self {
        Self { call, code }
    }
}

impl std::fmt::Display for NativeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed, ret = {}", self.call, self.code)
    }
}

/// Public error kinds of a decoder session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Resource allocation or open failure during create/reset. Fatal to the
    /// session; the caller must destroy it.
    #[error("initialization failed: {0}")]
    Initialization(NativeError),

    /// Bad input from the caller; no side effects occurred.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Operation requested before a successful initialization.
    #[error("decoder session not ready")]
    NotReady,

    /// Malformed bitstream chunk. The session stays usable.
    #[error("bitstream parse failed, ret = {code}")]
    Parse { code: i32 },

    /// Non-recoverable negative result from codec submit/receive. The session
    /// stays usable for subsequent calls.
    #[error("codec error: {0}")]
    Codec(NativeError),

    /// Decoded surface is not in the expected hardware/pixel layout; the
    /// frame is dropped.
    #[error("unsupported surface: {0}")]
    UnsupportedSurface(&'static str),

    /// GPU shader or completion-query failure; the frame is dropped.
    #[error("conversion failed: {0}")]
    Conversion(NativeError),
}

impl DecodeError {
    /// Negative code returned at the C boundary. Native codes pass through
    /// when already negative; everything else collapses to -1.
    pub fn return_code(&self) -> i32 {
        let native = match self {
            DecodeError::Initialization(e) | DecodeError::Codec(e) | DecodeError::Conversion(e) => {
                Some(e.code)
            }
            DecodeError::Parse { code } => Some(*code),
            _ => None,
        };
        match native {
            Some(code) if code < 0 => code,
            _ => -1,
        }
    }
}

pub type Result<T, E = DecodeError> = std::result::Result<T, E>;
