//! WebSocket support: the RFC 6455 upgrade handshake (both directions)
//! and the frame codec.
//!
//! Wholly new relative to the teacher, which has no WebSocket support at
//! all. Grounded on `other_examples`' `paritytech-soketto` handshake
//! server (SHA-1 + base64 accept-key computation, `101 Switching
//! Protocols` assembly) and on `original_source/src/net/api.c`'s
//! `XAPI_GetWSKey`/`XAPI_AnswerUpgrade`/`XAPI_RequestUpgrade` for the
//! exact ordering quirk: the client flips `handshake_done` to `true`
//! *before* firing `HandshakeResponse`, not after.

pub mod frame;
pub mod handshake;

pub use frame::{Frame, FrameParser, Opcode, ParseStatus};
pub use handshake::{accept_key, client_key, validate_accept};

use thiserror::Error;

/// Everything that can go wrong in the WebSocket handshake or frame codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WsError {
    /// `Sec-WebSocket-Key` was missing and `allow_missing_key` was not set.
    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,
    /// The handshake request lacked `Upgrade: websocket`.
    #[error("missing or incorrect Upgrade header")]
    NotAnUpgrade,
    /// The server's `Sec-WebSocket-Accept` did not match the value this
    /// client computed from its own nonce.
    #[error("Sec-WebSocket-Accept mismatch")]
    AcceptMismatch,
    /// A frame header declared a reserved opcode or invalid length
    /// encoding.
    #[error("malformed frame header")]
    MalformedFrame,
    /// Incoming frame payload exceeded the configured cap.
    #[error("frame payload exceeds limit")]
    BigData,
}

/// Default cap on a single frame's payload size.
pub const DEFAULT_FRAME_MAX: usize = 16 * 1024 * 1024;

/// Whether the handshake server accepts a missing `Sec-WebSocket-Key`
/// (non-conformant, off by default per spec's strict posture).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeOptions {
    /// `true` to tolerate a missing client key (against RFC 6455).
    pub allow_missing_key: bool,
}

impl Default for HandshakeOptions {
    fn default() -> Self {
        Self {
            allow_missing_key: false,
        }
    }
}
