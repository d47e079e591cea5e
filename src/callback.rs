//! The user-facing callback surface: the single entry point every
//! protocol/role dispatch eventually funnels into, plus the reason and
//! status vocabularies it's built from.

use mio::Token;

use crate::{http::HttpError, packet::PacketError, ws::WsError};

/// Stable, loggable status codes that aren't specific to one codec (spec
/// §6's named status set).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiStatus {
    /// `Authorization`/`X-API-KEY` check failed outright.
    AuthFailure,
    /// No credentials were presented at all.
    MissingToken,
    /// Credentials were presented but didn't match.
    InvalidToken,
    /// An `Endpoint` was missing a required field for its role/protocol.
    InvalidArgs,
    /// `add_event`/`add_peer` was asked to adopt an unsupported role.
    InvalidRole,
    /// An `X-API-KEY` check was configured but the header was absent.
    MissingKey,
    /// An `X-API-KEY` was presented but didn't match.
    InvalidKey,
    /// The reactor rejected a register/modify call.
    ErrRegister,
    /// Address resolution failed.
    ErrResolve,
    /// A connection record or buffer allocation failed.
    ErrAlloc,
    /// Assembling a response/request failed.
    ErrAssemble,
    /// A cryptographic operation (TLS handshake) failed.
    ErrCrypt,
    /// The connection was closed (peer EOF).
    Closed,
    /// The connection hung up / errored at the socket level.
    Hunged,
    /// The reactor is tearing down.
    Destroy,
}

impl ApiStatus {
    /// A human-readable reason string, for the `{"status":"<reason>"}`
    /// body [`crate::service::Api::respond_http`] builds.
    pub fn reason(self) -> &'static str {
        match self {
            Self::AuthFailure => "Authentication failed",
            Self::MissingToken => "Missing authentication credentials",
            Self::InvalidToken => "Invalid authentication credentials",
            Self::InvalidArgs => "Invalid arguments",
            Self::InvalidRole => "Invalid role",
            Self::MissingKey => "Missing X-API-KEY header",
            Self::InvalidKey => "Invalid X-API-KEY",
            Self::ErrRegister => "Registration failed",
            Self::ErrResolve => "Address resolution failed",
            Self::ErrAlloc => "Allocation failed",
            Self::ErrAssemble => "Failed to assemble response",
            Self::ErrCrypt => "Cryptographic operation failed",
            Self::Closed => "Connection closed",
            Self::Hunged => "Connection hung up",
            Self::Destroy => "Reactor shutting down",
        }
    }
}

/// Which codec (if any) a [`Ctx::status`] numeric value belongs to —
/// spec §6's "protocol-status enum" second tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtoStatus {
    /// No protocol-specific status; see `reason` alone.
    None,
    /// One of the codec-independent named codes above.
    Api(ApiStatus),
    /// An HTTP codec status.
    Http(HttpError),
    /// A WebSocket codec status.
    Ws(WsError),
    /// A packet codec status.
    Packet(PacketError),
    /// A socket/transport-level status.
    Socket(SocketErrorKind),
}

/// Transport-level status, independent of any framing protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketErrorKind {
    /// The peer closed the connection (0-length read).
    Eof,
    /// The OS reported an error on this descriptor.
    Error,
    /// A TLS read needs a write to proceed (renegotiation).
    WantWrite,
    /// A TLS write needs a read to proceed (renegotiation).
    WantRead,
}

/// High-level reason delivered to the user callback (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// An error occurred; see `Ctx::status`.
    Error,
    /// An informational status with no associated error.
    Status,
    /// Application data is available in the connection's rx buffer.
    Read,
    /// The connection became writable and the façade is about to drain
    /// `tx` (raw/custom roles only; protocol roles get `Complete`
    /// instead once the drain finishes).
    Write,
    /// A `Server` accepted a new peer.
    Accepted,
    /// A `Client` connection completed (first writable event).
    Connected,
    /// The connection was torn down; always the last callback.
    Closed,
    /// A transmit-buffer drain finished.
    Complete,
    /// A WS/HTTP handshake request was parsed (server) or is about to be
    /// sent (client).
    HandshakeRequest,
    /// The server's handshake response was assembled and queued.
    HandshakeAnswer,
    /// The client parsed and validated the server's handshake response.
    HandshakeResponse,
    /// A connection's armed timer fired.
    Timeout,
    /// A signal-driven interrupt was observed this tick.
    Interrupt,
    /// A `Server` endpoint is now listening.
    Listening,
    /// An externally-owned descriptor was registered.
    Registered,
    /// Synthesized by the façade in response to a `UserCallback`
    /// disposition.
    User,
}

/// What the user callback returns, telling the façade what to do next
/// (spec §4.2's disposition mapping).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Nothing special; proceed normally.
    Continue,
    /// Explicitly do nothing further this tick.
    NoAction,
    /// Tear the connection down after this tick.
    Disconnect,
    /// Ask the façade to synthesize an immediate `User` callback and map
    /// its return value again.
    UserCallback,
    /// Propagate a reactor-level `Reloop` (restart this tick's dispatch).
    Reloop,
}

/// The context handed to the user callback for a single invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ctx {
    /// Why the callback is firing.
    pub reason: Reason,
    /// Protocol/status detail for `Error`/`Status` reasons; `None`
    /// otherwise.
    pub status: ProtoStatus,
    /// The connection this callback is for.
    pub token: Token,
    /// The connection's session id, for correlating with logs.
    pub session_id: u64,
}

impl Ctx {
    /// Builds a context with no status detail.
    pub fn new(reason: Reason, token: Token, session_id: u64) -> Self {
        Self {
            reason,
            status: ProtoStatus::None,
            token,
            session_id,
        }
    }

    /// Builds a context carrying status detail.
    pub fn with_status(reason: Reason, token: Token, session_id: u64, status: ProtoStatus) -> Self {
        Self {
            reason,
            status,
            token,
            session_id,
        }
    }
}

/// Boxed user callback type. Stored as `Option` in [`crate::service::Api`]
/// so it can be taken out for the duration of a call (avoiding a
/// self-referential `&mut self` borrow) and put back afterward.
pub type UserCallback = Box<dyn FnMut(&mut crate::service::Api, Ctx) -> Disposition>;
