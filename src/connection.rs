//! The connection record: per-descriptor state owned by [`crate::service::Api`]
//! and keyed by the same [`Token`] the reactor uses for its own event
//! record, per the "back pointer is a lookup key, not ownership" design
//! note.
//!
//! Generalizes the teacher's `PlainConnection`/`TlsConnection` (which
//! were hard-coded to one `TcpStream` type and one protocol, HTTP/1.1)
//! into a single record spanning every role/protocol combination.

use mio::Token;

use crate::{
    buffer::Buffer,
    endpoint::{Protocol, Role, SessionData},
    http::{Assembler, HttpParser},
    net::Socket,
    packet::{PacketHeader, PacketParser},
    reactor::Interest,
    ws::{Frame, FrameParser},
};

/// Saved cross-direction I/O state for TLS renegotiation (spec §4.2): at
/// most one of `read_on_write`/`write_on_read` is ever set at a time, and
/// each carries the interest mask to restore once the opposite-direction
/// event fires.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossDirection {
    /// A read returned `WantWrite`; the façade is waiting for a writable
    /// event before retrying the read.
    pub read_on_write: bool,
    /// A write returned `WantRead`; the façade is waiting for a readable
    /// event before retrying the write.
    pub write_on_read: bool,
    /// The interest mask to restore once the pending cross-direction
    /// event fires.
    pub saved_interest: Option<Interest>,
}

/// Per-connection protocol codec state. Exactly one variant is active for
/// the lifetime of the connection, except `Ws`, which starts as an HTTP
/// handshake (`handshake` is `Some`) and transitions to frame parsing
/// (`frames`) once `handshake_done` flips.
#[derive(Debug)]
pub enum Codec {
    /// No framing; bytes pass through to the user untouched.
    Raw,
    /// Length-prefixed JSON-header packets.
    Packet(PacketParser),
    /// HTTP/1.1 request/response.
    Http(HttpParser),
    /// WebSocket: HTTP handshake first, then frames.
    Ws {
        /// Present until the handshake completes.
        handshake: Option<HttpParser>,
        /// Present once the handshake completes.
        frames: FrameParser,
        /// The client's own `Sec-WebSocket-Key`, kept to validate the
        /// server's `Sec-WebSocket-Accept` against (client role only).
        client_nonce: Option<String>,
    },
}

impl Codec {
    /// Builds the initial codec state for a fresh connection of the given
    /// protocol and role.
    pub fn new(protocol: Protocol, role: Role) -> Self {
        match protocol {
            Protocol::Raw | Protocol::None => Self::Raw,
            Protocol::Packet => Self::Packet(PacketParser::default()),
            Protocol::Http => Self::Http(HttpParser::default()),
            Protocol::Ws => Self::Ws {
                handshake: Some(HttpParser::default()),
                frames: FrameParser::default(),
                client_nonce: if role == Role::Client {
                    Some(crate::ws::client_key())
                } else {
                    None
                },
            },
        }
    }
}

/// Pending response/request bytes queued for assembly before being pushed
/// into the transmit buffer. Kept separate from `tx` so the façade can
/// finish building a message (e.g. adding headers across several calls)
/// before committing it to the wire.
pub type PendingAssembler = Option<Assembler>;

/// One registered descriptor's full state.
#[derive(Debug)]
pub struct ConnectionRecord {
    /// The transport (plus optional TLS layer).
    pub socket: Socket,
    /// This connection's reactor token; doubles as its façade-level
    /// lookup key.
    pub token: Token,
    /// Server / Client / Peer / Custom.
    pub role: Role,
    /// Raw / Packet / Http / Ws.
    pub protocol: Protocol,
    /// Bytes read from the socket, not yet consumed by the protocol
    /// codec.
    pub rx: Buffer,
    /// Bytes queued for the socket, not yet written.
    pub tx: Buffer,
    /// Formatted remote address/path, for logging.
    pub remote: String,
    /// Request-target, for WS/HTTP clients.
    pub uri: String,
    /// Protocol codec state.
    pub codec: Codec,
    /// `true` once a handshake (WS) or first request (HTTP) has begun.
    pub handshake_started: bool,
    /// `true` once the WS handshake has completed both sides.
    pub handshake_done: bool,
    /// `true` while handshake bytes (the server's 101 response or the
    /// client's GET upgrade request) are queued in `tx` but not yet
    /// flushed. `handshake_done` flips to `true` the instant those bytes
    /// are queued (spec §9's ordering quirk), so this is the flag the
    /// writable path actually checks to withhold `Complete` for that one
    /// flush (spec §4.2: "invoke `Complete` ... except during WS
    /// handshake").
    pub handshake_flush_pending: bool,
    /// TLS renegotiation cross-direction latch.
    pub cross: CrossDirection,
    /// Set by any handler to force disconnect after the current write
    /// flushes.
    pub cancel: bool,
    /// This connection's armed timer, if any.
    pub timer_token: Option<Token>,
    /// Monotonic id assigned at creation (reactor-instance-scoped).
    pub session_id: u64,
    /// Opaque user pointer, passed through untouched.
    pub session_data: SessionData,
    /// Cached copy of the interest mask last told to the reactor, kept in
    /// sync by every `set_events`/`enable_event`/`disable_event` call.
    pub interest: Interest,
    /// `true` once the `Connected` callback has fired for a `Client`-role
    /// connection (its first writable event, per spec §4.2).
    pub connected_fired: bool,
    /// The most recently completed packet, valid only for the duration of
    /// the `Read` callback that announces it (spec §9's "transient
    /// pointer" design note), modeled here as a scoped field rather than a
    /// raw pointer.
    pub packet_in: Option<(PacketHeader, Vec<u8>)>,
    /// The most recently completed WS frame, valid only for the duration
    /// of the `Read` callback that announces it.
    pub ws_frame_in: Option<Frame>,
    /// WS handshake tolerance options, carried from the owning
    /// [`crate::endpoint::Endpoint`]/listener.
    pub ws_handshake: crate::ws::HandshakeOptions,
}

impl ConnectionRecord {
    /// Builds a fresh record for a newly accepted/connected/adopted
    /// socket.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        socket: Socket,
        token: Token,
        role: Role,
        protocol: Protocol,
        remote: String,
        uri: String,
        session_id: u64,
        session_data: SessionData,
        interest: Interest,
        ws_handshake: crate::ws::HandshakeOptions,
    ) -> Self {
        Self {
            socket,
            token,
            role,
            codec: Codec::new(protocol, role),
            protocol,
            rx: Buffer::new(4096),
            tx: Buffer::new(4096),
            remote,
            uri,
            handshake_started: false,
            handshake_done: protocol != Protocol::Ws,
            handshake_flush_pending: false,
            cross: CrossDirection::default(),
            cancel: false,
            timer_token: None,
            session_id,
            session_data,
            interest,
            connected_fired: false,
            packet_in: None,
            ws_frame_in: None,
            ws_handshake,
        }
    }
}
