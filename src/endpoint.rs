//! `Endpoint` — the immutable-after-registration constructor input for
//! every connection the reactor owns, and the small enums it is built
//! from (`Role`, `Protocol`).

use std::sync::Arc;

use rustls::{ClientConfig, ServerConfig};

/// The wire framing a connection speaks.
///
/// `None` exists only as a default/sentinel for an `Endpoint` that has not
/// yet been told what protocol it will carry (mirrors `XAPI_TYPE_NONE` in
/// the C original); it is never valid to reach `listen`/`connect` with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// No framing applied; bytes are handed to the user as-is.
    Raw,
    /// The length-prefixed JSON-header packet protocol (`src/packet`).
    Packet,
    /// HTTP/1.1 request/response framing (`src/http`).
    Http,
    /// WebSocket framing, reached via an HTTP Upgrade handshake (`src/ws`).
    Ws,
    /// Sentinel: protocol not yet chosen.
    #[default]
    None,
}

/// What role a connection plays, and therefore which half of the
/// role/reason dispatch table (spec §4.2) drives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// A listening socket; `Readable` means "accept".
    Server,
    /// An outbound connection initiated by `connect`.
    Client,
    /// An already-accepted connection spawned by a `Server`.
    Peer,
    /// An externally-owned descriptor adopted via `add_event`, with reasons
    /// forwarded to the user without protocol processing.
    Custom,
    /// Sentinel: role not yet chosen. Never valid at `add_endpoint` time.
    #[default]
    Inactive,
}

/// TLS certificate bundle. Paths are borrowed by the caller at
/// `listen`/`connect` time only long enough to build the `rustls` config;
/// nothing here is retained past that call.
#[derive(Debug, Clone, Default)]
pub struct CertBundle {
    /// PEM path to the CA bundle used to verify the peer.
    pub ca_path: Option<String>,
    /// PEM path to this endpoint's certificate chain.
    pub cert_path: Option<String>,
    /// PEM path to this endpoint's private key.
    pub key_path: Option<String>,
    /// Whether to verify the peer's certificate at all (disabling this is
    /// only intended for test fixtures).
    pub verify: bool,
}

/// Pre-built TLS configuration, as an alternative to [`CertBundle`] paths
/// for callers that already hold `rustls` config objects (e.g. pinned or
/// reloaded certificates).
#[derive(Clone)]
pub enum TlsConfig {
    /// Use this prebuilt server configuration.
    Server(Arc<ServerConfig>),
    /// Use this prebuilt client configuration.
    Client(Arc<ClientConfig>),
    /// Build a configuration from the given certificate bundle at
    /// `listen`/`connect` time.
    Bundle(CertBundle),
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server(_) => f.write_str("TlsConfig::Server(..)"),
            Self::Client(_) => f.write_str("TlsConfig::Client(..)"),
            Self::Bundle(b) => f.debug_tuple("TlsConfig::Bundle").field(b).finish(),
        }
    }
}

/// Opaque per-session pointer supplied by the user and returned unchanged
/// to every callback for the connection it was attached to. The façade
/// never inspects or drops it; the user's `Closed` handler is responsible
/// for freeing whatever it points to.
pub type SessionData = Option<Box<dyn std::any::Any + Send>>;

/// Constructor input for a connection. Immutable once handed to
/// [`crate::service::Api::add_endpoint`] (or its `listen`/`connect`/
/// `add_peer` shorthands).
#[derive(Debug, Default)]
pub struct Endpoint {
    /// Wire protocol this connection will speak.
    pub protocol: Protocol,
    /// Role this connection plays in the reactor.
    pub role: Role,
    /// IPv4/IPv6 literal, hostname, or Unix socket path.
    pub addr: String,
    /// TCP port; ignored when `unix` is set.
    pub port: u16,
    /// Request-target for HTTP/WS clients. Defaults to `/` if empty.
    pub uri: String,
    /// Enables TLS for this connection.
    pub tls: Option<TlsConfig>,
    /// Selects `AF_UNIX` instead of TCP.
    pub unix: bool,
    /// Enables `SO_REUSEADDR`-equivalent behavior on listeners.
    pub force: bool,
    /// Initial readiness interest; `None` selects the role's default.
    pub events: Option<Interest>,
    /// Opaque pointer threaded through to every callback for this
    /// connection, returned unchanged.
    pub session_data: SessionData,
    /// Pre-existing OS descriptor, for `add_event`/`add_peer`. Ignored by
    /// `listen`/`connect`.
    pub fd: Option<std::os::fd::RawFd>,
    /// For a `Ws`-protocol `Server`: handshake tolerance options (spec
    /// §9's open question on `Sec-WebSocket-Key` strictness). Ignored by
    /// non-WS protocols.
    pub ws_handshake: crate::ws::HandshakeOptions,
}

impl Endpoint {
    /// Builds a `Server`-role endpoint listening on `addr:port`.
    pub fn server(addr: impl Into<String>, port: u16, protocol: Protocol) -> Self {
        Self {
            protocol,
            role: Role::Server,
            addr: addr.into(),
            port,
            ..Default::default()
        }
    }

    /// Builds a `Client`-role endpoint connecting to `addr:port`.
    pub fn client(addr: impl Into<String>, port: u16, protocol: Protocol) -> Self {
        Self {
            protocol,
            role: Role::Client,
            addr: addr.into(),
            port,
            uri: "/".to_string(),
            ..Default::default()
        }
    }

    /// The request-target to use; defaults to `/` when unset.
    pub fn uri_or_default(&self) -> &str {
        if self.uri.is_empty() {
            "/"
        } else {
            &self.uri
        }
    }
}

/// Readiness interest mask, re-exported from the reactor's event bitfield
/// so endpoints can be built without importing `mio` directly.
pub use crate::reactor::Interest;
