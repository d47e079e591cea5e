//! The `Api` façade: the single entry point a caller drives, owning the
//! reactor and the per-token connection/listener tables, and translating
//! low-level [`crate::reactor::Reason`]s into the role/protocol-aware
//! events described by [`crate::callback::Reason`].
//!
//! Generalizes the teacher's single-threaded `MultiListener::event` match
//! (accept-or-read-or-write over one hard-coded HTTP listener) into a
//! dispatch table spanning every role (`Server`/`Client`/`Peer`/`Custom`)
//! and every protocol (`Raw`/`Packet`/`Http`/`Ws`), per the role/reason
//! table.

use std::{
    collections::HashMap,
    io,
    net::{SocketAddr, ToSocketAddrs},
    os::fd::FromRawFd,
    sync::Arc,
    time::{Duration, Instant},
};

use log::{error, warn};
use mio::{
    net::{TcpListener, TcpStream, UnixListener, UnixStream},
    Token, Waker,
};
use rustls::ServerConfig;

use crate::{
    buffer::Buffer,
    callback::{ApiStatus, Ctx, Disposition, ProtoStatus, Reason, SocketErrorKind, UserCallback},
    connection::{Codec, ConnectionRecord, CrossDirection},
    endpoint::{Endpoint, Protocol, Role, SessionData, TlsConfig},
    error::{Error, Result},
    http::{self, Assembler, HttpError, Method, StartLine, StatusCode, Version},
    net::{
        socket::{PlainStream, Socket, SocketStatus},
        tls::{self, TlsSide},
    },
    packet::{self, PacketError, PacketHeader},
    reactor::{Directive, Interest, Reactor, Reason as ReactorReason, ServiceStatus},
    ws::{self, Frame, WsError},
};

/// Default cap on unconsumed receive-buffer bytes before a connection is
/// disconnected for back-pressure (`XAPI_RX_MAX` in the original C).
pub const DEFAULT_RX_LIMIT: usize = 5_120_000;

/// A listening socket's bookkeeping. Never gets a [`ConnectionRecord`] of
/// its own — only the peers it accepts do.
enum ListenerSocket {
    /// A bound, listening TCP socket.
    Tcp(TcpListener),
    /// A bound, listening Unix domain socket.
    Unix(UnixListener),
}

impl std::fmt::Debug for ListenerSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp(l) => f.debug_tuple("Tcp").field(l).finish(),
            Self::Unix(l) => f.debug_tuple("Unix").field(l).finish(),
        }
    }
}

struct ListenerRecord {
    socket: ListenerSocket,
    protocol: Protocol,
    tls_config: Option<Arc<ServerConfig>>,
    ws_handshake: ws::HandshakeOptions,
}

impl std::fmt::Debug for ListenerRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRecord")
            .field("socket", &self.socket)
            .field("protocol", &self.protocol)
            .field("tls", &self.tls_config.is_some())
            .finish()
    }
}

/// Which codec a connection is running, without borrowing it — lets
/// [`Api::drain_protocol`] pick a branch and then drop the borrow before
/// calling back into `self`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodecKind {
    Raw,
    Packet,
    Http,
    WsHandshake,
    WsFrame,
}

fn codec_kind(conn: &ConnectionRecord) -> CodecKind {
    // `Custom` forwards bytes to the user untouched regardless of the
    // connection's configured protocol (spec §4.2's role/reason table).
    if conn.role == Role::Custom {
        return CodecKind::Raw;
    }
    match &conn.codec {
        Codec::Raw => CodecKind::Raw,
        Codec::Packet(_) => CodecKind::Packet,
        Codec::Http(_) => CodecKind::Http,
        Codec::Ws { handshake: Some(_), .. } => CodecKind::WsHandshake,
        Codec::Ws { handshake: None, .. } => CodecKind::WsFrame,
    }
}

/// Outcome of draining one protocol message from a connection's `rx`
/// buffer. `Again` lets [`Api::drain_protocol`] loop over a pipelined
/// buffer (several complete messages already sitting in `rx`) without
/// waiting for another readiness notification.
enum DrainOutcome {
    Again,
    Directive(Directive),
}

fn map_disposition(d: Disposition) -> Directive {
    match d {
        Disposition::Disconnect => Directive::Disconnect,
        Disposition::Reloop => Directive::Reloop,
        _ => Directive::Continue,
    }
}

fn default_interest(role: Role) -> Interest {
    match role {
        Role::Client => Interest::READABLE | Interest::WRITABLE,
        _ => Interest::READABLE,
    }
}

fn resolve_addr(addr: &str, port: u16) -> Result<SocketAddr> {
    (addr, port)
        .to_socket_addrs()
        .map_err(Error::Resolve)?
        .next()
        .ok_or(Error::InvalidArgs("address resolved to no results"))
}

fn bind_listener(endpoint: &Endpoint) -> Result<ListenerSocket> {
    if endpoint.unix {
        let listener = UnixListener::bind(&endpoint.addr).map_err(Error::Io)?;
        Ok(ListenerSocket::Unix(listener))
    } else {
        let addr = resolve_addr(&endpoint.addr, endpoint.port)?;
        let listener = if endpoint.force {
            bind_tcp_with_reuseaddr(addr)?
        } else {
            TcpListener::bind(addr).map_err(Error::Io)?
        };
        Ok(ListenerSocket::Tcp(listener))
    }
}

/// Binds a listener with `SO_REUSEADDR` set (`endpoint.force`), letting a
/// restarted server rebind a port still lingering in `TIME_WAIT`.
fn bind_tcp_with_reuseaddr(addr: SocketAddr) -> Result<TcpListener> {
    let domain = if addr.is_ipv4() { socket2::Domain::IPV4 } else { socket2::Domain::IPV6 };
    let socket = socket2::Socket::new(domain, socket2::Type::STREAM, Some(socket2::Protocol::TCP)).map_err(Error::Io)?;
    socket.set_reuse_address(true).map_err(Error::Io)?;
    socket.bind(&addr.into()).map_err(Error::Io)?;
    socket.listen(1024).map_err(Error::Io)?;
    socket.set_nonblocking(true).map_err(Error::Io)?;
    Ok(TcpListener::from_std(socket.into()))
}

fn connect_stream(endpoint: &Endpoint) -> Result<PlainStream> {
    if endpoint.unix {
        let stream = UnixStream::connect(&endpoint.addr).map_err(Error::Io)?;
        Ok(PlainStream::Unix(stream))
    } else {
        let addr = resolve_addr(&endpoint.addr, endpoint.port)?;
        let stream = TcpStream::connect(addr).map_err(Error::Io)?;
        Ok(PlainStream::Tcp(stream))
    }
}

/// The single-threaded reactor façade. Owns every registered descriptor's
/// state and the user's callback; [`Api::service`] is the only thing a
/// caller needs to call in a loop.
pub struct Api {
    reactor: Reactor,
    connections: HashMap<Token, ConnectionRecord>,
    listeners: HashMap<Token, ListenerRecord>,
    callback: Option<UserCallback>,
    rx_limit: usize,
    session_counter: u64,
    waker: Option<Arc<Waker>>,
}

impl std::fmt::Debug for Api {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Api")
            .field("connections", &self.connections.len())
            .field("listeners", &self.listeners.len())
            .field("rx_limit", &self.rx_limit)
            .finish_non_exhaustive()
    }
}

impl Api {
    /// Builds a façade around a fresh reactor with room for 256 OS-reported
    /// events per tick, driven by `callback`.
    pub fn new(callback: UserCallback) -> Result<Self> {
        Self::with_capacity(callback, 256)
    }

    /// Like [`Api::new`], with an explicit per-tick event capacity.
    pub fn with_capacity(callback: UserCallback, event_capacity: usize) -> Result<Self> {
        let reactor = Reactor::new(event_capacity).map_err(Error::Io)?;
        Ok(Self {
            reactor,
            connections: HashMap::new(),
            listeners: HashMap::new(),
            callback: Some(callback),
            rx_limit: DEFAULT_RX_LIMIT,
            session_counter: 0,
            waker: None,
        })
    }

    /// Overrides the default back-pressure cap (`rx_limit`): a connection
    /// whose unconsumed `rx` bytes exceed this while a protocol message is
    /// still incomplete is disconnected.
    pub fn set_rx_limit(&mut self, bytes: usize) {
        self.rx_limit = bytes;
    }

    /// Enables a cross-thread wake source: [`Api::interrupt`] can then be
    /// called from another OS thread to break a blocked [`Api::service`]
    /// call early, delivered as [`Reason::Interrupt`].
    pub fn enable_waker(&mut self) -> Result<Arc<Waker>> {
        let waker = self.reactor.enable_waker().map_err(Error::Io)?;
        self.waker = Some(waker.clone());
        Ok(waker)
    }

    /// Wakes a blocked [`Api::service`] call. A no-op if
    /// [`Api::enable_waker`] was never called.
    pub fn interrupt(&self) -> io::Result<()> {
        match &self.waker {
            Some(w) => w.wake(),
            None => Ok(()),
        }
    }

    /// Binds and starts listening, dispatching `Accepted` for each new
    /// peer from then on.
    pub fn listen(&mut self, mut endpoint: Endpoint) -> Result<Token> {
        if endpoint.protocol == Protocol::None {
            return Err(Error::InvalidArgs("listen endpoint missing protocol"));
        }
        endpoint.role = Role::Server;

        let mut listener_socket = bind_listener(&endpoint)?;
        let interest = endpoint.events.unwrap_or(Interest::READABLE);
        let token = match &mut listener_socket {
            ListenerSocket::Tcp(l) => self.reactor.register(l, interest),
            ListenerSocket::Unix(l) => self.reactor.register(l, interest),
        }
        .map_err(Error::Registration)?;

        let tls_config = match &endpoint.tls {
            Some(TlsConfig::Server(cfg)) => Some(cfg.clone()),
            Some(TlsConfig::Bundle(bundle)) => Some(tls::server_config_from_bundle(bundle)?),
            Some(TlsConfig::Client(_)) => {
                return Err(Error::InvalidArgs("listen endpoint given a client TLS config"))
            }
            None => None,
        };

        self.listeners.insert(
            token,
            ListenerRecord {
                socket: listener_socket,
                protocol: endpoint.protocol,
                tls_config,
                ws_handshake: endpoint.ws_handshake,
            },
        );

        self.fire(token, 0, Reason::Listening, ProtoStatus::None);
        Ok(token)
    }

    /// Opens an outbound connection. `Connected` fires on the first
    /// writable event, per the role/reason table.
    pub fn connect(&mut self, mut endpoint: Endpoint) -> Result<Token> {
        if endpoint.protocol == Protocol::None {
            return Err(Error::InvalidArgs("connect endpoint missing protocol"));
        }
        endpoint.role = Role::Client;

        let transport = connect_stream(&endpoint)?;
        let remote = transport.peer_description();

        let socket = match &endpoint.tls {
            Some(tls_cfg) => {
                let client_cfg = match tls_cfg {
                    TlsConfig::Client(cfg) => cfg.clone(),
                    TlsConfig::Bundle(bundle) => tls::client_config_from_bundle(bundle)?,
                    TlsConfig::Server(_) => {
                        return Err(Error::InvalidArgs("connect endpoint given a server TLS config"))
                    }
                };
                let name = tls::server_name(&endpoint.addr)?;
                let side = TlsSide::new_client(client_cfg, name)?;
                Socket::tls(transport, side)
            }
            None => Socket::plain(transport),
        };
        let mut socket = socket;

        let interest = endpoint.events.unwrap_or(default_interest(Role::Client));
        let token = self.reactor.register(&mut socket, interest).map_err(Error::Registration)?;

        let session_id = self.next_session_id();
        let uri = endpoint.uri_or_default().to_string();
        let record = ConnectionRecord::new(
            socket,
            token,
            Role::Client,
            endpoint.protocol,
            remote,
            uri,
            session_id,
            endpoint.session_data.take(),
            interest,
            endpoint.ws_handshake,
        );
        self.connections.insert(token, record);
        Ok(token)
    }

    /// Adopts an externally-owned descriptor (`Peer`/`Custom` roles). The
    /// façade takes ownership of `endpoint.fd` and treats it as a
    /// non-blocking socket from this call onward.
    pub fn add_event(&mut self, mut endpoint: Endpoint) -> Result<Token> {
        if !matches!(endpoint.role, Role::Peer | Role::Custom) {
            return Err(Error::InvalidRole);
        }
        let fd = endpoint
            .fd
            .ok_or(Error::InvalidArgs("add_event endpoint missing fd"))?;

        // Safety: the caller is transferring ownership of an open, valid
        // socket descriptor to this reactor.
        let std_stream = unsafe { std::net::TcpStream::from_raw_fd(fd) };
        std_stream.set_nonblocking(true).map_err(Error::Io)?;
        let mut socket = Socket::plain(PlainStream::Tcp(TcpStream::from_std(std_stream)));

        let interest = endpoint.events.unwrap_or(default_interest(endpoint.role));
        let token = self.reactor.register(&mut socket, interest).map_err(Error::Registration)?;

        let remote = format!("fd:{fd}");
        let session_id = self.next_session_id();
        let uri = endpoint.uri_or_default().to_string();
        let record = ConnectionRecord::new(
            socket,
            token,
            endpoint.role,
            endpoint.protocol,
            remote,
            uri,
            session_id,
            endpoint.session_data.take(),
            interest,
            endpoint.ws_handshake,
        );
        self.connections.insert(token, record);
        self.fire(token, session_id, Reason::Registered, ProtoStatus::None);
        Ok(token)
    }

    /// Shorthand for [`Api::add_event`] that forces `role: Peer`.
    pub fn add_peer(&mut self, mut endpoint: Endpoint) -> Result<Token> {
        endpoint.role = Role::Peer;
        self.add_event(endpoint)
    }

    /// Dispatches to [`Api::listen`]/[`Api::connect`]/[`Api::add_event`]
    /// based on `endpoint.role`.
    pub fn add_endpoint(&mut self, endpoint: Endpoint) -> Result<Token> {
        match endpoint.role {
            Role::Server => self.listen(endpoint),
            Role::Client => self.connect(endpoint),
            Role::Peer | Role::Custom => self.add_event(endpoint),
            Role::Inactive => Err(Error::InvalidRole),
        }
    }

    /// Marks a connection for teardown once the current tick finishes
    /// flushing whatever is already queued in its `tx` buffer.
    pub fn disconnect(&mut self, token: Token) {
        if let Some(conn) = self.connections.get_mut(&token) {
            conn.cancel = true;
        }
    }

    /// Arms (or rearms) a one-shot timer for `token`, firing
    /// [`Reason::Timeout`] after `timeout_ms`.
    pub fn add_timer(&mut self, token: Token, timeout_ms: u64) {
        let timer_token = match self.connections.get(&token).and_then(|c| c.timer_token) {
            Some(t) => t,
            None => self.reactor.allocate_timer(),
        };
        if let Some(conn) = self.connections.get_mut(&token) {
            conn.timer_token = Some(timer_token);
        }
        self.reactor.set_timer(timer_token, Duration::from_millis(timeout_ms), Instant::now());
    }

    /// Rearms an already-armed timer with a new deadline; a no-op if
    /// `token` has no timer armed.
    pub fn extend_timer(&mut self, token: Token, timeout_ms: u64) {
        let Some(timer_token) = self.connections.get(&token).and_then(|c| c.timer_token) else {
            return;
        };
        self.reactor.set_timer(timer_token, Duration::from_millis(timeout_ms), Instant::now());
    }

    /// Cancels `token`'s timer, if any.
    pub fn delete_timer(&mut self, token: Token) {
        if let Some(conn) = self.connections.get_mut(&token) {
            if let Some(timer_token) = conn.timer_token.take() {
                self.reactor.cancel_timer(timer_token);
            }
        }
    }

    /// Replaces `token`'s readiness interest mask outright.
    pub fn set_events(&mut self, token: Token, interest: Interest) {
        self.apply_interest(token, interest);
    }

    /// Adds bits to `token`'s readiness interest mask.
    pub fn enable_event(&mut self, token: Token, interest: Interest) {
        let Some(conn) = self.connections.get(&token) else { return };
        self.apply_interest(token, conn.interest | interest);
    }

    /// Removes bits from `token`'s readiness interest mask.
    pub fn disable_event(&mut self, token: Token, interest: Interest) {
        let Some(conn) = self.connections.get(&token) else { return };
        self.apply_interest(token, conn.interest & !interest);
    }

    fn apply_interest(&mut self, token: Token, interest: Interest) {
        let Some(conn) = self.connections.get_mut(&token) else { return };
        if self.reactor.modify(token, &mut conn.socket, interest).is_ok() {
            conn.interest = interest;
        }
    }

    /// Queues `data` for writing and ensures `token` is registered
    /// writable.
    pub fn put_tx(&mut self, token: Token, data: &[u8]) {
        if let Some(conn) = self.connections.get_mut(&token) {
            conn.tx.put(data);
        }
        self.sync_interest(token);
    }

    /// Direct access to `token`'s transmit buffer.
    pub fn get_tx(&mut self, token: Token) -> Option<&mut Buffer> {
        self.connections.get_mut(&token).map(|c| &mut c.tx)
    }

    /// Direct access to `token`'s receive buffer.
    pub fn get_rx(&mut self, token: Token) -> Option<&mut Buffer> {
        self.connections.get_mut(&token).map(|c| &mut c.rx)
    }

    /// Read-only access to `token`'s opaque session pointer.
    pub fn session_data(&self, token: Token) -> Option<&(dyn std::any::Any + Send)> {
        self.connections.get(&token).and_then(|c| c.session_data.as_deref())
    }

    /// Mutable access to `token`'s opaque session pointer.
    pub fn session_data_mut(&mut self, token: Token) -> Option<&mut (dyn std::any::Any + Send)> {
        self.connections.get_mut(&token).and_then(|c| c.session_data.as_deref_mut())
    }

    /// Replaces `token`'s opaque session pointer outright. Typically
    /// called from the `Accepted` callback, since accepted peers never
    /// inherit their listener's `session_data`.
    pub fn set_session_data(&mut self, token: Token, data: SessionData) {
        if let Some(conn) = self.connections.get_mut(&token) {
            conn.session_data = data;
        }
    }

    /// The parsed HTTP start-line, once headers have been seen.
    pub fn http_start_line(&self, token: Token) -> Option<&StartLine> {
        match &self.connections.get(&token)?.codec {
            Codec::Http(p) => p.start_line(),
            _ => None,
        }
    }

    /// Looks up a header on `token`'s current HTTP message.
    pub fn http_header(&self, token: Token, name: &str) -> Option<&str> {
        match &self.connections.get(&token)?.codec {
            Codec::Http(p) => p.get_header(name),
            _ => None,
        }
    }

    /// The body bytes of `token`'s current HTTP message.
    pub fn http_body(&self, token: Token) -> Option<&[u8]> {
        match &self.connections.get(&token)?.codec {
            Codec::Http(p) => Some(p.body()),
            _ => None,
        }
    }

    /// The most recently completed WS frame; only meaningful during the
    /// `Read` callback that announced it.
    pub fn ws_frame(&self, token: Token) -> Option<&Frame> {
        self.connections.get(&token)?.ws_frame_in.as_ref()
    }

    /// The most recently completed packet; only meaningful during the
    /// `Read` callback that announced it.
    pub fn packet(&self, token: Token) -> Option<&(PacketHeader, Vec<u8>)> {
        self.connections.get(&token)?.packet_in.as_ref()
    }

    /// Queues a canonical `{"status":"<reason>"}` JSON response and nudges
    /// the reactor to flush it (spec §4.2/§7). `api_status`, when given,
    /// supplies the `reason` text instead of `status`'s own reason phrase;
    /// a `MissingToken` api_status also appends `WWW-Authenticate: Basic
    /// realm="XAPI"`.
    pub fn respond_http(&mut self, token: Token, status: StatusCode, api_status: Option<ApiStatus>) -> Result<()> {
        let Some(conn) = self.connections.get_mut(&token) else {
            return Err(Error::InvalidArgs("respond_http: unknown token"));
        };
        let reason = api_status.map(ApiStatus::reason).unwrap_or_else(|| status.reason_phrase());
        let body = format!(r#"{{"status":"{reason}"}}"#);

        let mut assembler = Assembler::init_response(status as u16, status.reason_phrase(), Version::Http11);
        assembler.add_header("Content-Type", "application/json");
        if api_status == Some(ApiStatus::MissingToken) {
            assembler.add_header("WWW-Authenticate", r#"Basic realm="XAPI""#);
        }
        let bytes = assembler.assemble(body.as_bytes());
        conn.tx.put(&bytes);
        self.sync_interest(token);
        Ok(())
    }

    /// Checks `token`'s current HTTP request's `X-API-KEY`/`Authorization`
    /// headers against expected values. Returns `None` when authorized,
    /// `Some(status)` naming the failure otherwise. Passing `None` for
    /// both expected values always authorizes. The API key is checked
    /// first, independently of the bearer token, matching the original
    /// library's `XAPI_Authorize` priority order (api key, then token).
    pub fn authorize_http(
        &self,
        token: Token,
        expected_bearer: Option<&str>,
        expected_api_key: Option<&str>,
    ) -> Option<ApiStatus> {
        if expected_bearer.is_none() && expected_api_key.is_none() {
            return None;
        }
        let conn = self.connections.get(&token)?;
        let Codec::Http(parser) = &conn.codec else {
            return Some(ApiStatus::InvalidArgs);
        };

        if let Some(expected) = expected_api_key {
            match parser.get_header("x-api-key") {
                None => return Some(ApiStatus::MissingKey),
                Some(presented) if presented != expected => return Some(ApiStatus::InvalidKey),
                Some(_) => {}
            }
        }

        if let Some(expected) = expected_bearer {
            let presented = parser.get_header("authorization").and_then(|v| v.strip_prefix("Basic "));
            match presented {
                None => return Some(ApiStatus::MissingToken),
                Some(presented) if presented != expected => return Some(ApiStatus::InvalidToken),
                Some(_) => {}
            }
        }

        None
    }

    /// Tears every connection and listener down, firing `Status(Destroy)`
    /// then `Closed` for each live connection first. Idempotent; also run
    /// by `Drop`.
    pub fn shutdown(&mut self) {
        let tokens: Vec<Token> = self.connections.keys().copied().collect();
        for token in tokens {
            let sid = self.session_id_of(token);
            let _ = self.fire(token, sid, Reason::Status, ProtoStatus::Api(ApiStatus::Destroy));
            self.teardown(token);
        }

        let listener_tokens: Vec<Token> = self.listeners.keys().copied().collect();
        for token in listener_tokens {
            if let Some(mut listener) = self.listeners.remove(&token) {
                match &mut listener.socket {
                    ListenerSocket::Tcp(l) => self.reactor.delete(token, l),
                    ListenerSocket::Unix(l) => self.reactor.delete(token, l),
                }
            }
        }
    }

    /// Polls for readiness, dispatching every event observed this tick.
    /// Blocks up to `timeout_ms` (or indefinitely if `None`) when nothing
    /// is ready.
    pub fn service(&mut self, timeout_ms: Option<u64>) -> io::Result<ServiceStatus> {
        let timeout = timeout_ms.map(Duration::from_millis);
        let (status, events) = self.reactor.poll_events(timeout)?;

        let mut i = 0;
        while i < events.len() {
            let (token, reason) = events[i];
            let directive = self.dispatch(token, reason);
            if directive == Directive::Reloop {
                i = 0;
                continue;
            }
            i += 1;
        }

        Ok(status)
    }

    fn next_session_id(&mut self) -> u64 {
        self.session_counter += 1;
        self.session_counter
    }

    fn session_id_of(&self, token: Token) -> u64 {
        self.connections.get(&token).map(|c| c.session_id).unwrap_or(0)
    }

    fn fire(&mut self, token: Token, session_id: u64, reason: Reason, status: ProtoStatus) -> Disposition {
        let ctx = Ctx::with_status(reason, token, session_id, status);
        let mut cb = self.callback.take();
        let disposition = match cb.as_mut() {
            Some(cb) => {
                let mut d = cb(self, ctx);
                // Bounded, not unbounded: a callback returning `UserCallback`
                // forever would otherwise spin this loop without end.
                let mut guard = 0;
                while d == Disposition::UserCallback && guard < 64 {
                    d = cb(self, Ctx::new(Reason::User, token, session_id));
                    guard += 1;
                }
                d
            }
            None => Disposition::Continue,
        };
        self.callback = cb;
        disposition
    }

    fn fire_global(&mut self, reason: Reason) {
        let mut cb = self.callback.take();
        if let Some(cb) = cb.as_mut() {
            let _ = cb(self, Ctx::new(reason, Token(usize::MAX), 0));
        }
        self.callback = cb;
    }

    fn dispatch(&mut self, token: Token, reason: ReactorReason) -> Directive {
        if reason == ReactorReason::UserWake {
            self.fire_global(Reason::Interrupt);
            return Directive::Continue;
        }
        if self.listeners.contains_key(&token) {
            return self.dispatch_listener(token, reason);
        }
        if self.connections.contains_key(&token) {
            return self.dispatch_connection(token, reason);
        }
        // Stale token: the record was deleted earlier in this same tick.
        Directive::Continue
    }

    fn dispatch_listener(&mut self, token: Token, reason: ReactorReason) -> Directive {
        if reason != ReactorReason::Readable {
            return Directive::Continue;
        }

        loop {
            let Some(listener) = self.listeners.get_mut(&token) else { break };
            let accepted = match &mut listener.socket {
                ListenerSocket::Tcp(l) => l.accept().map(|(s, addr)| (PlainStream::Tcp(s), addr.to_string())),
                ListenerSocket::Unix(l) => l.accept().map(|(s, addr)| {
                    let desc = addr
                        .as_pathname()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "unix:unknown".to_string());
                    (PlainStream::Unix(s), desc)
                }),
            };

            let (transport, remote) = match accepted {
                Ok(pair) => pair,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(target: "service", "accept failed: {e}");
                    break;
                }
            };

            let protocol = listener.protocol;
            let tls_config = listener.tls_config.clone();
            let ws_handshake = listener.ws_handshake;

            let mut socket = match tls_config {
                Some(cfg) => match TlsSide::new_server(cfg) {
                    Ok(side) => Socket::tls(transport, side),
                    Err(e) => {
                        error!(target: "service", "tls setup failed for accepted peer: {e}");
                        continue;
                    }
                },
                None => Socket::plain(transport),
            };

            let interest = Interest::READABLE;
            let peer_token = match self.reactor.register(&mut socket, interest) {
                Ok(t) => t,
                Err(e) => {
                    error!(target: "service", "failed to register accepted peer: {e}");
                    continue;
                }
            };

            let session_id = self.next_session_id();
            let record = ConnectionRecord::new(
                socket,
                peer_token,
                Role::Peer,
                protocol,
                remote,
                String::new(),
                session_id,
                None,
                interest,
                ws_handshake,
            );
            self.connections.insert(peer_token, record);
            self.fire(peer_token, session_id, Reason::Accepted, ProtoStatus::None);
        }

        Directive::Continue
    }

    fn dispatch_connection(&mut self, token: Token, reason: ReactorReason) -> Directive {
        let directive = match reason {
            ReactorReason::Closed => {
                let sid = self.session_id_of(token);
                let _ = self.fire(token, sid, Reason::Status, ProtoStatus::Api(ApiStatus::Closed));
                self.teardown(token);
                return Directive::Disconnect;
            }
            ReactorReason::Hung => {
                let sid = self.session_id_of(token);
                let _ = self.fire(token, sid, Reason::Status, ProtoStatus::Api(ApiStatus::Hunged));
                self.teardown(token);
                return Directive::Disconnect;
            }
            ReactorReason::TimerFired => self.on_timer(token),
            ReactorReason::Readable => self.on_readable(token),
            ReactorReason::Writable => self.on_writable(token),
            ReactorReason::UserWake => Directive::Continue,
        };

        let cancel = self.connections.get(&token).map(|c| c.cancel).unwrap_or(false);
        if cancel || directive == Directive::Disconnect {
            if self.connections.contains_key(&token) {
                self.teardown(token);
            }
            return Directive::Disconnect;
        }
        directive
    }

    fn teardown(&mut self, token: Token) {
        if let Some(mut conn) = self.connections.remove(&token) {
            if let Some(timer) = conn.timer_token.take() {
                self.reactor.cancel_timer(timer);
            }
            self.reactor.delete(token, &mut conn.socket);
            self.fire(token, conn.session_id, Reason::Closed, ProtoStatus::None);
        }
    }

    fn on_timer(&mut self, token: Token) -> Directive {
        if let Some(conn) = self.connections.get_mut(&token) {
            conn.timer_token = None;
        }
        let sid = self.session_id_of(token);
        map_disposition(self.fire(token, sid, Reason::Timeout, ProtoStatus::None))
    }

    fn sync_interest(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else { return };
        let target = conn.socket.desired_interest(conn.tx.has_data());
        if target == conn.interest {
            conn.cross = CrossDirection::default();
            return;
        }

        conn.cross.write_on_read = target.contains(Interest::READABLE)
            && !target.contains(Interest::WRITABLE)
            && conn.interest.contains(Interest::WRITABLE);
        conn.cross.read_on_write = target.contains(Interest::WRITABLE)
            && !target.contains(Interest::READABLE)
            && conn.interest.contains(Interest::READABLE);
        conn.cross.saved_interest = Some(conn.interest);

        if self.reactor.modify(token, &mut conn.socket, target).is_ok() {
            conn.interest = target;
        }
    }

    fn on_readable(&mut self, token: Token) -> Directive {
        let Some(conn) = self.connections.get_mut(&token) else { return Directive::Continue };
        let read_result = conn.socket.read_ready(&mut conn.rx);
        self.sync_interest(token);

        match read_result {
            Ok(SocketStatus::HandshakeInProgress) | Ok(SocketStatus::WouldBlock) => Directive::Continue,
            Ok(SocketStatus::Eof) => self.handle_eof(token),
            Ok(SocketStatus::Progress(_)) => self.drain_protocol(token),
            Err(e) => {
                warn!(target: "service", "read on {token:?} failed: {e}");
                let sid = self.session_id_of(token);
                let d = self.fire(token, sid, Reason::Error, ProtoStatus::Socket(SocketErrorKind::Error));
                if d == Disposition::Continue {
                    Directive::Continue
                } else {
                    Directive::Disconnect
                }
            }
        }
    }

    fn handle_eof(&mut self, token: Token) -> Directive {
        if let Some(conn) = self.connections.get_mut(&token) {
            if let Codec::Http(parser) = &mut conn.codec {
                if parser.awaiting_eof() {
                    parser.finish_at_eof();
                    return self.drain_protocol(token);
                }
            }
        }
        let sid = self.session_id_of(token);
        let _ = self.fire(token, sid, Reason::Status, ProtoStatus::Api(ApiStatus::Closed));
        Directive::Disconnect
    }

    fn on_writable(&mut self, token: Token) -> Directive {
        let sid = self.session_id_of(token);

        // `Connected` only ever fires for outbound `Client` connections: it
        // marks the first writable event as standing in for non-blocking
        // connect completion (spec §4.2's `connect` operation). Accepted
        // peers and adopted descriptors skip straight to `Write`/`Complete`.
        let needs_connected = self
            .connections
            .get(&token)
            .map(|c| c.role == Role::Client && !c.connected_fired)
            .unwrap_or(false);
        if needs_connected {
            if let Some(conn) = self.connections.get_mut(&token) {
                conn.connected_fired = true;
            }
            if self.fire(token, sid, Reason::Connected, ProtoStatus::None) == Disposition::Disconnect {
                return Directive::Disconnect;
            }
        }

        let needs_handshake_request = self
            .connections
            .get(&token)
            .map(|c| c.role == Role::Client && !c.handshake_started && matches!(c.codec, Codec::Ws { handshake: Some(_), .. }))
            .unwrap_or(false);
        if needs_handshake_request {
            self.send_ws_handshake_request(token);
            if self.fire(token, sid, Reason::HandshakeRequest, ProtoStatus::None) == Disposition::Disconnect {
                return Directive::Disconnect;
            }
        }

        let Some(conn) = self.connections.get_mut(&token) else { return Directive::Continue };
        let had_data = conn.tx.has_data();
        let write_result = conn.socket.write_ready(&mut conn.tx);
        self.sync_interest(token);

        match write_result {
            Ok(SocketStatus::Progress(_)) => {
                let drained = self.connections.get(&token).map(|c| !c.tx.has_data()).unwrap_or(true);
                // A WS connection's handshake bytes (the 101 response or
                // the GET upgrade request) flush through this same drain
                // path; spec §4.2 withholds `Complete` for that one flush.
                // `handshake_done` flips true the instant those bytes are
                // queued, before they're actually written, so the flush
                // that drains them is tracked separately via
                // `handshake_flush_pending` instead.
                let flushing_handshake = self.connections.get(&token).map(|c| c.handshake_flush_pending).unwrap_or(false);
                if drained && flushing_handshake {
                    if let Some(conn) = self.connections.get_mut(&token) {
                        conn.handshake_flush_pending = false;
                    }
                }
                if had_data && drained && !flushing_handshake {
                    let raw = self
                        .connections
                        .get(&token)
                        .map(|c| c.role == Role::Custom || matches!(c.codec, Codec::Raw))
                        .unwrap_or(true);
                    let reason = if raw { Reason::Write } else { Reason::Complete };
                    map_disposition(self.fire(token, sid, reason, ProtoStatus::None))
                } else {
                    Directive::Continue
                }
            }
            Ok(SocketStatus::WouldBlock) | Ok(SocketStatus::HandshakeInProgress) => Directive::Continue,
            Ok(SocketStatus::Eof) => Directive::Disconnect,
            Err(e) => {
                warn!(target: "service", "write on {token:?} failed: {e}");
                let d = self.fire(token, sid, Reason::Error, ProtoStatus::Socket(SocketErrorKind::Error));
                if d == Disposition::Continue {
                    Directive::Continue
                } else {
                    Directive::Disconnect
                }
            }
        }
    }

    fn send_ws_handshake_request(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else { return };
        let Codec::Ws { client_nonce, .. } = &conn.codec else { return };
        let nonce = client_nonce.clone().unwrap_or_default();
        let uri = conn.uri.clone();

        let mut request = Assembler::init_request(Method::Get, uri, Version::Http11);
        request.add_header("Upgrade", "websocket");
        request.add_header("Connection", "Upgrade");
        request.add_header("Sec-WebSocket-Key", nonce);
        request.add_header("Sec-WebSocket-Version", "13");
        let bytes = request.assemble(&[]);

        conn.tx.put(&bytes);
        conn.handshake_started = true;
        conn.handshake_flush_pending = true;
    }

    fn drain_protocol(&mut self, token: Token) -> Directive {
        loop {
            let Some(conn) = self.connections.get(&token) else { return Directive::Continue };
            let kind = codec_kind(conn);
            let sid = conn.session_id;

            let outcome = match kind {
                CodecKind::Raw => {
                    DrainOutcome::Directive(map_disposition(self.fire(token, sid, Reason::Read, ProtoStatus::None)))
                }
                CodecKind::Packet => self.drain_packet(token, sid),
                CodecKind::Http => self.drain_http(token, sid),
                CodecKind::WsHandshake => self.drain_ws_handshake(token, sid),
                CodecKind::WsFrame => self.drain_ws_frame(token, sid),
            };

            match outcome {
                DrainOutcome::Again => continue,
                DrainOutcome::Directive(d) => return d,
            }
        }
    }

    fn drain_packet(&mut self, token: Token, sid: u64) -> DrainOutcome {
        let Some(conn) = self.connections.get_mut(&token) else {
            return DrainOutcome::Directive(Directive::Continue);
        };
        let Codec::Packet(parser) = &mut conn.codec else { unreachable!() };
        let result = parser.parse(&mut conn.rx);
        let over_limit = conn.rx.remaining() > self.rx_limit;

        match result {
            Ok(packet::ParseStatus::Incomplete) => {
                if over_limit {
                    let _ = self.fire(token, sid, Reason::Error, ProtoStatus::Packet(PacketError::BigData));
                    return DrainOutcome::Directive(Directive::Disconnect);
                }
                DrainOutcome::Directive(Directive::Continue)
            }
            Ok(packet::ParseStatus::Parsed) => DrainOutcome::Directive(Directive::Continue),
            Ok(packet::ParseStatus::Complete) => {
                let Some(conn) = self.connections.get_mut(&token) else {
                    return DrainOutcome::Directive(Directive::Continue);
                };
                let Codec::Packet(parser) = &mut conn.codec else { unreachable!() };
                conn.packet_in = Some(parser.take());

                let d = self.fire(token, sid, Reason::Read, ProtoStatus::None);
                let has_more = match self.connections.get_mut(&token) {
                    Some(conn) => {
                        conn.packet_in = None;
                        conn.rx.has_data()
                    }
                    None => false,
                };

                match d {
                    Disposition::Disconnect => DrainOutcome::Directive(Directive::Disconnect),
                    Disposition::Reloop => DrainOutcome::Directive(Directive::Reloop),
                    _ if has_more => DrainOutcome::Again,
                    _ => DrainOutcome::Directive(Directive::Continue),
                }
            }
            Err(e) => {
                let _ = self.fire(token, sid, Reason::Error, ProtoStatus::Packet(e));
                DrainOutcome::Directive(Directive::Disconnect)
            }
        }
    }

    fn drain_http(&mut self, token: Token, sid: u64) -> DrainOutcome {
        let Some(conn) = self.connections.get_mut(&token) else {
            return DrainOutcome::Directive(Directive::Continue);
        };
        let Codec::Http(parser) = &mut conn.codec else { unreachable!() };
        let result = parser.parse(&mut conn.rx);
        let over_limit = conn.rx.remaining() > self.rx_limit;

        match result {
            Ok(http::ParseStatus::Incomplete) => {
                if over_limit {
                    let _ = self.fire(token, sid, Reason::Error, ProtoStatus::Http(HttpError::BigContent));
                    return DrainOutcome::Directive(Directive::Disconnect);
                }
                DrainOutcome::Directive(Directive::Continue)
            }
            Ok(http::ParseStatus::Parsed) => DrainOutcome::Directive(Directive::Continue),
            Ok(http::ParseStatus::Complete) => {
                let d = self.fire(token, sid, Reason::Read, ProtoStatus::None);
                let has_more = match self.connections.get_mut(&token) {
                    Some(conn) => {
                        if let Codec::Http(parser) = &mut conn.codec {
                            parser.clear();
                        }
                        conn.rx.has_data()
                    }
                    None => false,
                };

                match d {
                    Disposition::Disconnect => DrainOutcome::Directive(Directive::Disconnect),
                    Disposition::Reloop => DrainOutcome::Directive(Directive::Reloop),
                    _ if has_more => DrainOutcome::Again,
                    _ => DrainOutcome::Directive(Directive::Continue),
                }
            }
            Err(e) => {
                let _ = self.fire(token, sid, Reason::Error, ProtoStatus::Http(e));
                DrainOutcome::Directive(Directive::Disconnect)
            }
        }
    }

    fn drain_ws_handshake(&mut self, token: Token, sid: u64) -> DrainOutcome {
        let is_client = self.connections.get(&token).map(|c| c.role == Role::Client).unwrap_or(false);
        if is_client {
            self.drain_ws_handshake_client(token, sid)
        } else {
            self.drain_ws_handshake_server(token, sid)
        }
    }

    fn drain_ws_handshake_server(&mut self, token: Token, sid: u64) -> DrainOutcome {
        let Some(conn) = self.connections.get_mut(&token) else {
            return DrainOutcome::Directive(Directive::Continue);
        };
        let Codec::Ws { handshake: Some(parser), .. } = &mut conn.codec else {
            return DrainOutcome::Directive(Directive::Continue);
        };
        let result = parser.parse(&mut conn.rx);

        match result {
            Ok(http::ParseStatus::Incomplete) | Ok(http::ParseStatus::Parsed) => {
                DrainOutcome::Directive(Directive::Continue)
            }
            Ok(http::ParseStatus::Complete) => {
                let upgrade_ok = parser.get_header("upgrade").is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
                let key = parser.get_header("sec-websocket-key").map(str::to_string);

                if !upgrade_ok {
                    let _ = self.fire(token, sid, Reason::Error, ProtoStatus::Ws(WsError::NotAnUpgrade));
                    return DrainOutcome::Directive(Directive::Disconnect);
                }
                let key = match key {
                    Some(key) => key,
                    None if conn.ws_handshake.allow_missing_key => {
                        let _ = self.fire(token, sid, Reason::Status, ProtoStatus::Ws(WsError::MissingKey));
                        String::new()
                    }
                    None => {
                        let _ = self.fire(token, sid, Reason::Error, ProtoStatus::Ws(WsError::MissingKey));
                        return DrainOutcome::Directive(Directive::Disconnect);
                    }
                };

                if self.fire(token, sid, Reason::HandshakeRequest, ProtoStatus::None) == Disposition::Disconnect {
                    return DrainOutcome::Directive(Directive::Disconnect);
                }

                let accept = ws::accept_key(&key);
                let mut response = Assembler::init_response(
                    StatusCode::SwitchingProtocols as u16,
                    StatusCode::SwitchingProtocols.reason_phrase(),
                    Version::Http11,
                );
                response.add_header("Upgrade", "websocket");
                response.add_header("Connection", "Upgrade");
                response.add_header("Sec-WebSocket-Accept", accept);
                let bytes = response.assemble(&[]);

                let has_more = match self.connections.get_mut(&token) {
                    Some(conn) => {
                        conn.tx.put(&bytes);
                        if let Codec::Ws { handshake, .. } = &mut conn.codec {
                            *handshake = None;
                        }
                        conn.handshake_done = true;
                        conn.handshake_flush_pending = true;
                        conn.rx.has_data()
                    }
                    None => false,
                };

                self.sync_interest(token);
                let d = self.fire(token, sid, Reason::HandshakeAnswer, ProtoStatus::None);
                match d {
                    Disposition::Disconnect => DrainOutcome::Directive(Directive::Disconnect),
                    Disposition::Reloop => DrainOutcome::Directive(Directive::Reloop),
                    _ if has_more => DrainOutcome::Again,
                    _ => DrainOutcome::Directive(Directive::Continue),
                }
            }
            Err(e) => {
                let _ = self.fire(token, sid, Reason::Error, ProtoStatus::Http(e));
                DrainOutcome::Directive(Directive::Disconnect)
            }
        }
    }

    fn drain_ws_handshake_client(&mut self, token: Token, sid: u64) -> DrainOutcome {
        let Some(conn) = self.connections.get_mut(&token) else {
            return DrainOutcome::Directive(Directive::Continue);
        };
        let Codec::Ws { handshake: Some(parser), client_nonce, .. } = &mut conn.codec else {
            return DrainOutcome::Directive(Directive::Continue);
        };
        let nonce = client_nonce.clone().unwrap_or_default();
        let result = parser.parse(&mut conn.rx);

        match result {
            Ok(http::ParseStatus::Incomplete) | Ok(http::ParseStatus::Parsed) => {
                DrainOutcome::Directive(Directive::Continue)
            }
            Ok(http::ParseStatus::Complete) => {
                let is_101 = matches!(parser.start_line(), Some(StartLine::Response { code: 101, .. }));
                let accept = parser.get_header("sec-websocket-accept").map(str::to_string);
                let valid = is_101 && accept.as_deref().is_some_and(|a| ws::validate_accept(&nonce, a));

                if !valid {
                    let _ = self.fire(token, sid, Reason::Error, ProtoStatus::Ws(WsError::AcceptMismatch));
                    return DrainOutcome::Directive(Directive::Disconnect);
                }

                // The client flips `handshake_done` before firing
                // `HandshakeResponse`, not after (matches the original's
                // `XAPI_AnswerUpgrade` ordering).
                let has_more = match self.connections.get_mut(&token) {
                    Some(conn) => {
                        if let Codec::Ws { handshake, .. } = &mut conn.codec {
                            *handshake = None;
                        }
                        conn.handshake_done = true;
                        conn.rx.has_data()
                    }
                    None => false,
                };

                let d = self.fire(token, sid, Reason::HandshakeResponse, ProtoStatus::None);
                match d {
                    Disposition::Disconnect => DrainOutcome::Directive(Directive::Disconnect),
                    Disposition::Reloop => DrainOutcome::Directive(Directive::Reloop),
                    _ if has_more => DrainOutcome::Again,
                    _ => DrainOutcome::Directive(Directive::Continue),
                }
            }
            Err(e) => {
                let _ = self.fire(token, sid, Reason::Error, ProtoStatus::Http(e));
                DrainOutcome::Directive(Directive::Disconnect)
            }
        }
    }

    fn drain_ws_frame(&mut self, token: Token, sid: u64) -> DrainOutcome {
        let Some(conn) = self.connections.get_mut(&token) else {
            return DrainOutcome::Directive(Directive::Continue);
        };
        let Codec::Ws { frames, .. } = &mut conn.codec else { unreachable!() };
        let result = frames.parse(&mut conn.rx);
        let over_limit = conn.rx.remaining() > self.rx_limit;

        match result {
            Ok(ws::ParseStatus::Incomplete) => {
                if over_limit {
                    let _ = self.fire(token, sid, Reason::Error, ProtoStatus::Ws(WsError::BigData));
                    return DrainOutcome::Directive(Directive::Disconnect);
                }
                DrainOutcome::Directive(Directive::Continue)
            }
            Ok(ws::ParseStatus::Parsed) => DrainOutcome::Directive(Directive::Continue),
            Ok(ws::ParseStatus::Complete) => {
                let Some(conn) = self.connections.get_mut(&token) else {
                    return DrainOutcome::Directive(Directive::Continue);
                };
                let Codec::Ws { frames, .. } = &mut conn.codec else { unreachable!() };
                conn.ws_frame_in = Some(frames.take());

                let d = self.fire(token, sid, Reason::Read, ProtoStatus::None);
                let has_more = match self.connections.get_mut(&token) {
                    Some(conn) => {
                        conn.ws_frame_in = None;
                        conn.rx.has_data()
                    }
                    None => false,
                };

                match d {
                    Disposition::Disconnect => DrainOutcome::Directive(Directive::Disconnect),
                    Disposition::Reloop => DrainOutcome::Directive(Directive::Reloop),
                    _ if has_more => DrainOutcome::Again,
                    _ => DrainOutcome::Directive(Directive::Continue),
                }
            }
            Err(e) => {
                let _ = self.fire(token, sid, Reason::Error, ProtoStatus::Ws(e));
                DrainOutcome::Directive(Directive::Disconnect)
            }
        }
    }
}

impl Drop for Api {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{Endpoint, Protocol};

    fn noop_callback() -> UserCallback {
        Box::new(|_api, ctx| {
            let _ = ctx;
            Disposition::Continue
        })
    }

    #[test]
    fn listen_assigns_a_token_and_fires_listening() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let callback: UserCallback = Box::new(move |_api, ctx| {
            seen_cb.lock().unwrap().push(ctx.reason);
            Disposition::Continue
        });

        let mut api = Api::new(callback).expect("api construction");
        let token = api
            .listen(Endpoint::server("127.0.0.1", 0, Protocol::Http))
            .expect("listen");
        assert!(api.listeners.contains_key(&token));
        assert_eq!(seen.lock().unwrap().as_slice(), [Reason::Listening]);
    }

    #[test]
    fn disconnect_marks_cancel_without_removing_the_record() {
        let mut api = Api::new(noop_callback()).expect("api construction");
        let listener_token = api
            .listen(Endpoint::server("127.0.0.1", 0, Protocol::Raw))
            .expect("listen");
        let _ = listener_token;

        // No live connections yet; disconnect on an unknown token is a
        // harmless no-op.
        api.disconnect(Token(9999));
    }

    #[test]
    fn rx_limit_defaults_to_the_documented_cap() {
        let api = Api::new(noop_callback()).expect("api construction");
        assert_eq!(api.rx_limit, DEFAULT_RX_LIMIT);
    }
}
