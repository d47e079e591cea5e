//! The unified socket type every connection record drives.
//!
//! Generalizes the teacher's `PlainConnection`/`TlsConnection` split (which
//! was hard-coded to `TcpStream`) into one [`Socket`] enum spanning TCP,
//! Unix domain sockets, and an optional TLS layer over either transport.

use std::{
    io::{self, ErrorKind, Read, Write},
    net::SocketAddr,
    os::unix::net::SocketAddr as UnixSocketAddr,
};

use mio::{event::Source, net::TcpStream, net::UnixStream, Interest as MioInterest, Registry, Token};

use super::tls::TlsSide;
use crate::buffer::Buffer;

/// The bare transport, without any TLS layer.
#[derive(Debug)]
pub enum PlainStream {
    /// A connected TCP stream.
    Tcp(TcpStream),
    /// A connected Unix domain stream.
    Unix(UnixStream),
}

impl PlainStream {
    /// The peer's address, formatted for logging; Unix sockets often have
    /// no meaningful peer address, in which case the socket path is used.
    pub fn peer_description(&self) -> String {
        match self {
            Self::Tcp(s) => s
                .peer_addr()
                .map(|a: SocketAddr| a.to_string())
                .unwrap_or_else(|_| "tcp:unknown".to_string()),
            Self::Unix(s) => s
                .peer_addr()
                .ok()
                .and_then(|a: UnixSocketAddr| a.as_pathname().map(|p| p.display().to_string()))
                .unwrap_or_else(|| "unix:unknown".to_string()),
        }
    }
}

impl Read for PlainStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.read(buf),
            Self::Unix(s) => s.read(buf),
        }
    }
}

impl Write for PlainStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.write(buf),
            Self::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.flush(),
            Self::Unix(s) => s.flush(),
        }
    }
}

impl Source for PlainStream {
    fn register(&mut self, registry: &Registry, token: Token, interests: MioInterest) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.register(registry, token, interests),
            Self::Unix(s) => s.register(registry, token, interests),
        }
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interests: MioInterest) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.reregister(registry, token, interests),
            Self::Unix(s) => s.reregister(registry, token, interests),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.deregister(registry),
            Self::Unix(s) => s.deregister(registry),
        }
    }
}

/// A transport, optionally secured with TLS.
#[derive(Debug)]
pub enum Socket {
    /// Raw TCP or Unix stream, no encryption.
    Plain(PlainStream),
    /// TLS over a TCP or Unix stream.
    Tls {
        /// The underlying transport TLS records are read from/written to.
        transport: PlainStream,
        /// TLS connection state.
        tls: TlsSide,
    },
}

/// Outcome of a single read or write attempt on a [`Socket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketStatus {
    /// `n` bytes of application data moved.
    Progress(usize),
    /// Nothing more to do right now without blocking.
    WouldBlock,
    /// The peer closed its end (0-length read).
    Eof,
    /// TLS handshake consumed this readiness event; no application data
    /// moved yet.
    HandshakeInProgress,
}

impl Socket {
    /// Wraps a plain transport with no encryption.
    pub fn plain(transport: PlainStream) -> Self {
        Self::Plain(transport)
    }

    /// Wraps a transport in a TLS session.
    pub fn tls(transport: PlainStream, tls: TlsSide) -> Self {
        Self::Tls { transport, tls }
    }

    /// `true` while a TLS handshake is still in progress; always `false`
    /// for a `Plain` socket.
    pub fn is_handshaking(&self) -> bool {
        matches!(self, Self::Tls { tls, .. } if tls.is_handshaking())
    }

    /// Pumps one readiness-driven read, appending any application data
    /// read into `rx`.
    pub fn read_ready(&mut self, rx: &mut Buffer) -> io::Result<SocketStatus> {
        match self {
            Self::Plain(transport) => read_plain(transport, rx),
            Self::Tls { transport, tls } => {
                let ciphertext = match tls.read_tls(transport) {
                    Ok(0) => return Ok(SocketStatus::Eof),
                    Ok(n) => n,
                    Err(e) if e.kind() == ErrorKind::WouldBlock => 0,
                    Err(e) => return Err(e),
                };
                if ciphertext == 0 && !tls.is_handshaking() {
                    return Ok(SocketStatus::WouldBlock);
                }

                let available = match tls.process_new_packets() {
                    Ok(n) => n,
                    Err(e) => return Err(io::Error::new(ErrorKind::InvalidData, e)),
                };

                if tls.is_handshaking() {
                    return Ok(SocketStatus::HandshakeInProgress);
                }

                if available == 0 {
                    return Ok(SocketStatus::WouldBlock);
                }

                rx.reserve(available);
                let mut total = 0;
                while total < available {
                    let n = tls.read_plaintext(&mut *rx)?;
                    if n == 0 {
                        break;
                    }
                    rx.mark_written(n);
                    total += n;
                }
                Ok(SocketStatus::Progress(total))
            }
        }
    }

    /// Pumps one readiness-driven write, draining as much of `tx` as the
    /// transport will accept without blocking.
    pub fn write_ready(&mut self, tx: &mut Buffer) -> io::Result<SocketStatus> {
        match self {
            Self::Plain(transport) => write_plain(transport, tx),
            Self::Tls { transport, tls } => {
                if tx.has_data() && !tls.is_handshaking() {
                    let n = tls.write_plaintext(&tx[..])?;
                    tx.advance(n);
                }
                match tls.write_tls(transport) {
                    Ok(0) => Ok(SocketStatus::WouldBlock),
                    Ok(n) => Ok(SocketStatus::Progress(n)),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(SocketStatus::WouldBlock),
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Readiness mask this socket currently wants registered. For TLS,
    /// this follows `wants_read`/`wants_write` rather than just "is there
    /// queued application data", since handshake and close_notify records
    /// need to flow even with an empty `tx`.
    pub fn desired_interest(&self, tx_has_data: bool) -> crate::reactor::Interest {
        use crate::reactor::Interest;
        match self {
            Self::Plain(_) => {
                if tx_has_data {
                    Interest::READABLE | Interest::WRITABLE
                } else {
                    Interest::READABLE
                }
            }
            Self::Tls { tls, .. } => {
                let mut interest = Interest::empty();
                if tls.wants_read() {
                    interest |= Interest::READABLE;
                }
                if tls.wants_write() || tx_has_data {
                    interest |= Interest::WRITABLE;
                }
                if interest.is_empty() {
                    interest = Interest::READABLE;
                }
                interest
            }
        }
    }
}

impl Source for Socket {
    fn register(&mut self, registry: &Registry, token: Token, interests: MioInterest) -> io::Result<()> {
        match self {
            Self::Plain(t) => t.register(registry, token, interests),
            Self::Tls { transport, .. } => transport.register(registry, token, interests),
        }
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interests: MioInterest) -> io::Result<()> {
        match self {
            Self::Plain(t) => t.reregister(registry, token, interests),
            Self::Tls { transport, .. } => transport.reregister(registry, token, interests),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            Self::Plain(t) => t.deregister(registry),
            Self::Tls { transport, .. } => transport.deregister(registry),
        }
    }
}

fn read_plain(transport: &mut PlainStream, rx: &mut Buffer) -> io::Result<SocketStatus> {
    let mut total = 0;
    loop {
        if rx.remaining_mut() < 4096 {
            rx.reserve(4096);
        }
        match transport.read(&mut *rx) {
            Ok(0) => return Ok(if total == 0 { SocketStatus::Eof } else { SocketStatus::Progress(total) }),
            Ok(n) => {
                rx.mark_written(n);
                total += n;
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                return Ok(if total == 0 {
                    SocketStatus::WouldBlock
                } else {
                    SocketStatus::Progress(total)
                })
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

fn write_plain(transport: &mut PlainStream, tx: &mut Buffer) -> io::Result<SocketStatus> {
    let mut total = 0;
    while tx.has_data() {
        match transport.write(&tx[..]) {
            Ok(0) => break,
            Ok(n) => {
                tx.advance(n);
                total += n;
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    if total == 0 {
        Ok(SocketStatus::WouldBlock)
    } else {
        Ok(SocketStatus::Progress(total))
    }
}
