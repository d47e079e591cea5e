//! Crate-level error aggregation.
//!
//! Each codec owns its own status enumeration (`http::HttpStatus`,
//! `ws::WsStatus`, `packet::PacketStatus`) that is exposed to user
//! callbacks directly, per the status-enum-per-protocol design. `Error`
//! here is only for operations that can fail outside of a running
//! connection's protocol state machine: registering with the OS poller,
//! resolving an address, building a socket.

use std::io;

use thiserror::Error;

/// Top-level error for operations outside the per-connection protocol
/// state machines (registration, address resolution, socket setup).
#[derive(Error, Debug)]
pub enum Error {
    /// The OS-level poller rejected a register/modify/delete call.
    #[error("reactor registration failed: {0}")]
    Registration(#[source] io::Error),

    /// `getaddrinfo`-equivalent resolution failed for an endpoint's
    /// `addr`/`port`.
    #[error("failed to resolve address: {0}")]
    Resolve(#[source] io::Error),

    /// Allocating a connection record or its buffers failed.
    #[error("allocation failure")]
    Alloc,

    /// An endpoint was missing a field required for its role/protocol
    /// combination (e.g. a `Client` with no `addr`, or `tls: true` with no
    /// cert bundle).
    #[error("invalid endpoint arguments: {0}")]
    InvalidArgs(&'static str),

    /// `add_event`/`add_peer` was asked to adopt a role the reactor does
    /// not know how to drive (an `Endpoint` with `role: Inactive`).
    #[error("invalid or unsupported role")]
    InvalidRole,

    /// A duplicate file descriptor was presented to `register`.
    #[error("duplicate descriptor registered")]
    DuplicateDescriptor,

    /// Constructing a TLS client or server context failed.
    #[error("tls setup failed: {0}")]
    Tls(#[from] rustls::Error),

    /// Any other I/O failure not covered above.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Convenience alias used throughout the crate for fallible setup paths.
pub type Result<T> = std::result::Result<T, Error>;
