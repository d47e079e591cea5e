//! Transport layer: TCP/Unix sockets, optionally wrapped in TLS, unified
//! behind a single [`Socket`] enum the connection record drives without
//! caring which transport or security layer it's talking to.

pub mod socket;
pub mod tls;

pub use socket::{Socket, SocketStatus};
