//! HTTP/1.1 request/response codec: a streaming, incremental parser plus
//! an assembler, both operating on owned data.
//!
//! The teacher's `H1Request<'buf, 'headers>` borrowed directly from the
//! connection's read buffer, which its own `fill`/`fill_exact` methods
//! flag (via a TODO in `src/parser/h1/request.rs`) as unworkable once a
//! message spans more than one `read()` — the buffer can reallocate
//! between reads and invalidate the borrow. This codec instead copies the
//! start-line tokens, header names/values, and body into owned `String`/
//! `Vec<u8>` storage as it parses, so a `HttpParser` can be fed
//! incrementally across any number of reads.

pub mod assembler;
pub mod header;
pub mod method;
pub mod parser;
pub mod status;
pub mod version;

pub use assembler::Assembler;
pub use header::HeaderMap;
pub use method::Method;
pub use parser::{HttpParser, ParseStatus, StartLine};
pub use status::StatusCode;
pub use version::Version;

use thiserror::Error;

/// Everything that can go wrong parsing or assembling an HTTP message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    /// The header block exceeded the configured header-size cap before the
    /// `\r\n\r\n` terminator was found.
    #[error("header block exceeds limit")]
    BigHeader,
    /// The body exceeded the configured content-size cap.
    #[error("body exceeds limit")]
    BigContent,
    /// The start-line was not `METHOD SP URI SP VERSION` or
    /// `VERSION SP CODE SP REASON`.
    #[error("malformed start line")]
    MalformedStartLine,
    /// A header line had no `:` separator.
    #[error("malformed header line")]
    MalformedHeader,
    /// The version token was not recognized.
    #[error("unrecognized HTTP version")]
    UnknownVersion,
    /// `Content-Length` was present but not a valid non-negative integer.
    #[error("invalid Content-Length value")]
    InvalidContentLength,
}

/// Default cap on header-block size before [`HttpError::BigHeader`].
pub const DEFAULT_HEADER_MAX: usize = 8 * 1024;
/// Default cap on body size before [`HttpError::BigContent`].
pub const DEFAULT_CONTENT_MAX: usize = 10 * 1024 * 1024;
