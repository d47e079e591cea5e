//! HTTP/1.1 request/response assembler.
//!
//! Generalizes the teacher's `Response` builder (`src/parser/h1/
//! response.rs`) to also build request start-lines, since the façade uses
//! the same type for both the server's responses and the client's
//! WebSocket-upgrade/outbound requests.

use super::{header::HeaderMap, method::Method, version::Version};

/// What kind of start-line this assembler is building.
#[derive(Debug, Clone)]
enum Kind {
    Request { method: Method, uri: String, version: Version },
    Response { version: Version, code: u16, reason: String },
}

/// Builds one HTTP/1.1 message (request or response) from a start-line,
/// a header table, and an optional body.
#[derive(Debug, Clone)]
pub struct Assembler {
    kind: Kind,
    headers: HeaderMap,
}

impl Assembler {
    /// Starts building a request with `method METHOD uri HTTP-version`.
    pub fn init_request(method: Method, uri: impl Into<String>, version: Version) -> Self {
        Self {
            kind: Kind::Request {
                method,
                uri: uri.into(),
                version,
            },
            headers: HeaderMap::new(),
        }
    }

    /// Starts building a response with `HTTP-version code reason`.
    pub fn init_response(code: u16, reason: impl Into<String>, version: Version) -> Self {
        Self {
            kind: Kind::Response {
                version,
                code,
                reason: reason.into(),
            },
            headers: HeaderMap::new(),
        }
    }

    /// Adds a header. First-wins: a name already present is left alone.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.insert(name, value);
        self
    }

    /// Adds or replaces a header, replacing only if the value differs.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.set(name, value);
        self
    }

    /// Serializes the start-line, headers, and body. Inserts
    /// `Content-Length` automatically when `body` is non-empty and the
    /// header isn't already set.
    pub fn assemble(&mut self, body: &[u8]) -> Vec<u8> {
        if !body.is_empty() {
            self.headers.set("Content-Length", body.len().to_string());
        }

        let mut head = String::new();
        match &self.kind {
            Kind::Request { method, uri, version } => {
                head.push_str(&format!("{method} {uri} {version}\r\n"));
            }
            Kind::Response { version, code, reason } => {
                head.push_str(&format!("{version} {code} {reason}\r\n"));
            }
        }
        self.headers.write_to(&mut head);
        head.push_str("\r\n");

        let mut out = Vec::with_capacity(head.len() + body.len());
        out.extend_from_slice(head.as_bytes());
        out.extend_from_slice(body);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::status::StatusCode;

    #[test]
    fn assembles_response_with_body_and_content_length() {
        let mut asm = Assembler::init_response(
            StatusCode::Ok as u16,
            StatusCode::Ok.reason_phrase(),
            Version::Http11,
        );
        asm.add_header("Content-Type", "text/plain");
        let bytes = asm.assemble(b"Here is your response.");
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 23\r\n"));
        assert!(text.ends_with("\r\n\r\nHere is your response."));
    }

    #[test]
    fn assembles_request_without_body() {
        let mut asm = Assembler::init_request(Method::Get, "/", Version::Http11);
        asm.add_header("Host", "x");
        let bytes = asm.assemble(&[]);
        assert_eq!(bytes, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
    }
}
