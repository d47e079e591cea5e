//! Incremental HTTP/1.1 parser.
//!
//! Generalizes the teacher's `H1Request` state machine (`Initial →
//! HeadersPending → HeadersParsed → BodyPending → Complete`) to own its
//! parsed data instead of borrowing the read buffer, and to parse either a
//! request or a response start-line depending on its first token.

use super::{header::HeaderMap, method::Method, status::StatusCode, version::Version, HttpError};
use crate::buffer::Buffer;

/// Either half of a start-line, depending on which direction this message
/// travels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    /// `METHOD SP request-target SP HTTP-version`
    Request {
        /// The request method.
        method: Method,
        /// The request-target, verbatim.
        uri: String,
        /// The declared HTTP version.
        version: Version,
    },
    /// `HTTP-version SP status-code SP reason-phrase`
    Response {
        /// The declared HTTP version.
        version: Version,
        /// The numeric status code, as sent on the wire.
        code: u16,
        /// The recognized status, if `code` is one we know by name.
        status: Option<StatusCode>,
        /// The reason phrase, verbatim.
        reason: String,
    },
}

/// Result of a single [`HttpParser::parse`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// Not enough bytes yet to make progress.
    Incomplete,
    /// The header block just finished parsing; a body (possibly empty,
    /// but of nonzero *expected* length) remains pending.
    Parsed,
    /// The full message — headers and body — has been parsed.
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    BodyPending,
    Complete,
}

/// An incremental HTTP/1.1 request-or-response parser.
#[derive(Debug)]
pub struct HttpParser {
    state: State,
    header_max: usize,
    content_max: usize,
    start_line: Option<StartLine>,
    headers: HeaderMap,
    body: Vec<u8>,
    content_length: Option<usize>,
    body_until_eof: bool,
    consumed: usize,
}

impl Default for HttpParser {
    fn default() -> Self {
        Self::new(super::DEFAULT_HEADER_MAX, super::DEFAULT_CONTENT_MAX)
    }
}

impl HttpParser {
    /// Creates a parser with the given header-block and body size caps.
    pub fn new(header_max: usize, content_max: usize) -> Self {
        Self {
            state: State::Initial,
            header_max,
            content_max,
            start_line: None,
            headers: HeaderMap::new(),
            body: Vec::new(),
            content_length: None,
            body_until_eof: false,
            consumed: 0,
        }
    }

    /// Feeds whatever bytes are currently in `buf`, consuming (via
    /// [`Buffer::advance`]) exactly what this call parsed. May be called
    /// repeatedly as more bytes arrive; idempotently returns `Complete`
    /// once the message is fully parsed without consuming further bytes.
    pub fn parse(&mut self, buf: &mut Buffer) -> Result<ParseStatus, HttpError> {
        if self.state == State::Complete {
            return Ok(ParseStatus::Complete);
        }

        if self.state == State::Initial {
            let Some(header_end) = find_terminator(&buf[..]) else {
                if buf.remaining() > self.header_max {
                    return Err(HttpError::BigHeader);
                }
                return Ok(ParseStatus::Incomplete);
            };

            if header_end > self.header_max {
                return Err(HttpError::BigHeader);
            }

            let head = String::from_utf8_lossy(&buf[..header_end - 4]).into_owned();
            self.parse_head(&head)?;
            self.consumed += header_end;
            buf.advance(header_end);

            let has_content_type = self.headers.contains("content-type");
            match self.content_length {
                Some(0) => {
                    self.state = State::Complete;
                    return Ok(ParseStatus::Complete);
                }
                Some(len) if len > self.content_max => return Err(HttpError::BigContent),
                Some(_) => {
                    self.state = State::BodyPending;
                    return Ok(ParseStatus::Parsed);
                }
                None if has_content_type => {
                    self.body_until_eof = true;
                    self.state = State::BodyPending;
                    return Ok(ParseStatus::Parsed);
                }
                None => {
                    self.state = State::Complete;
                    return Ok(ParseStatus::Complete);
                }
            }
        }

        // State::BodyPending
        let available = buf.remaining();
        if self.body_until_eof {
            if self.body.len() + available > self.content_max {
                return Err(HttpError::BigContent);
            }
            self.body.extend_from_slice(&buf[..]);
            self.consumed += available;
            buf.advance(available);
            return Ok(ParseStatus::Incomplete);
        }

        let target = self.content_length.unwrap_or(0);
        let needed = target - self.body.len();
        let take = needed.min(available);
        self.body.extend_from_slice(&buf[..take]);
        self.consumed += take;
        buf.advance(take);

        if self.body.len() >= target {
            self.state = State::Complete;
            Ok(ParseStatus::Complete)
        } else {
            Ok(ParseStatus::Incomplete)
        }
    }

    /// Forces completion of a body that has no `Content-Length` and is
    /// meant to run until EOF. The façade calls this once the socket
    /// reports end-of-stream while this parser is in the
    /// `body_until_eof` state.
    pub fn finish_at_eof(&mut self) {
        if self.state == State::BodyPending && self.body_until_eof {
            self.state = State::Complete;
        }
    }

    /// `true` if this parser is waiting on EOF (rather than a known
    /// `Content-Length`) to complete its body.
    pub fn awaiting_eof(&self) -> bool {
        self.state == State::BodyPending && self.body_until_eof
    }

    fn parse_head(&mut self, head: &str) -> Result<(), HttpError> {
        let mut lines = head.split("\r\n");
        let start = lines.next().ok_or(HttpError::MalformedStartLine)?;
        self.start_line = Some(parse_start_line(start)?);

        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, value) = HeaderMap::parse_line(line).ok_or(HttpError::MalformedHeader)?;
            self.headers.insert(name, value);
        }

        if let Some(raw) = self.headers.get("content-length") {
            let len: usize = raw.parse().map_err(|_| HttpError::InvalidContentLength)?;
            self.content_length = Some(len);
        }

        Ok(())
    }

    /// The parsed start-line, once available (after the header terminator
    /// has been seen).
    pub fn start_line(&self) -> Option<&StartLine> {
        self.start_line.as_ref()
    }

    /// Looks up a parsed header by case-insensitive name.
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// The full header table.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The body bytes parsed so far (complete once `parse` returns
    /// `Complete`).
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Total bytes this parser has consumed from the input buffer(s) fed
    /// to it across every `parse` call — the wire size of the message.
    pub fn get_packet_size(&self) -> usize {
        self.consumed
    }

    /// Resets the parser to its initial state, ready to parse the next
    /// message on the same connection (HTTP/1.1 keep-alive, or a fresh
    /// pipelined request already sitting in the buffer).
    pub fn clear(&mut self) {
        self.state = State::Initial;
        self.start_line = None;
        self.headers.clear();
        self.body.clear();
        self.content_length = None;
        self.body_until_eof = false;
        self.consumed = 0;
    }
}

fn find_terminator(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

fn parse_start_line(line: &str) -> Result<StartLine, HttpError> {
    let mut parts = line.splitn(3, ' ');
    let first = parts.next().ok_or(HttpError::MalformedStartLine)?;
    let second = parts.next().ok_or(HttpError::MalformedStartLine)?;
    let third = parts.next().ok_or(HttpError::MalformedStartLine)?;

    if first.starts_with("HTTP/") {
        let version = Version::parse(first).ok_or(HttpError::UnknownVersion)?;
        let (code, status) = StatusCode::parse(second).ok_or(HttpError::MalformedStartLine)?;
        Ok(StartLine::Response {
            version,
            code,
            status,
            reason: third.to_string(),
        })
    } else {
        let version = Version::parse(third).ok_or(HttpError::UnknownVersion)?;
        Ok(StartLine::Request {
            method: Method::parse(first),
            uri: second.to_string(),
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut HttpParser, chunks: &[&[u8]]) -> Vec<ParseStatus> {
        let mut buf = Buffer::new(64);
        let mut statuses = Vec::new();
        for chunk in chunks {
            buf.put(chunk);
            statuses.push(parser.parse(&mut buf).expect("parse"));
        }
        statuses
    }

    #[test]
    fn parses_request_with_no_body_in_one_shot() {
        let mut parser = HttpParser::default();
        let statuses = feed(&mut parser, &[b"GET / HTTP/1.1\r\nHost: x\r\n\r\n"]);
        assert_eq!(statuses, vec![ParseStatus::Complete]);
        assert_eq!(
            parser.start_line(),
            Some(&StartLine::Request {
                method: Method::Get,
                uri: "/".into(),
                version: Version::Http11,
            })
        );
    }

    #[test]
    fn content_length_zero_completes_immediately_after_headers() {
        let mut parser = HttpParser::default();
        let statuses = feed(
            &mut parser,
            &[b"POST /x HTTP/1.1\r\nContent-Length: 0\r\n\r\n"],
        );
        assert_eq!(statuses, vec![ParseStatus::Complete]);
    }

    #[test]
    fn body_arrives_across_multiple_reads() {
        let mut parser = HttpParser::default();
        let statuses = feed(
            &mut parser,
            &[
                b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\r\n",
                b"he",
                b"llo",
            ],
        );
        assert_eq!(
            statuses,
            vec![ParseStatus::Parsed, ParseStatus::Incomplete, ParseStatus::Complete]
        );
        assert_eq!(parser.body(), b"hello");
    }

    #[test]
    fn byte_at_a_time_yields_each_status_exactly_once() {
        let msg = b"POST /x HTTP/1.1\r\nContent-Length: 2\r\n\r\nhi";
        let mut parser = HttpParser::default();
        let mut buf = Buffer::new(4);
        let mut parsed_count = 0;
        let mut complete_count = 0;
        for &byte in msg {
            buf.put(&[byte]);
            match parser.parse(&mut buf).expect("parse") {
                ParseStatus::Parsed => parsed_count += 1,
                ParseStatus::Complete => complete_count += 1,
                ParseStatus::Incomplete => {}
            }
        }
        assert_eq!(parsed_count, 1);
        assert_eq!(complete_count, 1);
    }

    #[test]
    fn oversized_header_block_is_rejected() {
        let mut parser = HttpParser::new(16, super::super::DEFAULT_CONTENT_MAX);
        let mut buf = Buffer::new(64);
        buf.put(b"GET /aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa HTTP/1.1\r\n\r\n");
        assert_eq!(parser.parse(&mut buf), Err(HttpError::BigHeader));
    }

    #[test]
    fn response_start_line_is_recognized() {
        let mut parser = HttpParser::default();
        feed(&mut parser, &[b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"]);
        assert_eq!(
            parser.start_line(),
            Some(&StartLine::Response {
                version: Version::Http11,
                code: 200,
                status: Some(StatusCode::Ok),
                reason: "OK".into(),
            })
        );
    }
}
