//! RFC 6455 §5.2 frame codec: incremental parser and builder.

use rand::RngCore;

use super::{WsError, DEFAULT_FRAME_MAX};
use crate::buffer::Buffer;

/// Frame opcode (RFC 6455 §5.2, the low 4 bits of the first header byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Continuation of a fragmented message.
    Continuation,
    /// UTF-8 text payload.
    Text,
    /// Arbitrary binary payload.
    Binary,
    /// Connection close, optionally carrying a status code + reason.
    Close,
    /// Keepalive ping; the peer should `Pong` back the same payload.
    Ping,
    /// Keepalive pong, in reply to a `Ping`.
    Pong,
}

impl Opcode {
    fn from_bits(bits: u8) -> Result<Self, WsError> {
        match bits {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(WsError::MalformedFrame),
        }
    }

    fn to_bits(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }
}

/// A single parsed (and already-unmasked, if it arrived masked) WebSocket
/// frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Whether this is the final fragment of the message.
    pub fin: bool,
    /// The frame's opcode.
    pub opcode: Opcode,
    /// The (unmasked) application payload.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Convenience constructor for an unfragmented text frame.
    pub fn text(payload: impl Into<String>) -> Self {
        Self {
            fin: true,
            opcode: Opcode::Text,
            payload: payload.into().into_bytes(),
        }
    }

    /// Convenience constructor for an unfragmented binary frame.
    pub fn binary(payload: Vec<u8>) -> Self {
        Self {
            fin: true,
            opcode: Opcode::Binary,
            payload,
        }
    }

    /// Builds the wire bytes for this frame. `mask` is `true` for
    /// client-to-server frames (RFC 6455 §5.1 requires masking in that
    /// direction only); a fresh random mask key is generated per call.
    pub fn build(&self, mask: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.payload.len() + 14);

        let first_byte = (self.fin as u8) << 7 | self.opcode.to_bits();
        out.push(first_byte);

        let len = self.payload.len();
        let mask_bit = if mask { 0x80 } else { 0x00 };
        if len < 126 {
            out.push(mask_bit | len as u8);
        } else if len <= u16::MAX as usize {
            out.push(mask_bit | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            out.push(mask_bit | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }

        if mask {
            let mut key = [0u8; 4];
            rand::thread_rng().fill_bytes(&mut key);
            out.extend_from_slice(&key);
            let masked: Vec<u8> = self
                .payload
                .iter()
                .enumerate()
                .map(|(i, b)| b ^ key[i % 4])
                .collect();
            out.extend_from_slice(&masked);
        } else {
            out.extend_from_slice(&self.payload);
        }

        out
    }
}

/// Result of one [`FrameParser::parse`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// Not enough bytes for the next frame yet.
    Incomplete,
    /// The frame header (and thus its declared length) is known, but the
    /// payload hasn't fully arrived.
    Parsed,
    /// A complete frame is available via [`FrameParser::take`].
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    PayloadPending,
}

/// Incremental WebSocket frame parser. One instance per connection;
/// `take()` after `Complete` to retrieve the frame and reset for the next
/// one.
#[derive(Debug)]
pub struct FrameParser {
    state: State,
    max_payload: usize,
    fin: bool,
    opcode: Opcode,
    mask_key: Option<[u8; 4]>,
    declared_len: usize,
    payload: Vec<u8>,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_MAX)
    }
}

impl FrameParser {
    /// Creates a parser that rejects frames with a declared payload
    /// larger than `max_payload`.
    pub fn new(max_payload: usize) -> Self {
        Self {
            state: State::Initial,
            max_payload,
            fin: true,
            opcode: Opcode::Continuation,
            mask_key: None,
            declared_len: 0,
            payload: Vec::new(),
        }
    }

    /// Feeds bytes from `buf`, consuming exactly what was parsed.
    pub fn parse(&mut self, buf: &mut Buffer) -> Result<ParseStatus, WsError> {
        if self.state == State::Initial {
            let bytes = &buf[..];
            if bytes.len() < 2 {
                return Ok(ParseStatus::Incomplete);
            }

            let fin = bytes[0] & 0x80 != 0;
            let opcode = Opcode::from_bits(bytes[0] & 0x0F)?;
            let masked = bytes[1] & 0x80 != 0;
            let len_byte = bytes[1] & 0x7F;

            let (declared_len, mut header_len) = match len_byte {
                126 => {
                    if bytes.len() < 4 {
                        return Ok(ParseStatus::Incomplete);
                    }
                    (u16::from_be_bytes([bytes[2], bytes[3]]) as usize, 4)
                }
                127 => {
                    if bytes.len() < 10 {
                        return Ok(ParseStatus::Incomplete);
                    }
                    let mut arr = [0u8; 8];
                    arr.copy_from_slice(&bytes[2..10]);
                    (u64::from_be_bytes(arr) as usize, 10)
                }
                n => (n as usize, 2),
            };

            if declared_len > self.max_payload {
                return Err(WsError::BigData);
            }

            let mask_key = if masked {
                if bytes.len() < header_len + 4 {
                    return Ok(ParseStatus::Incomplete);
                }
                let mut key = [0u8; 4];
                key.copy_from_slice(&bytes[header_len..header_len + 4]);
                header_len += 4;
                Some(key)
            } else {
                None
            };

            self.fin = fin;
            self.opcode = opcode;
            self.mask_key = mask_key;
            self.declared_len = declared_len;
            buf.advance(header_len);
            self.state = State::PayloadPending;

            if declared_len == 0 {
                return Ok(ParseStatus::Complete);
            }
            return Ok(ParseStatus::Parsed);
        }

        // State::PayloadPending
        let available = buf.remaining();
        let needed = self.declared_len - self.payload.len();
        let take = needed.min(available);
        self.payload.extend_from_slice(&buf[..take]);
        buf.advance(take);

        if self.payload.len() < self.declared_len {
            return Ok(ParseStatus::Incomplete);
        }

        if let Some(key) = self.mask_key {
            for (i, b) in self.payload.iter_mut().enumerate() {
                *b ^= key[i % 4];
            }
        }

        Ok(ParseStatus::Complete)
    }

    /// Takes the completed frame and resets the parser for the next one.
    pub fn take(&mut self) -> Frame {
        let frame = Frame {
            fin: self.fin,
            opcode: self.opcode,
            payload: std::mem::take(&mut self.payload),
        };
        self.state = State::Initial;
        self.mask_key = None;
        self.declared_len = 0;
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(bytes: &[u8]) -> Frame {
        let mut parser = FrameParser::default();
        let mut buf = Buffer::new(16);
        buf.put(bytes);
        loop {
            match parser.parse(&mut buf).expect("parse") {
                ParseStatus::Complete => return parser.take(),
                ParseStatus::Incomplete => panic!("not enough bytes in test fixture"),
                ParseStatus::Parsed => continue,
            }
        }
    }

    #[test]
    fn round_trips_unmasked_server_frame() {
        let frame = Frame::text("hello");
        let bytes = frame.build(false);
        let parsed = parse_all(&bytes);
        assert_eq!(parsed, frame);
    }

    #[test]
    fn round_trips_masked_client_frame() {
        let frame = Frame::binary(vec![1, 2, 3, 4, 5]);
        let bytes = frame.build(true);
        // mask bit must be set
        assert_eq!(bytes[1] & 0x80, 0x80);
        let parsed = parse_all(&bytes);
        assert_eq!(parsed, frame);
    }

    #[test]
    fn oversized_declared_length_is_rejected() {
        let mut parser = FrameParser::new(4);
        let mut buf = Buffer::new(16);
        buf.put(&[0x81, 5]); // text frame declaring 5-byte payload, cap is 4
        assert_eq!(parser.parse(&mut buf), Err(WsError::BigData));
    }

    #[test]
    fn payload_spanning_multiple_feeds() {
        let frame = Frame::text("incremental");
        let bytes = frame.build(false);
        let mut parser = FrameParser::default();
        let mut buf = Buffer::new(4);
        let mut last = ParseStatus::Incomplete;
        for chunk in bytes.chunks(3) {
            buf.put(chunk);
            last = parser.parse(&mut buf).expect("parse");
            if last == ParseStatus::Complete {
                break;
            }
        }
        assert_eq!(last, ParseStatus::Complete);
        assert_eq!(parser.take(), frame);
    }
}
