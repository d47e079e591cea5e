//! Property tests for the WebSocket frame codec: a frame built for either
//! masking direction must parse back to an identical frame, regardless of
//! payload size or how the wire bytes are chunked across reads.

use proptest::prelude::*;
use xapi::buffer::Buffer;
use xapi::ws::{Frame, FrameParser, ParseStatus};

fn parse_all(bytes: &[u8], chunk_size: usize) -> Frame {
    let mut parser = FrameParser::default();
    let mut buf = Buffer::new(16);
    for chunk in bytes.chunks(chunk_size.max(1)) {
        buf.put(chunk);
        loop {
            match parser.parse(&mut buf).expect("parse") {
                ParseStatus::Complete => return parser.take(),
                ParseStatus::Parsed => continue,
                ParseStatus::Incomplete => break,
            }
        }
    }
    panic!("frame never completed");
}

proptest! {
    #[test]
    fn masked_binary_frame_round_trips(
        payload in prop::collection::vec(any::<u8>(), 0..4096),
        chunk_size in 1usize..23,
    ) {
        let frame = Frame::binary(payload);
        let bytes = frame.build(true);
        let parsed = parse_all(&bytes, chunk_size);
        prop_assert_eq!(parsed, frame);
    }

    #[test]
    fn unmasked_text_frame_round_trips(
        text in "[ -~]{0,200}",
        chunk_size in 1usize..23,
    ) {
        let frame = Frame::text(text);
        let bytes = frame.build(false);
        let parsed = parse_all(&bytes, chunk_size);
        prop_assert_eq!(parsed, frame);
    }
}
