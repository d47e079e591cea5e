//! Property tests for the HTTP/1.1 incremental parser: feeding a message in
//! arbitrarily small chunks must produce the same result as feeding it in
//! one shot.

use proptest::prelude::*;
use xapi::buffer::Buffer;
use xapi::http::{HttpParser, ParseStatus};

fn build_request(body: &[u8]) -> Vec<u8> {
    let mut msg = format!(
        "POST /upload HTTP/1.1\r\nHost: example.org\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    msg.extend_from_slice(body);
    msg
}

fn feed_in_chunks(msg: &[u8], chunk_size: usize) -> (Vec<ParseStatus>, Vec<u8>) {
    let mut parser = HttpParser::default();
    let mut buf = Buffer::new(64);
    let mut statuses = Vec::new();
    for chunk in msg.chunks(chunk_size.max(1)) {
        buf.put(chunk);
        statuses.push(parser.parse(&mut buf).expect("parse"));
    }
    (statuses, parser.body().to_vec())
}

proptest! {
    #[test]
    fn chunk_size_does_not_change_the_parsed_body(
        body in prop::collection::vec(any::<u8>(), 0..512),
        chunk_size in 1usize..37,
    ) {
        let msg = build_request(&body);
        let (statuses, parsed_body) = feed_in_chunks(&msg, chunk_size);

        prop_assert_eq!(parsed_body, body);
        prop_assert_eq!(statuses.iter().filter(|s| **s == ParseStatus::Complete).count(), 1);
    }

    #[test]
    fn one_shot_and_byte_at_a_time_agree_on_consumed_size(
        body in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let msg = build_request(&body);

        let mut one_shot = HttpParser::default();
        let mut buf = Buffer::new(msg.len().max(1));
        buf.put(&msg);
        while one_shot.parse(&mut buf).expect("parse") != ParseStatus::Complete {}

        let mut byte_at_a_time = HttpParser::default();
        let mut buf2 = Buffer::new(8);
        for &b in &msg {
            buf2.put(&[b]);
            let _ = byte_at_a_time.parse(&mut buf2).expect("parse");
        }

        prop_assert_eq!(one_shot.get_packet_size(), byte_at_a_time.get_packet_size());
        prop_assert_eq!(one_shot.body(), byte_at_a_time.body());
    }
}
