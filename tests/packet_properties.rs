//! Property tests for the length-prefixed packet codec: assembling and
//! parsing a packet must round-trip the header's declared size and the
//! payload bytes, regardless of payload size or read chunking.

use proptest::prelude::*;
use xapi::buffer::Buffer;
use xapi::packet::{assemble, PacketHeader, PacketParser, PacketType, ParseStatus};

fn parse_all(bytes: &[u8], chunk_size: usize) -> (PacketHeader, Vec<u8>) {
    let mut parser = PacketParser::default();
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
    panic!("packet never completed");
}

proptest! {
    #[test]
    fn data_packet_round_trips(
        payload in prop::collection::vec(any::<u8>(), 0..4096),
        packet_id in any::<u64>(),
        chunk_size in 1usize..29,
    ) {
        let header = PacketHeader {
            packet_type: Some(PacketType::Data),
            packet_id: Some(packet_id),
            ..Default::default()
        };
        let bytes = assemble(header, &payload);

        let (parsed_header, parsed_payload) = parse_all(&bytes, chunk_size);
        prop_assert_eq!(parsed_payload, payload.clone());
        prop_assert_eq!(parsed_header.packet_id, Some(packet_id));
        prop_assert_eq!(parsed_header.payload.payload_size, payload.len());
    }

    #[test]
    fn declared_header_length_always_matches_actual_bytes(
        payload in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let bytes = assemble(PacketHeader::default(), &payload);
        let declared_len = u32::from_le_bytes(bytes[..4].try_into().unwrap()) as usize;
        let header_json_end = 4 + declared_len;
        prop_assert_eq!(bytes.len() - header_json_end, payload.len());
    }
}
