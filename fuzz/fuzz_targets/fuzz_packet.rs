#![no_main]

use libfuzzer_sys::fuzz_target;
use xapi::buffer::Buffer;
use xapi::packet::{PacketParser, ParseStatus};

fuzz_target!(|data: &[u8]| {
    let mut parser = PacketParser::default();
    let mut buf = Buffer::new(data.len().max(1));
    buf.put(data);
    loop {
        match parser.parse(&mut buf) {
            Ok(ParseStatus::Complete) | Err(_) => break,
            Ok(ParseStatus::Incomplete) => break,
            Ok(ParseStatus::Parsed) => continue,
        }
    }
});
