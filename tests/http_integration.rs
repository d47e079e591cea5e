//! End-to-end assemble/parse coverage using realistic-looking fixture data
//! rather than hand-picked constants, so header parsing is exercised
//! against values shaped like what a real client would send.

use fake::faker::internet::en::UserAgent;
use fake::faker::lorem::en::Sentence;
use fake::Fake;
use xapi::buffer::Buffer;
use xapi::http::{Assembler, HttpParser, Method, ParseStatus, Version};

#[test]
fn assembled_request_with_a_realistic_user_agent_round_trips() {
    for _ in 0..8 {
        let user_agent: String = UserAgent().fake();
        let body: String = Sentence(3..12).fake();

        let mut asm = Assembler::init_request(Method::Post, "/submit", Version::Http11);
        asm.add_header("Host", "example.org");
        asm.add_header("User-Agent", user_agent.clone());
        let bytes = asm.assemble(body.as_bytes());

        let mut parser = HttpParser::default();
        let mut buf = Buffer::new(bytes.len());
        buf.put(&bytes);
        let status = parser.parse(&mut buf).expect("parse");

        assert_eq!(status, ParseStatus::Complete);
        assert_eq!(parser.get_header("user-agent"), Some(user_agent.as_str()));
        assert_eq!(parser.body(), body.as_bytes());
    }
}
