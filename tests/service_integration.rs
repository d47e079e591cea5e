//! End-to-end coverage that actually drives [`Api::service`] over real
//! loopback sockets, rather than exercising a codec in isolation. Mirrors
//! spec §8's seed scenarios: HTTP echo, WebSocket handshake + echo, a
//! packet round-trip, and an auth-reject response.

use std::cell::RefCell;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use xapi::buffer::Buffer;
use xapi::callback::{Ctx, Disposition, Reason};
use xapi::endpoint::{Endpoint, Protocol};
use xapi::http::{Assembler, HttpParser, Method, ParseStatus as HttpParseStatus, StartLine, StatusCode, Version};
use xapi::packet::{self, PacketHeader, PacketParser, PacketType, ParseStatus as PacketParseStatus, PayloadInfo};
use xapi::service::Api;
use xapi::ws::{self, Frame, FrameParser, ParseStatus as WsParseStatus};

/// Binds an ephemeral port, then releases it immediately so `Api::listen`
/// can rebind it. Racy in theory, fine for a loopback test.
fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local addr").port()
}

/// Drives `api.service` in short ticks until `done` returns `true`,
/// panicking if it never does.
fn run_until(api: &mut Api, mut done: impl FnMut() -> bool, max_ticks: usize) {
    for _ in 0..max_ticks {
        api.service(Some(20)).expect("service tick");
        if done() {
            return;
        }
    }
    panic!("condition never became true within {max_ticks} ticks");
}

#[test]
fn http_echo_round_trip_through_the_reactor() {
    let port = free_port();
    let reasons = Rc::new(RefCell::new(Vec::new()));
    let reasons_cb = Rc::clone(&reasons);

    let mut api = Api::new(Box::new(move |api: &mut Api, ctx: Ctx| -> Disposition {
        reasons_cb.borrow_mut().push(ctx.reason);
        if ctx.reason == Reason::Read {
            let mut response = Assembler::init_response(StatusCode::Ok as u16, "OK", Version::Http11);
            response.add_header("Content-Type", "text/plain");
            response.add_header("Server", "xutils/1.0");
            let bytes = response.assemble(b"Here is your response.");
            api.put_tx(ctx.token, &bytes);
        }
        Disposition::Continue
    }))
    .expect("api init");

    api.listen(Endpoint::server("127.0.0.1", port, Protocol::Http)).expect("listen");

    let client = thread::spawn(move || {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect");
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").expect("write request");

        let mut raw = Vec::new();
        let mut chunk = [0u8; 512];
        loop {
            let n = stream.read(&mut chunk).expect("read response");
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&chunk[..n]);
            if raw.windows(4).any(|w| w == b"\r\n\r\n") && raw.ends_with(b"Here is your response.") {
                break;
            }
        }
        raw
    });

    run_until(&mut api, || client.is_finished(), 500);
    let raw = client.join().expect("client thread");

    let mut parser = HttpParser::default();
    let mut buf = Buffer::new(raw.len());
    buf.put(&raw);
    assert_eq!(parser.parse(&mut buf), Ok(HttpParseStatus::Complete));
    assert_eq!(parser.get_header("content-type"), Some("text/plain"));
    assert_eq!(parser.get_header("server"), Some("xutils/1.0"));
    assert_eq!(parser.body(), b"Here is your response.");

    let recorded = reasons.borrow();
    assert_eq!(recorded.first(), Some(&Reason::Listening));
    assert!(recorded.contains(&Reason::Accepted));
    let read_pos = recorded.iter().position(|r| *r == Reason::Read).expect("Read fired");
    let complete_pos = recorded.iter().position(|r| *r == Reason::Complete).expect("Complete fired");
    assert!(read_pos < complete_pos, "Read must precede Complete: {recorded:?}");
    assert!(!recorded.contains(&Reason::Write), "HTTP connections drain via Complete, not Write: {recorded:?}");
}

#[test]
fn websocket_handshake_then_echoed_text_frame() {
    let port = free_port();
    let reasons = Rc::new(RefCell::new(Vec::new()));
    let reasons_cb = Rc::clone(&reasons);

    let mut api = Api::new(Box::new(move |api: &mut Api, ctx: Ctx| -> Disposition {
        reasons_cb.borrow_mut().push(ctx.reason);
        if ctx.reason == Reason::Read {
            if let Some(frame) = api.ws_frame(ctx.token).cloned() {
                let bytes = frame.build(false);
                api.put_tx(ctx.token, &bytes);
            }
        }
        Disposition::Continue
    }))
    .expect("api init");

    let mut endpoint = Endpoint::server("127.0.0.1", port, Protocol::Ws);
    endpoint.uri = "/websock".to_string();
    api.listen(endpoint).expect("listen");

    let client = thread::spawn(move || {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect");
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        let key = ws::client_key();
        let mut request = Assembler::init_request(Method::Get, "/websock", Version::Http11);
        request.add_header("Host", "127.0.0.1");
        request.add_header("Upgrade", "websocket");
        request.add_header("Connection", "Upgrade");
        request.add_header("Sec-WebSocket-Key", key.clone());
        request.add_header("Sec-WebSocket-Version", "13");
        stream.write_all(&request.assemble(&[])).expect("write handshake request");

        // Read until the end of the response headers.
        let mut raw = Vec::new();
        let mut chunk = [0u8; 512];
        loop {
            let n = stream.read(&mut chunk).expect("read handshake response");
            raw.extend_from_slice(&chunk[..n]);
            if raw.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }
        let mut parser = HttpParser::default();
        let mut buf = Buffer::new(raw.len());
        buf.put(&raw);
        assert_eq!(parser.parse(&mut buf), Ok(HttpParseStatus::Complete));
        let accept = parser.get_header("sec-websocket-accept").expect("accept header").to_string();
        assert!(ws::validate_accept(&key, &accept));

        let frame_bytes = Frame::text("hello").build(true);
        stream.write_all(&frame_bytes).expect("write frame");

        let mut frame_parser = FrameParser::default();
        let mut fbuf = Buffer::new(64);
        loop {
            let n = stream.read(&mut chunk).expect("read echoed frame");
            fbuf.put(&chunk[..n]);
            match frame_parser.parse(&mut fbuf).expect("parse frame") {
                WsParseStatus::Complete => break,
                _ => continue,
            }
        }
        frame_parser.take()
    });

    run_until(&mut api, || client.is_finished(), 500);
    let echoed = client.join().expect("client thread");
    assert_eq!(echoed.payload, b"hello");

    let recorded = reasons.borrow();
    assert!(recorded.contains(&Reason::Accepted));
    assert!(recorded.contains(&Reason::HandshakeRequest));
    let answer_pos = recorded.iter().position(|r| *r == Reason::HandshakeAnswer).expect("HandshakeAnswer fired");
    let read_pos = recorded.iter().position(|r| *r == Reason::Read).expect("Read fired");
    assert!(answer_pos < read_pos, "HandshakeAnswer must precede the echoed Read: {recorded:?}");
    // The handshake response flush must not spuriously fire Write/Complete
    // between HandshakeAnswer and the first real Read.
    let between = &recorded[answer_pos + 1..read_pos];
    assert!(
        !between.iter().any(|r| matches!(r, Reason::Write | Reason::Complete)),
        "spurious Write/Complete during WS handshake flush: {recorded:?}"
    );
}

#[test]
fn packet_protocol_round_trip_through_the_reactor() {
    let port = free_port();

    let mut api = Api::new(Box::new(|api: &mut Api, ctx: Ctx| -> Disposition {
        if ctx.reason == Reason::Read {
            if let Some((header, payload)) = api.packet(ctx.token).cloned() {
                let bytes = packet::assemble(header, &payload);
                api.put_tx(ctx.token, &bytes);
            }
        }
        Disposition::Continue
    }))
    .expect("api init");

    api.listen(Endpoint::server("127.0.0.1", port, Protocol::Packet)).expect("listen");

    let client = thread::spawn(move || {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect");
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        let header = PacketHeader {
            packet_type: Some(PacketType::Data),
            payload: PayloadInfo {
                payload_size: 3,
                ..Default::default()
            },
            ..Default::default()
        };
        let bytes = packet::assemble(header, &[1, 2, 3]);
        stream.write_all(&bytes).expect("write packet");

        let mut parser = PacketParser::default();
        let mut buf = Buffer::new(64);
        let mut chunk = [0u8; 64];
        loop {
            let n = stream.read(&mut chunk).expect("read echoed packet");
            buf.put(&chunk[..n]);
            match parser.parse(&mut buf).expect("parse packet") {
                PacketParseStatus::Complete => break,
                _ => continue,
            }
        }
        parser.take()
    });

    run_until(&mut api, || client.is_finished(), 500);
    let (header, payload) = client.join().expect("client thread");
    assert_eq!(header.payload.payload_size, 3);
    assert_eq!(payload, vec![1, 2, 3]);
}

#[test]
fn missing_api_key_is_rejected_with_no_www_authenticate() {
    let port = free_port();

    let mut api = Api::new(Box::new(|api: &mut Api, ctx: Ctx| -> Disposition {
        if ctx.reason == Reason::Read {
            if let Some(status) = api.authorize_http(ctx.token, Some("T"), Some("K")) {
                api.respond_http(ctx.token, StatusCode::Unauthorized, Some(status)).expect("respond");
            } else {
                api.respond_http(ctx.token, StatusCode::Ok, None).expect("respond");
            }
        }
        Disposition::Continue
    }))
    .expect("api init");

    api.listen(Endpoint::server("127.0.0.1", port, Protocol::Http)).expect("listen");

    let client = thread::spawn(move || {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect");
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").expect("write request");

        let mut raw = Vec::new();
        let mut chunk = [0u8; 512];
        loop {
            let n = stream.read(&mut chunk).expect("read response");
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&chunk[..n]);
            if raw.ends_with(b"}") {
                break;
            }
        }
        raw
    });

    run_until(&mut api, || client.is_finished(), 500);
    let raw = client.join().expect("client thread");

    let mut parser = HttpParser::default();
    let mut buf = Buffer::new(raw.len());
    buf.put(&raw);
    assert_eq!(parser.parse(&mut buf), Ok(HttpParseStatus::Complete));
    match parser.start_line() {
        Some(StartLine::Response { code, .. }) => assert_eq!(*code, 401),
        other => panic!("expected a response start-line, got {other:?}"),
    }
    assert_eq!(parser.body(), br#"{"status":"Missing X-API-KEY header"}"#);
    assert_eq!(parser.get_header("www-authenticate"), None);
}
