use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use xapi::buffer::Buffer;
use xapi::packet::{assemble, PacketHeader, PacketParser, PacketType, ParseStatus};

fn header() -> PacketHeader {
    PacketHeader {
        packet_type: Some(PacketType::Data),
        packet_id: Some(42),
        session_id: Some(7),
        ..Default::default()
    }
}

fn benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_roundtrip");
    for len in [0usize, 256, 8192] {
        let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let bytes = assemble(header(), &payload);
        group.throughput(Throughput::Bytes(bytes.len() as u64));

        group.bench_with_input(BenchmarkId::new("assemble", len), &payload, |b, p| {
            b.iter(|| black_box(assemble(header(), p)))
        });

        group.bench_with_input(BenchmarkId::new("parse", len), &bytes, |b, wire| {
            b.iter(|| {
                let mut parser = PacketParser::default();
                let mut buf = Buffer::new(wire.len());
                buf.put(wire);
                loop {
                    match parser.parse(&mut buf).expect("parse") {
                        ParseStatus::Complete => break,
                        ParseStatus::Incomplete | ParseStatus::Parsed => continue,
                    }
                }
                parser.take()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
