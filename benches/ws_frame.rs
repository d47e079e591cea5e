use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use xapi::buffer::Buffer;
use xapi::ws::{Frame, FrameParser, ParseStatus};

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("ws_frame");
    for len in [32usize, 1024, 65536] {
        let frame = Frame::binary(payload(len));
        let masked = frame.build(true);
        group.throughput(Throughput::Bytes(masked.len() as u64));

        group.bench_with_input(BenchmarkId::new("build_masked", len), &frame, |b, f| {
            b.iter(|| black_box(f.build(true)))
        });

        group.bench_with_input(BenchmarkId::new("parse_masked", len), &masked, |b, bytes| {
            b.iter(|| {
                let mut parser = FrameParser::default();
                let mut buf = Buffer::new(bytes.len());
                buf.put(bytes);
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
