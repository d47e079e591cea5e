use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use xapi::http::Method;

const METHODS: [&str; 8] = [
    "GET", "PUT", "POST", "HEAD", "TRACE", "DELETE", "CONNECT", "OPTIONS",
];

fn benchmark(c: &mut Criterion) {
    for method in METHODS {
        c.bench_with_input(BenchmarkId::new("method", method), black_box(&method), |b, i| {
            b.iter(|| Method::parse(i))
        });
    }
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
