use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use xapi::http::Version;

const VERSIONS: [&str; 4] = ["HTTP/1.1", "HTTP/1.0", "HTTP/2", "HTTP/3"];

fn benchmark(c: &mut Criterion) {
    for version in VERSIONS {
        c.bench_with_input(BenchmarkId::new("version", version), black_box(&version), |b, i| {
            b.iter(|| Version::parse(i))
        });
    }
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
