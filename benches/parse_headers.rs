use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use xapi::buffer::Buffer;
use xapi::http::HttpParser;

const REQ: &[u8] = b"\
GET / HTTP/1.1\r\n\
Host: www.example.org\r\n\
Content-Length: 0\r\n\r\n";

const REQ_MED: &[u8] = b"\
GET / HTTP/1.1\r\n\
Accept:*/*\r\n\
Accept-Encoding:gzip,deflate,br\r\n\
Accept-Language:en-US,en;q=0.5\r\n\
Cache-Control:no-cache\r\n\
Connection:keep-alive\r\n\
DNT:1\r\n\
Host: www.example.org\r\n\
Pragma:no-cache\r\n\
Referrer:https://www.example.org\r\n\
Sec-Fetch-Dest:empty\r\n\
Sec-Fetch-Mode:cors\r\n\
Sec-Fetch-Site:same-origin\r\n\
Content-Length: 0\r\n\
User-Agent:Mozilla/5.0 (X11; Linux x86_64; rv:109.0) Gecko/20100101 Firefox/109.0\r\n\r\n";

const REQ_LONG: &[u8] = b"\
POST /submit HTTP/1.1\r\n\
Host: play.google.com\r\n\
User-Agent: Mozilla/5.0 (X11; Linux x86_64; rv:109.0) Gecko/20100101 Firefox/109.0\r\n\
Accept: */*\r\n\
Accept-Language: en-US,en;q=0.5\r\n\
Accept-Encoding: gzip, deflate, br\r\n\
Referer: https://www.google.com/\r\n\
Content-Type: application/x-www-form-urlencoded;charset=utf-8\r\n\
Origin: https://www.google.com\r\n\
DNT: 1\r\n\
Connection: keep-alive\r\n\
Sec-Fetch-Dest: empty\r\n\
Sec-Fetch-Mode: cors\r\n\
Sec-Fetch-Site: same-site\r\n\
Pragma: no-cache\r\n\
Cache-Control: no-cache\r\n\
Content-Length: 0\r\n\r\n";

const TARGETS: [&[u8]; 3] = [REQ, REQ_MED, REQ_LONG];

fn benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("headers");
    for target in TARGETS {
        group.throughput(Throughput::Bytes(target.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("http_parser", target.len() as u64),
            black_box(&target),
            |b, i| {
                b.iter(|| {
                    let mut parser = HttpParser::default();
                    let mut buf = Buffer::new(i.len());
                    buf.put(i);
                    let _ = parser.parse(&mut buf);
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
