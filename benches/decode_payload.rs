/// Benchmarks for payload decoding on the receive path.
///
/// Every broadcast goes through the codec on the connection task, so decode cost bounds how
/// fast a client can keep up with the server.
use std::io::Write as _;

use broadcast_client::transport::Payload;
use broadcast_client::{JsonCodec, MessageCodec as _};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::{Value, json};

fn document(entries: usize) -> String {
    let sensors: serde_json::Map<String, Value> = (0..entries)
        .map(|i| {
            (
                format!("sensor-{i}"),
                json!({"value": i, "unit": "C", "updated": "2024-05-01T12:00:00Z"}),
            )
        })
        .collect();
    json!({"sensors": sensors}).to_string()
}

fn gzip(text: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(text.as_bytes())
        .expect("Compression should succeed");
    encoder.finish().expect("Compression should succeed")
}

fn bench_text(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode/text");

    for entries in [1, 100, 1_000] {
        let text = document(entries);
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(entries), &text, |b, text| {
            b.iter(|| {
                JsonCodec
                    .decode(Payload::Text(std::hint::black_box(text.clone())))
                    .expect("Decoding should succeed")
            });
        });
    }

    group.finish();
}

fn bench_gzip(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode/gzip");

    for entries in [1, 100, 1_000] {
        let data = gzip(&document(entries));
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(entries), &data, |b, data| {
            b.iter(|| {
                JsonCodec
                    .decode(Payload::Binary {
                        data: std::hint::black_box(data.clone()),
                        compressed: true,
                    })
                    .expect("Decoding should succeed")
            });
        });
    }

    group.finish();
}

criterion_group!(decode_benches, bench_text, bench_gzip);
criterion_main!(decode_benches);
