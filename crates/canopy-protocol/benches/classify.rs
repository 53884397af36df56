//! Classification benchmarks for canopy-protocol.

use canopy_protocol::classify;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

fn bench_classify_update(c: &mut Criterion) {
    let payload = r#"{"deviceId":"ESP32_7","temperature":22.5,"humidity":61.2,"soilMoisture":40}"#;

    let mut group = c.benchmark_group("classify");
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("update", |b| b.iter(|| classify(black_box(payload))));
    group.finish();
}

fn bench_classify_heartbeat(c: &mut Criterion) {
    let payload = r#"{"type":"heartbeat"}"#;

    c.bench_function("classify_heartbeat", |b| {
        b.iter(|| classify(black_box(payload)))
    });
}

criterion_group!(benches, bench_classify_update, bench_classify_heartbeat);
criterion_main!(benches);
