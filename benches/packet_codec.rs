//! Benchmarks for envelope and periodic payload encoding
//!
//! Covers the hot path of every write and every received packet:
//! - PeriodicDataPacket serialization for a 100-sample batch
//! - Envelope decode plus inner content decode

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use pitlane::protocol::{
    DataFormatId, OpenDataMessage, Packet, PacketType, PeriodicDataPacket, SampleDataFormat,
};
use pitlane::test_utils::{double_column, periodic_packet};
use std::hint::black_box;

fn sine_batch(samples: usize) -> PeriodicDataPacket {
    let values: Vec<f64> = (0..samples)
        .map(|i| (i as f64 * std::f64::consts::TAU / samples as f64).sin())
        .collect();
    PeriodicDataPacket {
        data_format: SampleDataFormat::Identifier(DataFormatId(1)),
        start_time: 1_700_000_000_000_000_000,
        interval: 10_000_000,
        columns: vec![double_column(&values)],
    }
}

fn bench_periodic_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("periodic_encode");

    for samples in [10usize, 100, 1000] {
        let batch = sine_batch(samples);
        group.throughput(Throughput::Elements(samples as u64));
        group.bench_with_input(BenchmarkId::from_parameter(samples), &batch, |b, batch| {
            b.iter(|| black_box(batch.to_bytes()))
        });
    }

    group.finish();
}

fn bench_envelope_decode(c: &mut Criterion) {
    let batch = sine_batch(100);
    let bytes = Packet::wrap(PacketType::PeriodicData, "session", false, &batch, 7).to_bytes();

    let mut group = c.benchmark_group("envelope_decode");
    group.throughput(Throughput::Bytes(bytes.len() as u64));

    group.bench_function("envelope_only", |b| {
        b.iter(|| black_box(Packet::from_bytes(black_box(&bytes)).expect("valid envelope")))
    });

    group.bench_function("envelope_and_content", |b| {
        b.iter(|| {
            let packet = Packet::from_bytes(black_box(&bytes)).expect("valid envelope");
            black_box(packet.content_as::<PeriodicDataPacket>().expect("valid content"))
        })
    });

    group.finish();
}

fn bench_embedded_parameters(c: &mut Criterion) {
    let values = vec![0.5; 100];
    let packet = periodic_packet(
        SampleDataFormat::Parameters(vec!["Sin:MyApp".into(), "Cos:MyApp".into()]),
        0,
        10_000_000,
        vec![double_column(&values), double_column(&values)],
    );

    c.bench_function("embedded_parameters_round_trip", |b| {
        b.iter(|| {
            let bytes = black_box(&packet).to_bytes();
            black_box(Packet::from_bytes(&bytes).expect("valid envelope"))
        })
    });
}

criterion_group!(benches, bench_periodic_encode, bench_envelope_decode, bench_embedded_parameters);
criterion_main!(benches);
