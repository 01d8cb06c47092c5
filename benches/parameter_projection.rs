//! Benchmarks for projecting samples out of received packets
//!
//! Measures the per-packet cost the reader pays on every PeriodicData packet:
//! - Projection through a looked-up data format id
//! - Projection through embedded parameter names

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use pitlane::ParameterProjector;
use pitlane::protocol::{DataFormatId, SampleDataFormat};
use pitlane::test_utils::{StaticDataFormats, double_column, periodic_packet, received};
use std::hint::black_box;
use std::sync::Arc;

const SAMPLES: usize = 100;

fn bench_projection(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("Failed to build runtime");

    let formats = StaticDataFormats::new().with_format(
        "Default",
        DataFormatId(1),
        &["Cos:MyApp", "Sin:MyApp"],
    );
    let projector = ParameterProjector::new(Arc::new(formats), "Sin:MyApp");
    let values = vec![0.25; SAMPLES];

    let by_id = received(&periodic_packet(
        SampleDataFormat::Identifier(DataFormatId(1)),
        0,
        10_000_000,
        vec![double_column(&values), double_column(&values)],
    ));
    let embedded = received(&periodic_packet(
        SampleDataFormat::Parameters(vec!["Cos:MyApp".into(), "Sin:MyApp".into()]),
        0,
        10_000_000,
        vec![double_column(&values), double_column(&values)],
    ));

    let mut group = c.benchmark_group("parameter_projection");
    group.throughput(Throughput::Elements(SAMPLES as u64));

    group.bench_function("data_format_lookup", |b| {
        b.iter(|| {
            let records = runtime
                .block_on(projector.project(black_box(&by_id)))
                .expect("projection succeeds");
            black_box(records)
        })
    });

    group.bench_function("embedded_parameters", |b| {
        b.iter(|| {
            let records = runtime
                .block_on(projector.project(black_box(&embedded)))
                .expect("projection succeeds");
            black_box(records)
        })
    });

    group.finish();
}

criterion_group!(benches, bench_projection);
criterion_main!(benches);
