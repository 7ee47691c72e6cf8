//! Benchmarks for the carbonhouse request path
//!
//! Run with: cargo bench

use carbonhouse::encoding::Format;
use carbonhouse::index::{build_predicate, DateRange, PredicateOptions};
use carbonhouse::pattern::{compile, CompileOptions};
use carbonhouse::render::{align, Aggregation, RawPoint};
use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;

const PATTERNS: [&str; 4] = [
    "servers.web01.cpu.user",
    "servers.web*.cpu.{user,system,idle}",
    "servers.[a-f]?.disk.**",
    "seriesByTag('name=cpu','dc=~east|west','host!=')",
];

fn raw_points(count: usize) -> Vec<RawPoint> {
    (0..count)
        .map(|i| RawPoint::new(1_709_596_800 + i as i64 * 10, (i % 97) as f64))
        .collect()
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    let opts = CompileOptions::default();

    for pattern in PATTERNS {
        group.bench_function(pattern, |b| {
            b.iter(|| compile(black_box(pattern), &opts).unwrap())
        });
    }

    group.finish();
}

fn bench_predicate(c: &mut Criterion) {
    let mut group = c.benchmark_group("predicate");
    let opts = CompileOptions::default();
    let predicate_opts = PredicateOptions::default();
    let day = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
    let range = DateRange::last_days(day, 7);

    for pattern in PATTERNS {
        let node = Arc::new(compile(pattern, &opts).unwrap());
        group.bench_function(pattern, |b| {
            b.iter(|| build_predicate(black_box(&node), &range, &predicate_opts))
        });
    }

    group.finish();
}

fn bench_align(c: &mut Criterion) {
    let mut group = c.benchmark_group("align");

    for size in [360, 8_640, 86_400] {
        let points = raw_points(size);
        let stop = 1_709_596_800 + size as i64 * 10;
        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("avg_60s_{}", size), |b| {
            b.iter(|| {
                align(
                    "servers.web01.cpu",
                    black_box(points.clone()),
                    1_709_596_800,
                    stop,
                    60,
                    Aggregation::Avg,
                )
            })
        });
    }

    group.finish();
}

fn bench_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("encoding");
    let stop = 1_709_596_800 + 8_640 * 10;
    let series: Vec<_> = (0..20)
        .map(|i| {
            align(
                &format!("servers.web{:02}.cpu", i),
                raw_points(8_640),
                1_709_596_800,
                stop,
                60,
                Aggregation::Avg,
            )
        })
        .collect();
    group.throughput(Throughput::Elements(series.len() as u64));

    for format in [Format::Json, Format::Pickle, Format::Protobuf] {
        group.bench_function(format!("render_{}", format), |b| {
            b.iter(|| format.encode_render(black_box(&series)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_compile, bench_predicate, bench_align, bench_encoding);
criterion_main!(benches);
