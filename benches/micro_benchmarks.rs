//! Micro benchmarks for option handling
//!
//! Run with: cargo bench --bench micro_benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use plugin_channel::connection::{BackoffConfig, DialSettings, Target};
use plugin_channel::{compose, DialOption};
use std::time::Duration;

fn caller_options(len: usize) -> Vec<DialOption> {
    (0..len)
        .map(|i| match i % 4 {
            0 => DialOption::ConnectTimeout(Duration::from_millis(100 + i as u64)),
            1 => DialOption::UserAgent(format!("host/{}", i)),
            2 => DialOption::Backoff(BackoffConfig::default()),
            _ => DialOption::TcpNodelay(i % 2 == 0),
        })
        .collect()
}

fn bench_compose(c: &mut Criterion) {
    let mut group = c.benchmark_group("compose");
    for len in [0usize, 4, 32] {
        let options = caller_options(len);
        group.bench_with_input(BenchmarkId::from_parameter(len), &options, |b, options| {
            b.iter(|| compose(black_box(options)))
        });
    }
    group.finish();
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");
    for len in [0usize, 4, 32] {
        let effective = compose(&caller_options(len));
        group.bench_with_input(BenchmarkId::from_parameter(len), &effective, |b, effective| {
            b.iter(|| DialSettings::resolve(black_box(effective)))
        });
    }
    group.finish();
}

fn bench_endpoint(c: &mut Criterion) {
    let target = Target::parse("127.0.0.1:50051").unwrap();
    let settings = DialSettings::resolve(&compose(&caller_options(8)));
    c.bench_function("endpoint", |b| {
        b.iter(|| settings.endpoint(black_box(&target)).unwrap())
    });
}

fn bench_parse_target(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_target");
    for address in ["127.0.0.1:50051", "[::1]:50051", "unix:///run/plugin.sock"] {
        group.bench_with_input(BenchmarkId::from_parameter(address), address, |b, address| {
            b.iter(|| Target::parse(black_box(address)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compose, bench_resolve, bench_endpoint, bench_parse_target);
criterion_main!(benches);
