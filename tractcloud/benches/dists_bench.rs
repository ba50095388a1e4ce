use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use tractcloud::*;

fn tract_distance_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("tract_distance");
    for size in [1000usize, 10000, 100000].iter() {
        let mut a = CompactTract::from_log_units((0..*size).map(|i| (i % 7) as f32 / 7.0).collect());
        let mut b = CompactTract::from_log_units((0..*size).map(|i| (i % 5) as f32 / 5.0).collect());
        a.compute_norm();
        b.compute_norm();
        let mut ac = CompactTractChar::from_float(&a);
        let mut bc = CompactTractChar::from_float(&b);
        ac.compute_norm();
        bc.compute_norm();
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("float", size), size, |bench, _| {
            bench.iter(|| a.tract_distance(&b).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("char", size), size, |bench, _| {
            bench.iter(|| ac.tract_distance(&bc).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("mixed", size), size, |bench, _| {
            bench.iter(|| a.tract_distance_char(&bc).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, tract_distance_bench);
criterion_main!(benches);
