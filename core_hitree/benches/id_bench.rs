use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use core_hitree::*;

pub fn criterion_benchmark(c: &mut Criterion) {
    let index = 124;
    let ci = ClusterId::node(index);
    c.bench_function("From", |b| {
        b.iter(|| ClusterId::from(black_box((true, index))))
    });

    c.bench_function("node", |b| b.iter(|| ClusterId::node(black_box(index))));

    c.bench_function("index", |b| b.iter(|| black_box(ci).index()));

    c.bench_function("is_node", |b| b.iter(|| black_box(ci).is_node()));
}

fn ids_to_vec(c: &mut Criterion) {
    let mut group = c.benchmark_group("ids_to_vec");
    for size in [2usize, 4, 8, 16, 32, 64, 128, 256].iter() {
        let ids: Vec<ClusterId> = (0..*size).map(|s| (s % 2 == 0, s).into()).collect();
        group.bench_with_input(
            BenchmarkId::new("ids_to_indexes", size),
            &ids,
            |b, ids| {
                b.iter(|| ids.to_indexes());
            },
        );
        group.bench_with_input(BenchmarkId::new("ids_to_pairs", size), &ids, |b, ids| {
            b.iter(|| ids.to_pairs());
        });
    }
    group.finish();
}

criterion_group!(benches, criterion_benchmark, ids_to_vec);
criterion_main!(benches);
