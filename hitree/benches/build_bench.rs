use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use hitree::*;
use std::sync::Arc;
use tractcloud::{CompactTract, GridDims, RamTractStore, RoiInfo, SeedCoord};

fn line_setup(count: usize, dim: usize) -> (RoiInfo, Arc<RamTractStore>) {
    let roi = RoiInfo {
        grid: "bench".to_string(),
        dims: GridDims {
            x: count,
            y: 1,
            z: 1,
        },
        num_streamlines: 0,
        seeds: (0..count).map(|i| SeedCoord::new(i as i32, 0, 0)).collect(),
        track_ids: (0..count).collect(),
    };
    let tracts: Vec<CompactTract> = (0..count)
        .map(|i| {
            CompactTract::new(
                (0..dim)
                    .map(|j| ((i * 31 + j * 7) % 13) as f32 / 13.0)
                    .collect(),
            )
        })
        .collect();
    (roi, Arc::new(RamTractStore::new(tracts)))
}

fn build_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("centroid_build");
    group.sample_size(10);
    for count in [32usize, 128].iter() {
        group.bench_with_input(BenchmarkId::new("line", count), count, |bench, count| {
            bench.iter(|| {
                let (roi, store) = line_setup(*count, 64);
                let mut builder = CentroidBuilder::new();
                builder.set_nb_order(6).set_no_log(true);
                builder.build(roi, store.clone(), store).unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, build_bench);
criterion_main!(benches);
