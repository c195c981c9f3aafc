use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use vecsweep_common::dataset::{database_vectors, query_batch};
use vecsweep_common::index::{FlatIndex, VectorIndex};
use vecsweep_common::vector::DistanceMetric;

/// Flat inner-product search across query batch sizes.
fn bench_flat_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("flat_search");
    group.sample_size(30);

    for dims in [128, 256].iter() {
        let data = database_vectors(20_000, *dims, 42);
        let mut index = FlatIndex::new(*dims, DistanceMetric::InnerProduct);
        index.add(&data).unwrap();

        for nq in [1, 16].iter() {
            let queries = query_batch(*nq, *dims, 1234);
            group.bench_with_input(
                BenchmarkId::new(format!("d{}", dims), nq),
                nq,
                |bench, _| bench.iter(|| index.search(black_box(&queries), 4).unwrap()),
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_flat_search);
criterion_main!(benches);
