use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rand::prelude::*;
use vecbench::metrics::LatencyStats;

fn latency_samples(n: usize) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..n).map(|_| rng.random_range(0.001..0.5)).collect()
}

fn bench_summary(c: &mut Criterion) {
    let mut group = c.benchmark_group("latency_stats");
    for n in [100, 10_000, 1_000_000] {
        let samples = latency_samples(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &samples, |b, samples| {
            b.iter(|| LatencyStats::from_samples(black_box(samples)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_summary);
criterion_main!(benches);
