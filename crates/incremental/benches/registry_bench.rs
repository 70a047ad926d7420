//! Benchmarks for rejoin-incremental.
//!
//! Target: a single parent edge update < 10μs

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rejoin_incremental::{DiffSet, ForeignKeyRegistry};

fn child_ids(range: std::ops::Range<usize>) -> Vec<String> {
    range.map(|i| format!("c{}", i)).collect()
}

fn bench_diff_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff_set");

    group.bench_function("insert_remove_cancel", |b| {
        let mut diff = DiffSet::new();
        b.iter(|| {
            diff.insert(black_box(42u64));
            diff.remove(black_box(42u64));
        })
    });

    group.finish();
}

fn bench_registry_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_add");

    for size in [1, 10, 100, 1000] {
        let keys = child_ids(0..size);
        group.bench_with_input(BenchmarkId::new("fresh_edge", size), &keys, |b, keys| {
            b.iter(|| {
                let mut registry = ForeignKeyRegistry::new();
                registry.add(1, "p1", black_box(keys.clone()));
                registry
            })
        });
    }

    group.finish();
}

fn bench_registry_replace(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_replace");

    // Shift the child window by one: one addition and one removal per call.
    for size in [10, 100, 1000] {
        let even = child_ids(0..size);
        let odd = child_ids(1..size + 1);
        group.bench_with_input(BenchmarkId::new("shift_by_one", size), &size, |b, _| {
            let mut registry = ForeignKeyRegistry::new();
            registry.add(1, "p1", even.clone());
            let mut flip = false;
            b.iter(|| {
                let next = if flip { even.clone() } else { odd.clone() };
                flip = !flip;
                let delta = registry.replace(1, "p1", black_box(next));
                registry.clear();
                delta
            })
        });
    }

    group.finish();
}

fn bench_fan_in(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_in");

    // Many parents referencing one shared child.
    for parents in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("shared_child", parents), &parents, |b, &parents| {
            b.iter(|| {
                let mut registry = ForeignKeyRegistry::new();
                for p in 0..parents {
                    registry.add(p as u64, "p", vec!["shared".to_string()]);
                }
                for p in 0..parents {
                    registry.remove(p as u64, "p");
                }
                black_box(registry.removed().len())
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_diff_set,
    bench_registry_add,
    bench_registry_replace,
    bench_fan_in,
);

criterion_main!(benches);
