/// Single-threaded throughput of the basic operations, to catch regressions in the
/// uncontended path.
use std::hint::black_box;
use std::time::{Duration, Instant};

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rand::prelude::SliceRandom;
use rand::{Rng, rng};

use olcart::Tree;

const TREE_SIZES: [u64; 3] = [1 << 15, 1 << 18, 1 << 20];

pub fn rand_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("rand_insert");
    group.throughput(Throughput::Elements(1));

    let keys = gen_keys(3, 2, 3);
    group.bench_function("str_keys", |b| {
        let tree = Tree::new();
        let mut rng = rng();
        b.iter(|| {
            let key = &keys[rng.random_range(0..keys.len())];
            tree.insert(key, key.len());
        })
    });
    group.bench_function("u64_keys", |b| {
        let tree = Tree::new();
        let mut rng = rng();
        b.iter(|| {
            let key: u64 = rng.random();
            tree.insert(key.to_be_bytes(), key);
        })
    });

    group.finish();
}

pub fn rand_remove(c: &mut Criterion) {
    let mut group = c.benchmark_group("rand_remove");
    group.throughput(Throughput::Elements(1));

    let keys = gen_keys(3, 2, 3);
    group.bench_function("str_keys", |b| {
        let tree = Tree::new();
        for key in &keys {
            tree.insert(key, key.len());
        }
        let mut rng = rng();
        b.iter(|| {
            let key = &keys[rng.random_range(0..keys.len())];
            black_box(tree.remove(key));
        })
    });

    group.finish();
}

pub fn rand_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("rand_get");
    group.throughput(Throughput::Elements(1));
    for size in TREE_SIZES {
        group.bench_with_input(BenchmarkId::new("u64_keys", size), &size, |b, size| {
            let tree = Tree::new();
            for i in 0..*size {
                tree.insert(i.to_be_bytes(), i);
            }
            let mut rng = rng();
            b.iter(|| {
                let key = rng.random_range(0..*size);
                black_box(tree.search(key.to_be_bytes()));
            })
        });
    }

    let keys = gen_keys(3, 2, 3);
    let tree = Tree::new();
    for (i, key) in keys.iter().enumerate() {
        tree.insert(key, i);
    }
    group.bench_function("str_keys", |b| {
        let mut rng = rng();
        b.iter(|| {
            let key = &keys[rng.random_range(0..keys.len())];
            black_box(tree.search(key));
        })
    });

    group.finish();
}

pub fn seq_get(c: &mut Criterion) {
    for size in TREE_SIZES {
        c.bench_with_input(BenchmarkId::new("seq_get", size), &size, |b, size| {
            let tree = Tree::new();
            for i in 0..*size {
                tree.insert(i.to_be_bytes(), i);
            }
            b.iter_custom(|iters| {
                let mut c = 0;
                let start = Instant::now();
                for _ in 0..iters {
                    if c == *size {
                        c = 0;
                    }
                    black_box(tree.search(c.to_be_bytes()));
                    c += 1;
                }
                start.elapsed()
            })
        });
    }
}

pub fn seq_insert(c: &mut Criterion) {
    c.bench_function("seq_insert", |b| {
        let tree = Tree::new();
        let mut key = 0u64;
        b.iter(|| {
            tree.insert(key.to_be_bytes(), key);
            key += 1;
        })
    });
}

pub fn seq_remove(c: &mut Criterion) {
    for size in TREE_SIZES {
        c.bench_with_input(BenchmarkId::new("seq_remove", size), &size, |b, size| {
            let tree = Tree::new();
            b.iter_custom(|iters| {
                for i in 0..*size {
                    tree.insert(i.to_be_bytes(), i);
                }
                let mut start = Instant::now();
                let mut cumulative_time = Duration::new(0, 0);
                let mut c = 0;
                for _ in 0..iters {
                    if c == *size {
                        cumulative_time += start.elapsed();
                        c = 0;
                        for i in 0..*size {
                            tree.insert(i.to_be_bytes(), i);
                        }
                        start = Instant::now();
                    }
                    black_box(tree.remove(c.to_be_bytes()));
                    c += 1;
                }
                cumulative_time += start.elapsed();
                cumulative_time
            })
        });
    }
}

pub fn full_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_scan");
    for size in [1u64 << 10, 1 << 15] {
        let tree = Tree::new();
        for i in 0..size {
            tree.insert(i.to_be_bytes(), i);
        }
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::new("forward", size), &size, |b, _| {
            b.iter(|| black_box(tree.iter().count()))
        });
        group.bench_with_input(BenchmarkId::new("range_half", size), &size, |b, size| {
            let end = (size / 2).to_be_bytes();
            b.iter(|| black_box(tree.range(..end).count()))
        });
    }
    group.finish();
}

fn gen_keys(l1_prefix: usize, l2_prefix: usize, suffix: usize) -> Vec<String> {
    let mut keys = Vec::new();
    let chars: Vec<char> = ('a'..='z').collect();
    let mut rng = rng();
    for c1 in &chars {
        let level1_prefix = c1.to_string().repeat(l1_prefix);
        for c2 in &chars {
            let key_prefix = level1_prefix.clone() + &c2.to_string().repeat(l2_prefix);
            for _ in 0..=u8::MAX {
                let suffix: String = (0..suffix)
                    .map(|_| chars[rng.random_range(0..chars.len())])
                    .collect();
                keys.push(key_prefix.clone() + &suffix);
            }
        }
    }

    keys.shuffle(&mut rng);
    keys
}

criterion_group!(rand_benches, rand_get, rand_insert, rand_remove);
criterion_group!(seq_benches, seq_get, seq_insert, seq_remove);
criterion_group!(scan_benches, full_scan);
criterion_main!(rand_benches, seq_benches, scan_benches);
