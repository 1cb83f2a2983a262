use criterion::{criterion_group, criterion_main, Criterion};
use fecweave::optimize::MemoryPool;

fn bench_pool_alloc(c: &mut Criterion) {
    let pool = MemoryPool::new(1024, 2048);
    c.bench_function("memory_pool alloc/free", |b| {
        b.iter(|| {
            let block = pool.alloc();
            pool.free(block);
        });
    });
}

fn bench_pool_group_burst(c: &mut Criterion) {
    // One decode cycle holds a whole group's blocks before releasing them.
    let pool = MemoryPool::new(1024, 2048);
    c.bench_function("memory_pool 13-block burst", |b| {
        b.iter(|| {
            let blocks: Vec<_> = (0..13).map(|_| pool.alloc()).collect();
            for block in blocks {
                pool.free(block);
            }
        });
    });
}

criterion_group!(benches, bench_pool_alloc, bench_pool_group_burst);
criterion_main!(benches);
