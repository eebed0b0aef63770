// benches/alloc_bench.rs
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use tierpool::prelude::*;
use tierpool::{cache, global};

fn bench_dispatcher_vs_direct(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatcher_comparison");
    global::init_default().unwrap();

    for size in [64, 256, 1024, 4096].iter() {
        group.bench_with_input(BenchmarkId::new("pooled", size), size, |b, &size| {
            b.iter(|| {
                let ptr = global::alloc(black_box(size));
                unsafe { global::free(ptr) };
            });
        });

        group.bench_with_input(BenchmarkId::new("system_heap", size), size, |b, &size| {
            let layout = std::alloc::Layout::from_size_align(size, 8).unwrap();
            b.iter(|| unsafe {
                let ptr = std::alloc::alloc(black_box(layout));
                std::alloc::dealloc(ptr, layout);
            });
        });
    }

    group.finish();
}

fn bench_thread_cache_hit_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("thread_cache");
    global::init_default().unwrap();

    group.bench_function("cached_roundtrip", |b| {
        cache::thread::init().unwrap();
        b.iter(|| {
            let ptr = cache::thread::alloc(black_box(128));
            unsafe { cache::thread::free(ptr, 128) };
        });
        cache::thread::flush();
    });

    group.bench_function("dispatcher_roundtrip", |b| {
        b.iter(|| {
            let ptr = global::alloc(black_box(128));
            unsafe { global::free(ptr) };
        });
    });

    group.finish();
}

fn bench_object_pool_cascade(c: &mut Criterion) {
    let mut group = c.benchmark_group("object_pool");

    group.bench_function("micro_cached", |b| {
        let pool = ObjectPool::new(ObjectPoolConfig {
            object_size: 64,
            initial_capacity: 64,
            max_capacity: 0,
        })
        .unwrap();
        // Prime the thread's micro-cache so the fast path is measured.
        let obj = pool.acquire().unwrap();
        unsafe { pool.release(obj) };

        b.iter(|| {
            let obj = pool.acquire().unwrap();
            unsafe { pool.release(black_box(obj)) };
        });
    });

    group.bench_function("global_free_list", |b| {
        let pool = ObjectPool::new(ObjectPoolConfig {
            object_size: 64,
            initial_capacity: 64,
            max_capacity: 0,
        })
        .unwrap();

        // Holding a batch forces each acquire past the micro-cache.
        b.iter(|| {
            let objs: Vec<_> = (0..16).map(|_| pool.acquire().unwrap()).collect();
            for obj in objs {
                unsafe { pool.release(black_box(obj)) };
            }
        });
    });

    group.finish();
}

fn bench_arena_vs_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("arena");
    global::init_default().unwrap();

    group.bench_function("arena_bump", |b| {
        cache::thread::init().unwrap();
        b.iter(|| {
            let mut arena = Arena::new(4096);
            for _ in 0..64 {
                black_box(arena.alloc(48));
            }
        });
        cache::thread::flush();
    });

    group.bench_function("per_object_pool", |b| {
        cache::thread::init().unwrap();
        b.iter(|| {
            let mut ptrs = [std::ptr::null_mut(); 64];
            for slot in &mut ptrs {
                *slot = cache::thread::alloc(48);
            }
            for ptr in ptrs {
                unsafe { cache::thread::free(black_box(ptr), 48) };
            }
        });
        cache::thread::flush();
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_dispatcher_vs_direct,
    bench_thread_cache_hit_path,
    bench_object_pool_cascade,
    bench_arena_vs_pool
);

criterion_main!(benches);
