// demos/basic_usage.rs
//! Walks an allocation through every tier and prints the resulting stats.

use tierpool::prelude::*;
use tierpool::{cache, global};

fn main() -> Result<()> {
    global::init(64, 32, 16)?;
    cache::thread::init()?;

    // Pooled classes: small, medium, large.
    let mut held = Vec::new();
    for size in [100, 800, 3000] {
        let ptr = cache::thread::alloc(size);
        assert!(!ptr.is_null());
        unsafe { std::ptr::write_bytes(ptr, 0xAB, size) };
        held.push((ptr, size));
    }
    // Oversize goes straight to the fallback heap.
    let big = cache::thread::alloc(64 * 1024);
    assert!(!big.is_null());

    for (ptr, size) in held {
        unsafe { cache::thread::free(ptr, size) };
    }
    unsafe { cache::thread::free(big, 64 * 1024) };

    // Second pass of the same sizes is served from the thread cache.
    for size in [100, 800, 3000] {
        let ptr = cache::thread::alloc(size);
        unsafe { cache::thread::free(ptr, size) };
    }

    let stats = cache::thread::stats().expect("cache initialized");
    println!(
        "thread cache: {} hits, {} misses ({:.0}% hit ratio)",
        stats.hits,
        stats.misses(),
        stats.hit_ratio() * 100.0
    );

    for class in [SizeClass::Small, SizeClass::Medium, SizeClass::Large] {
        let stats = global::class_stats(class).expect("initialized");
        println!(
            "{:>6} pool: {} blocks of {} bytes, peak {} in use",
            class.name(),
            stats.total_blocks,
            stats.block_size,
            stats.peak_in_use
        );
    }

    // A bounded object pool with a per-thread micro-cache.
    let pool = ObjectPool::new(ObjectPoolConfig {
        object_size: 96,
        initial_capacity: 8,
        max_capacity: 32,
    })?;
    let objs: Vec<_> = (0..8).map(|_| pool.acquire().unwrap()).collect();
    for obj in objs {
        unsafe { pool.release(obj) };
    }
    let stats = pool.stats();
    println!(
        "object pool: {} total, {} free (micro-cache included), peak {}",
        stats.total_objects, stats.free_objects, stats.peak_in_use
    );

    // Arena: bulk free of two hundred bump allocations at once.
    let mut arena = Arena::new(4096);
    for _ in 0..200 {
        arena.alloc(40);
    }
    let stats = arena.stats();
    println!(
        "arena: {} bytes across {} blocks",
        stats.total_allocated, stats.block_count
    );
    drop(arena);

    cache::thread::cleanup();
    global::shutdown();
    Ok(())
}
