// tests/integration_tests.rs
//! Integration tests across the allocator tiers.
//!
//! The dispatcher and the tracker are process-global, so every test that
//! initializes, shuts down, or asserts exact counts on them serializes
//! through one lock. Thread-cache work runs in dedicated spawned threads so
//! each scenario starts from a clean thread-local slate.

use std::sync::{Mutex, MutexGuard};
use std::thread;
use tierpool::prelude::*;
use tierpool::{cache, global, tracker};

static GLOBAL_LOCK: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    GLOBAL_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

fn fresh_dispatcher(small: usize, medium: usize, large: usize) {
    global::shutdown();
    global::init(small, medium, large).unwrap();
}

#[test]
fn test_basic_lifecycle() {
    let _guard = serial();
    fresh_dispatcher(64, 32, 16);

    for (class, expected) in [
        (SizeClass::Small, 64),
        (SizeClass::Medium, 32),
        (SizeClass::Large, 16),
    ] {
        let stats = global::class_stats(class).unwrap();
        assert_eq!(stats.total_blocks, expected, "{}", class.name());
        assert_eq!(stats.free_blocks, expected, "{}", class.name());
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.peak_in_use, 0);
    }

    global::shutdown();
    assert!(!global::is_initialized());
    assert!(global::class_stats(SizeClass::Small).is_none());

    // Re-initialization after shutdown must succeed.
    global::init(8, 8, 8).unwrap();
    assert_eq!(
        global::class_stats(SizeClass::Small).unwrap().total_blocks,
        8
    );
}

#[test]
fn test_small_class_roundtrip() {
    let _guard = serial();
    fresh_dispatcher(64, 32, 16);

    let ptrs: Vec<*mut u8> = (0..500).map(|_| global::alloc(128)).collect();
    for (i, &ptr) in ptrs.iter().enumerate() {
        assert!(!ptr.is_null());
        unsafe { std::ptr::write_bytes(ptr, (i & 0xFF) as u8, 128) };
    }
    // Spot-check the patterns survived neighboring writes.
    for (i, &ptr) in ptrs.iter().enumerate().step_by(97) {
        let expected = (i & 0xFF) as u8;
        for offset in [0, 63, 127] {
            assert_eq!(unsafe { *ptr.add(offset) }, expected);
        }
    }
    for &ptr in ptrs.iter().rev() {
        unsafe { global::free(ptr) };
    }

    let stats = global::class_stats(SizeClass::Small).unwrap();
    assert_eq!(stats.in_use, 0);
    assert!(stats.peak_in_use >= 500);
    assert!(stats.total_blocks >= 500, "pool grew past the initial 64");
}

#[test]
fn test_mixed_sizes_and_heap_fallback() {
    let _guard = serial();
    fresh_dispatcher(64, 32, 16);
    tracker::cleanup();
    tracker::init(true, false).unwrap();

    let before = tracker::stats().current_bytes;
    let mut peak_seen = 0;
    for i in 0..300usize {
        let size = [128, 512, 2048, 8192][i % 4];
        let ptr = global::alloc(size);
        assert!(!ptr.is_null());
        tracker::record_alloc(ptr, size, "mixed.c", i as u32);
        unsafe { std::ptr::write_bytes(ptr, (i & 0xFF) as u8, size) };

        if size == 8192 {
            // Oversize allocations bypass the pools entirely.
            assert_eq!(unsafe { global::block_size_for(ptr) }, 0);
        } else {
            assert!(unsafe { global::block_size_for(ptr) } >= size);
        }

        peak_seen = peak_seen.max(tracker::stats().current_bytes);
        tracker::record_free(ptr);
        unsafe { global::free(ptr) };
    }

    let stats = tracker::stats();
    assert_eq!(stats.current_bytes, before);
    assert!(stats.peak_bytes >= peak_seen);
    assert_eq!(stats.total_allocations, 300);
    assert_eq!(stats.total_frees, 300);
    tracker::cleanup();
}

#[test]
fn test_thread_cache_hit_path() {
    let _guard = serial();
    fresh_dispatcher(64, 32, 16);

    thread::spawn(|| {
        cache::thread::init().unwrap();
        for _ in 0..1000 {
            let ptr = cache::thread::alloc(128);
            assert!(!ptr.is_null());
            unsafe { cache::thread::free(ptr, 128) };
        }
        let stats = cache::thread::stats().unwrap();
        assert!(stats.hits >= 999, "hits = {}", stats.hits);
        assert!(stats.misses() <= 1, "misses = {}", stats.misses());

        cache::thread::flush();
        assert_eq!(cache::thread::stats().unwrap().counts[0], 0);
        cache::thread::cleanup();
    })
    .join()
    .unwrap();
}

#[test]
fn test_leak_detection() {
    let _guard = serial();
    fresh_dispatcher(64, 32, 16);
    tracker::cleanup();
    tracker::init(true, false).unwrap();

    let buffer = vec![0u8; 1024];
    tracker::record_alloc(buffer.as_ptr(), 1024, "x.c", 42);

    let stats = tracker::stats();
    assert_eq!(stats.current_allocations, 1);
    assert_eq!(stats.current_bytes, 1024);

    let dir = tempfile::tempdir().unwrap();
    let report = dir.path().join("leaks.txt");

    tracker::dump_leaks(&report).unwrap();
    let text = std::fs::read_to_string(&report).unwrap();
    assert!(text.starts_with("Memory Leak Report"));
    assert_eq!(text.matches("Leak: ").count(), 1);
    assert!(text.contains("1024 bytes, allocated at x.c:42"), "{text}");

    tracker::record_free(buffer.as_ptr());
    tracker::dump_leaks(&report).unwrap();
    let text = std::fs::read_to_string(&report).unwrap();
    assert!(text.contains("No memory leaks detected."), "{text}");
    assert!(!text.contains("Leak: "));
    tracker::cleanup();
}

#[test]
fn test_object_pool_micro_cache() {
    // Object pools own their storage; no dispatcher state involved.
    thread::spawn(|| {
        let pool = ObjectPool::new(ObjectPoolConfig {
            object_size: 64,
            initial_capacity: 16,
            max_capacity: 16,
        })
        .unwrap();

        let objs: Vec<_> = (0..16).map(|_| pool.acquire().unwrap()).collect();
        assert!(pool.acquire().is_none());

        for obj in objs.iter().take(10) {
            unsafe { pool.release(*obj) };
        }
        let reacquired: Vec<_> = (0..5).map(|_| pool.acquire().unwrap()).collect();

        let stats = pool.stats();
        assert_eq!(stats.current_in_use, 11);
        assert_eq!(stats.peak_in_use, 16);
        assert!(stats.free_objects >= 5);
        // Conservation: cached + free + in-use covers every object.
        assert_eq!(stats.free_objects + stats.current_in_use, stats.total_objects);

        for obj in objs.iter().skip(10).chain(reacquired.iter()) {
            unsafe { pool.release(*obj) };
        }
        // Destruction drains this thread's micro-cache.
        drop(pool);
    })
    .join()
    .unwrap();
}

#[test]
fn test_block_pool_conservation() {
    let pool = BlockPool::new(BlockPoolConfig {
        block_size: 96,
        initial_blocks: 10,
        max_blocks: 0,
    })
    .unwrap();

    let held: Vec<_> = (0..7).map(|_| pool.alloc().unwrap()).collect();
    let stats = pool.stats();
    assert_eq!(stats.free_blocks + stats.in_use, stats.total_blocks);
    assert_eq!(stats.in_use, 7);
    for block in held {
        unsafe { pool.free(block).unwrap() };
    }
    let stats = pool.stats();
    assert_eq!(stats.free_blocks, stats.total_blocks);
}

#[test]
fn test_bounded_pool_exhaustion_stays_off_heap() {
    let pool = BlockPool::new(BlockPoolConfig {
        block_size: 64,
        initial_blocks: 4,
        max_blocks: 4,
    })
    .unwrap();

    let blocks: Vec<_> = (0..4).map(|_| pool.alloc().unwrap()).collect();
    assert!(pool.alloc().is_none());
    // The refusal must not have grown the pool.
    assert_eq!(pool.stats().total_blocks, 4);
    for block in blocks {
        unsafe { pool.free(block).unwrap() };
    }
}

#[test]
fn test_class_edge_sizes() {
    let _guard = serial();
    fresh_dispatcher(8, 8, 8);

    let edges = [
        (tierpool::class::SMALL_BLOCK_SIZE, tierpool::class::SMALL_BLOCK_SIZE),
        (
            tierpool::class::SMALL_BLOCK_SIZE + 1,
            tierpool::class::MEDIUM_BLOCK_SIZE,
        ),
        (
            tierpool::class::MEDIUM_BLOCK_SIZE,
            tierpool::class::MEDIUM_BLOCK_SIZE,
        ),
        (
            tierpool::class::MEDIUM_BLOCK_SIZE + 1,
            tierpool::class::LARGE_BLOCK_SIZE,
        ),
        (
            tierpool::class::LARGE_BLOCK_SIZE,
            tierpool::class::LARGE_BLOCK_SIZE,
        ),
    ];
    for (size, expected_block) in edges {
        let ptr = global::alloc(size);
        assert_eq!(unsafe { global::block_size_for(ptr) }, expected_block);
        unsafe { global::free(ptr) };
    }

    // One past the large class leaves the pools for the heap.
    let ptr = global::alloc(tierpool::class::LARGE_BLOCK_SIZE + 1);
    assert_eq!(unsafe { global::block_size_for(ptr) }, 0);
    unsafe { global::free(ptr) };
}

#[test]
fn test_alloc_zero_is_valid() {
    let _guard = serial();
    fresh_dispatcher(8, 8, 8);

    let ptr = global::alloc(0);
    assert!(!ptr.is_null());
    unsafe {
        *ptr = 0xEE;
        global::free(ptr);
    }
}

#[test]
fn test_free_reuses_without_growth() {
    let _guard = serial();
    fresh_dispatcher(8, 8, 8);

    let ptr = global::alloc(200);
    unsafe { global::free(ptr) };
    let total_before = global::class_stats(SizeClass::Small).unwrap().total_blocks;

    // A smaller request of the same class must reuse the freed block.
    let again = global::alloc(64);
    assert_eq!(
        global::class_stats(SizeClass::Small).unwrap().total_blocks,
        total_before
    );
    unsafe { global::free(again) };
}

#[test]
fn test_init_idempotent() {
    let _guard = serial();
    fresh_dispatcher(8, 8, 8);
    // A second init keeps the existing pools and reports success.
    assert!(global::init(100, 100, 100).is_ok());
    assert_eq!(
        global::class_stats(SizeClass::Small).unwrap().total_blocks,
        8
    );
}

#[test]
fn test_threads_with_caches_drain_clean() {
    let _guard = serial();
    fresh_dispatcher(32, 16, 8);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            thread::spawn(move || {
                cache::thread::init().unwrap();
                for i in 0..1000usize {
                    let size = [64, 200, 700, 3000][(t + i) % 4];
                    let ptr = cache::thread::alloc(size);
                    assert!(!ptr.is_null());
                    unsafe {
                        std::ptr::write_bytes(ptr, (i & 0xFF) as u8, size);
                        cache::thread::free(ptr, size);
                    }
                }
                cache::thread::cleanup();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    for class in [SizeClass::Small, SizeClass::Medium, SizeClass::Large] {
        let stats = global::class_stats(class).unwrap();
        assert_eq!(stats.in_use, 0, "{}", class.name());
        assert_eq!(stats.free_blocks, stats.total_blocks);
    }
}

#[test]
fn test_object_cache_over_dispatcher() {
    let _guard = serial();
    fresh_dispatcher(32, 16, 8);
    cache::object::system_init().unwrap();

    thread::spawn(|| {
        cache::object::init().unwrap();
        for _ in 0..100 {
            let ptr = cache::object::alloc(ObjectKind::Json, 512);
            assert!(!ptr.is_null());
            unsafe { cache::object::free(ObjectKind::Json, ptr, 512) };
        }
        let stats = cache::object::stats().unwrap();
        assert!(stats.hits >= 99);
        cache::object::cleanup();
    })
    .join()
    .unwrap();

    cache::object::system_shutdown();
    let stats = global::class_stats(SizeClass::Medium).unwrap();
    assert_eq!(stats.in_use, 0);
}

#[test]
fn test_arena_over_pool_tiers() {
    let _guard = serial();
    fresh_dispatcher(32, 16, 8);

    thread::spawn(|| {
        cache::thread::init().unwrap();
        {
            let mut arena = Arena::new(1024);
            for i in 0..200usize {
                let ptr = arena.alloc(48);
                assert!(!ptr.is_null());
                unsafe { std::ptr::write_bytes(ptr, (i & 0xFF) as u8, 48) };
            }
            let stats = arena.stats();
            assert_eq!(stats.total_allocated, 200 * 48);
            assert!(stats.block_count >= 10);
        } // Drop returns every block through the cache tiers.
        cache::thread::cleanup();
    })
    .join()
    .unwrap();

    for class in [SizeClass::Small, SizeClass::Medium, SizeClass::Large] {
        let stats = global::class_stats(class).unwrap();
        assert_eq!(stats.in_use, 0, "{}", class.name());
    }
}

#[test]
fn test_tracker_leak_logging_at_cleanup() {
    let _guard = serial();
    tracker::cleanup();
    tracker::init(true, false).unwrap();

    let buffer = vec![0u8; 64];
    tracker::record_alloc(buffer.as_ptr(), 64, "leaky.c", 9);
    // Cleanup with a live record logs it and must still reset cleanly.
    tracker::cleanup();
    assert_eq!(tracker::stats().current_allocations, 0);
    assert_eq!(tracker::stats().peak_bytes, 0);
}

#[test]
fn test_backtrace_capture_in_report() {
    let _guard = serial();
    tracker::cleanup();
    tracker::init(true, true).unwrap();
    tracker::set_symbolize_backtraces(false);

    let buffer = vec![0u8; 128];
    tracker::record_alloc(buffer.as_ptr(), 128, "bt.c", 5);

    let dir = tempfile::tempdir().unwrap();
    let report = dir.path().join("bt.txt");
    tracker::dump_leaks(&report).unwrap();
    let text = std::fs::read_to_string(&report).unwrap();
    assert!(text.contains("Leak: "));
    if cfg!(feature = "backtrace") {
        assert!(text.contains("Backtrace:"), "{text}");
    }

    tracker::record_free(buffer.as_ptr());
    tracker::set_symbolize_backtraces(true);
    tracker::cleanup();
}
