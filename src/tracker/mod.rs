// src/tracker/mod.rs
//! Process-wide allocation tracking: counters, per-pointer records, leak
//! reports, and a soft byte budget.
//!
//! The tracker observes explicit `record_alloc`/`record_free` calls; it is
//! not wired into the allocation hot path. Counters are lock-free atomics
//! readable at any time; the per-pointer record table and the interned
//! path strings sit behind one mutex. Backtrace frames are captured before
//! the lock and symbolized only at dump time.

pub(crate) mod intern;

use crate::atomic::PeakCounter;
use crate::error::{AllocError, Result};
use crate::tracker::intern::{InternEntry, StringPool, entry_str};
use crossbeam::utils::CachePadded;
use std::collections::HashMap;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::ptr::NonNull;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::warn;

/// Call-stack frames captured per allocation record.
pub const MAX_BACKTRACE_FRAMES: usize = 16;

// Counters live outside the state mutex so `stats` never blocks.
static TOTAL_ALLOCATIONS: CachePadded<AtomicU64> = CachePadded::new(AtomicU64::new(0));
static TOTAL_FREES: CachePadded<AtomicU64> = CachePadded::new(AtomicU64::new(0));
static CURRENT_ALLOCATIONS: CachePadded<AtomicU64> = CachePadded::new(AtomicU64::new(0));
static PEAK_ALLOCATIONS: PeakCounter = PeakCounter::new();
static TOTAL_BYTES: CachePadded<AtomicU64> = CachePadded::new(AtomicU64::new(0));
static CURRENT_BYTES: CachePadded<AtomicU64> = CachePadded::new(AtomicU64::new(0));
static PEAK_BYTES: PeakCounter = PeakCounter::new();
static MEMORY_LIMIT: AtomicU64 = AtomicU64::new(0);

// Flag mirrors so the record paths read them without the state lock.
static TRACK_INDIVIDUAL: AtomicBool = AtomicBool::new(false);
static TRACK_BACKTRACES: AtomicBool = AtomicBool::new(false);
static SYMBOLIZE_BACKTRACES: AtomicBool = AtomicBool::new(true);

/// One tracked allocation, padded so table growth does not shear hot
/// records across cache lines.
struct AllocRecord {
    size: usize,
    file: Option<NonNull<InternEntry>>,
    line: u32,
    frames: [usize; MAX_BACKTRACE_FRAMES],
    frame_count: usize,
}

struct TrackerTables {
    records: HashMap<usize, CachePadded<AllocRecord>>,
    strings: StringPool,
}

struct TrackerState {
    tables: Option<TrackerTables>,
}

// Record and intern pointers are only reachable through the state mutex.
unsafe impl Send for TrackerState {}

static STATE: Mutex<Option<TrackerState>> = Mutex::new(None);

/// Lock-free snapshot of the tracker counters.
#[derive(Debug, Clone, Default)]
pub struct TrackerStats {
    /// Allocations recorded since init
    pub total_allocations: u64,
    /// Frees recorded since init
    pub total_frees: u64,
    /// Live recorded allocations
    pub current_allocations: u64,
    /// High-water mark of live allocations
    pub peak_allocations: u64,
    /// Bytes recorded since init
    pub total_bytes: u64,
    /// Live recorded bytes
    pub current_bytes: u64,
    /// High-water mark of live bytes
    pub peak_bytes: u64,
    /// Soft byte budget (0 = none)
    pub memory_limit: u64,
}

/// Initializes the tracker.
///
/// `track_individual` enables the per-pointer record table (and the
/// interned path strings backing it); `track_backtraces` captures call
/// stacks into each record. A second call is a no-op returning `Ok`.
pub fn init(track_individual: bool, track_backtraces: bool) -> Result<()> {
    let mut state = STATE.lock().unwrap();
    if state.is_some() {
        warn!("memory tracker already initialized");
        return Ok(());
    }
    let tables = if track_individual {
        Some(TrackerTables {
            records: HashMap::new(),
            strings: StringPool::new()?,
        })
    } else {
        None
    };
    *state = Some(TrackerState { tables });
    TRACK_INDIVIDUAL.store(track_individual, Ordering::Release);
    TRACK_BACKTRACES.store(track_backtraces, Ordering::Release);
    Ok(())
}

/// Logs remaining records as leaks, destroys the tables, and zeroes every
/// counter. The tracker can be re-initialized afterwards.
pub fn cleanup() {
    let mut state = STATE.lock().unwrap();
    if let Some(state) = state.take() {
        if let Some(tables) = state.tables {
            for (ptr, record) in &tables.records {
                let file = record
                    .file
                    .map_or("<unknown>", |f| unsafe { entry_str(f) });
                warn!(
                    ptr = format_args!("{ptr:#x}"),
                    size = record.size,
                    site = format_args!("{file}:{}", record.line),
                    "allocation leaked at tracker cleanup"
                );
            }
            // Record-held intern references die with the pool; releasing
            // them one by one would only churn the refcounts.
            drop(tables);
        }
    }
    TRACK_INDIVIDUAL.store(false, Ordering::Release);
    TRACK_BACKTRACES.store(false, Ordering::Release);
    TOTAL_ALLOCATIONS.store(0, Ordering::Relaxed);
    TOTAL_FREES.store(0, Ordering::Relaxed);
    CURRENT_ALLOCATIONS.store(0, Ordering::Relaxed);
    PEAK_ALLOCATIONS.reset();
    TOTAL_BYTES.store(0, Ordering::Relaxed);
    CURRENT_BYTES.store(0, Ordering::Relaxed);
    PEAK_BYTES.reset();
    MEMORY_LIMIT.store(0, Ordering::Relaxed);
}

/// Whether the tracker is currently initialized.
pub fn is_initialized() -> bool {
    STATE.lock().unwrap().is_some()
}

/// Records an allocation of `size` bytes at `ptr`, attributed to
/// `file:line`.
///
/// Counters update unconditionally; a record is stored only when
/// individual tracking is on.
pub fn record_alloc(ptr: *const u8, size: usize, file: &str, line: u32) {
    TOTAL_ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
    let current = CURRENT_ALLOCATIONS.fetch_add(1, Ordering::Relaxed) + 1;
    PEAK_ALLOCATIONS.observe(current);
    TOTAL_BYTES.fetch_add(size as u64, Ordering::Relaxed);
    let current_bytes = CURRENT_BYTES.fetch_add(size as u64, Ordering::Relaxed) + size as u64;
    PEAK_BYTES.observe(current_bytes);

    if !TRACK_INDIVIDUAL.load(Ordering::Acquire) {
        return;
    }
    // Frames are captured before the lock so slow symbol machinery can
    // never serialize concurrent recorders.
    let (frames, frame_count) = if TRACK_BACKTRACES.load(Ordering::Acquire) {
        capture_frames()
    } else {
        ([0; MAX_BACKTRACE_FRAMES], 0)
    };

    let mut state = STATE.lock().unwrap();
    let Some(tables) = state.as_mut().and_then(|s| s.tables.as_mut()) else {
        return;
    };
    let interned = tables.strings.intern(file);
    let record = CachePadded::new(AllocRecord {
        size,
        file: interned,
        line,
        frames,
        frame_count,
    });
    if let Some(previous) = tables.records.insert(ptr as usize, record) {
        warn!(ptr = ?ptr, "allocation recorded twice without a free");
        if let Some(entry) = previous.file {
            unsafe { tables.strings.release(entry) };
        }
    }
}

/// Records the free of a previously recorded pointer.
///
/// A lookup miss (double free or untracked pointer) is logged; the free
/// counter is incremented regardless.
pub fn record_free(ptr: *const u8) {
    TOTAL_FREES.fetch_add(1, Ordering::Relaxed);

    if !TRACK_INDIVIDUAL.load(Ordering::Acquire) {
        // Without records the byte delta is unknowable; only the
        // allocation count can be kept.
        let _ = CURRENT_ALLOCATIONS.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
            v.checked_sub(1)
        });
        return;
    }

    let mut state = STATE.lock().unwrap();
    let Some(tables) = state.as_mut().and_then(|s| s.tables.as_mut()) else {
        return;
    };
    match tables.records.remove(&(ptr as usize)) {
        Some(record) => {
            CURRENT_BYTES.fetch_sub(record.size as u64, Ordering::Relaxed);
            let _ = CURRENT_ALLOCATIONS
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
            if let Some(entry) = record.file {
                unsafe { tables.strings.release(entry) };
            }
        }
        None => {
            warn!(ptr = ?ptr, "free of untracked pointer (double free?)");
        }
    }
}

/// Lock-free counter snapshot.
pub fn stats() -> TrackerStats {
    TrackerStats {
        total_allocations: TOTAL_ALLOCATIONS.load(Ordering::Relaxed),
        total_frees: TOTAL_FREES.load(Ordering::Relaxed),
        current_allocations: CURRENT_ALLOCATIONS.load(Ordering::Relaxed),
        peak_allocations: PEAK_ALLOCATIONS.get(),
        total_bytes: TOTAL_BYTES.load(Ordering::Relaxed),
        current_bytes: CURRENT_BYTES.load(Ordering::Relaxed),
        peak_bytes: PEAK_BYTES.get(),
        memory_limit: MEMORY_LIMIT.load(Ordering::Relaxed),
    }
}

/// Sets the soft byte budget (0 clears it).
///
/// The budget is advisory; enforcement is the caller's policy.
pub fn set_limit(bytes: u64) {
    MEMORY_LIMIT.store(bytes, Ordering::Relaxed);
}

/// Whether recording `extra_bytes` more would cross the soft budget.
pub fn would_exceed_limit(extra_bytes: u64) -> bool {
    let limit = MEMORY_LIMIT.load(Ordering::Relaxed);
    limit != 0 && CURRENT_BYTES.load(Ordering::Relaxed) + extra_bytes > limit
}

/// Toggles symbol resolution in leak reports; raw addresses otherwise.
pub fn set_symbolize_backtraces(enable: bool) {
    SYMBOLIZE_BACKTRACES.store(enable, Ordering::Relaxed);
}

/// (unique interned paths, bytes saved by deduplication)
pub fn string_pool_stats() -> (usize, usize) {
    let state = STATE.lock().unwrap();
    state
        .as_ref()
        .and_then(|s| s.tables.as_ref())
        .map_or((0, 0), |t| t.strings.stats())
}

/// Writes a human-readable leak report to `path`.
pub fn dump_leaks(path: impl AsRef<Path>) -> Result<()> {
    let file = std::fs::File::create(path).map_err(AllocError::from)?;
    let mut out = BufWriter::new(file);
    let snapshot = stats();

    writeln!(out, "Memory Leak Report")?;
    writeln!(out, "=================")?;
    writeln!(out)?;
    writeln!(out, "Total allocations: {}", snapshot.total_allocations)?;
    writeln!(out, "Total frees: {}", snapshot.total_frees)?;
    writeln!(out, "Current allocations: {}", snapshot.current_allocations)?;
    writeln!(out, "Current bytes: {}", snapshot.current_bytes)?;
    writeln!(out)?;

    let state = STATE.lock().unwrap();
    let records = state
        .as_ref()
        .and_then(|s| s.tables.as_ref())
        .map(|t| &t.records);
    match records {
        Some(records) if !records.is_empty() => {
            writeln!(out, "Leaked allocations:")?;
            writeln!(out, "-------------------")?;
            writeln!(out)?;
            let symbolize = SYMBOLIZE_BACKTRACES.load(Ordering::Relaxed);
            for (ptr, record) in records {
                let file = record
                    .file
                    .map_or("<unknown>", |f| unsafe { entry_str(f) });
                writeln!(
                    out,
                    "Leak: {ptr:#x}, {} bytes, allocated at {file}:{}",
                    record.size, record.line
                )?;
                if record.frame_count > 0 {
                    writeln!(out, "  Backtrace:")?;
                    for &addr in &record.frames[..record.frame_count] {
                        match symbolize.then(|| resolve_symbol(addr)).flatten() {
                            Some(name) => writeln!(out, "    {name}")?,
                            None => writeln!(out, "    {addr:#x}")?,
                        }
                    }
                }
                writeln!(out)?;
            }
        }
        _ => {
            writeln!(out, "No memory leaks detected.")?;
        }
    }
    out.flush()?;
    Ok(())
}

#[cfg(feature = "backtrace")]
fn capture_frames() -> ([usize; MAX_BACKTRACE_FRAMES], usize) {
    let mut frames = [0usize; MAX_BACKTRACE_FRAMES];
    let mut count = 0;
    backtrace::trace(|frame| {
        frames[count] = frame.ip() as usize;
        count += 1;
        count < MAX_BACKTRACE_FRAMES
    });
    (frames, count)
}

#[cfg(not(feature = "backtrace"))]
fn capture_frames() -> ([usize; MAX_BACKTRACE_FRAMES], usize) {
    ([0; MAX_BACKTRACE_FRAMES], 0)
}

#[cfg(feature = "backtrace")]
fn resolve_symbol(addr: usize) -> Option<String> {
    let mut name = None;
    backtrace::resolve(addr as *mut std::ffi::c_void, |symbol| {
        if name.is_none() {
            name = symbol.name().map(|n| n.to_string());
        }
    });
    name
}

#[cfg(not(feature = "backtrace"))]
fn resolve_symbol(_addr: usize) -> Option<String> {
    None
}
