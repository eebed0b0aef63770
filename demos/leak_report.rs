// demos/leak_report.rs
//! Records a deliberately leaked allocation and prints the leak report.

use tierpool::prelude::*;
use tierpool::{global, tracker};

fn main() -> Result<()> {
    global::init_default()?;
    tracker::init(true, true)?;
    tracker::set_limit(1 << 20);

    let forgotten = global::alloc(1024);
    tracker::record_alloc(forgotten, 1024, "demos/leak_report.rs", 14);

    let freed = global::alloc(256);
    tracker::record_alloc(freed, 256, "demos/leak_report.rs", 17);
    tracker::record_free(freed);
    unsafe { global::free(freed) };

    let stats = tracker::stats();
    println!(
        "tracked: {} live allocations, {} live bytes (peak {})",
        stats.current_allocations, stats.current_bytes, stats.peak_bytes
    );
    println!(
        "budget: would another 2 MiB exceed the limit? {}",
        tracker::would_exceed_limit(2 << 20)
    );

    let path = std::env::temp_dir().join("tierpool_leaks.txt");
    tracker::dump_leaks(&path)?;
    println!("--- {} ---", path.display());
    print!("{}", std::fs::read_to_string(&path)?);

    unsafe { global::free(forgotten) };
    tracker::cleanup();
    global::shutdown();
    Ok(())
}
