//! Batch update example for cachemap
//!
//! Several worker threads keep per-word counters in one shared map. Each
//! increment is a read followed by a write, so it runs under a single guard.
//! At the end the counters are snapshotted, wiped, and restored from the bytes.

use cachemap::{ConcurrentMap, MetricsCollector};
use std::sync::Arc;
use std::thread;

const TEXT: &str = "the quick brown fox jumps over the lazy dog the end";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cachemap Batch Update Example");
    println!("=============================");

    let counts: Arc<ConcurrentMap<String, u32>> = Arc::new(ConcurrentMap::new());

    println!("\n1. Counting words on 4 threads:");
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let counts = Arc::clone(&counts);
            thread::spawn(move || {
                for word in TEXT.split_whitespace() {
                    let mut guard = counts.lock();
                    let current = guard.get(word).copied().unwrap_or(0);
                    guard.set(word.to_string(), current + 1);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker panicked");
    }

    let mut words: Vec<_> = counts.export().into_iter().collect();
    words.sort();
    for (word, count) in &words {
        println!("   {:>6}: {}", word, count);
    }

    println!("\n2. Seeding a key only once:");
    {
        let guard = counts.upgradable_read();
        if !guard.contains_key("cat") {
            guard.upgrade().set("cat".to_string(), 0);
            println!("   inserted \"cat\"");
        }
    }

    println!("\n3. Snapshot and restore:");
    let snapshot = counts.encode()?;
    println!("   encoded {} entries into {} bytes", counts.len(), snapshot.len());
    counts.clear();
    println!("   after clear: {} entries", counts.len());
    counts.decode(&snapshot)?;
    println!("   after decode: {} entries", counts.len());
    assert_eq!(counts.get("the"), Some(12));

    println!("\n4. Corrupt input leaves the map alone:");
    match counts.decode(&snapshot[..snapshot.len() / 2]) {
        Ok(()) => println!("   unexpectedly decoded"),
        Err(err) => println!("   rejected: {}", err),
    }
    println!("   still {} entries", counts.len());

    let metrics = counts.metrics();
    println!("\n5. Metrics:");
    println!("   shared acquisitions:    {}", metrics.shared_acquisitions);
    println!("   exclusive acquisitions: {}", metrics.exclusive_acquisitions);
    println!("   contention rate:        {:.1}%", metrics.contention_rate());

    Ok(())
}
