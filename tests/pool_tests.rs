//! Block pool behavior under contention: rotation, clustering, forced
//! reclamation and range keep-alive.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use strand::pool::{BlockPool, DataRange, PoolConfig, RangeKind};

#[test]
fn test_round_trip_restores_free_count() {
    let pool = BlockPool::new("rt", PoolConfig::new(128, 16)).unwrap();

    let first = pool.get_blocks(6, 6, None).unwrap();
    let second = pool.get_blocks(4, 4, None).unwrap();
    assert_eq!(pool.free_blocks(), 6);

    drop(first);
    assert_eq!(pool.free_blocks(), 12);
    drop(second);
    assert_eq!(pool.free_blocks(), 16);
}

/// Claiming one block at a time from a full pool visits every block
/// exactly once before any block repeats.
#[test]
fn test_rotation_visits_every_block_once() {
    let pool = BlockPool::new("rot", PoolConfig::new(64, 8)).unwrap();

    let mut first_cycle = Vec::new();
    for _ in 0..8 {
        let blocks = pool.get_blocks(1, 1, None).unwrap();
        first_cycle.push(blocks[0].index());
        drop(blocks);
    }
    let mut sorted = first_cycle.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), 8, "a block repeated within one cycle");

    // The ninth claim starts the next cycle at the first block again
    let blocks = pool.get_blocks(1, 1, None).unwrap();
    assert_eq!(blocks[0].index(), first_cycle[0]);
}

#[test]
fn test_clustered_pool_allocates_aligned_runs() {
    let pool = BlockPool::new("clustered", PoolConfig::new(64, 16).clustered(4)).unwrap();

    let runs = pool.get_blocks(3, 3, None).unwrap();
    assert_eq!(runs.len(), 3);
    for run in &runs {
        assert_eq!(run.index() % 4, 0);
        assert_eq!(run.len(), 256);
    }
    assert_eq!(pool.free_blocks(), 4);

    // Releasing one run frees all four of its members together
    let mut runs = runs;
    runs.pop();
    assert_eq!(pool.free_blocks(), 8);
}

/// A data range keeps its block alive after the original handle drops;
/// narrowing produces an independently retaining view.
#[test]
fn test_range_keeps_block_alive() {
    let pool = BlockPool::new("ranges", PoolConfig::new(256, 2)).unwrap();

    let mut blocks = pool.get_blocks(1, 1, None).unwrap();
    let mut block = blocks.pop().unwrap();
    block.write(b"payload bytes here").unwrap();

    let range = DataRange::new(block, 8, 5, RangeKind::Payload);
    assert_eq!(pool.free_blocks(), 1);
    assert_eq!(range.as_slice(), b"bytes");

    let narrowed = range.slice(0, 4, RangeKind::Payload);
    drop(range);
    assert_eq!(pool.free_blocks(), 1);
    assert_eq!(narrowed.as_slice(), b"byte");

    drop(narrowed);
    assert_eq!(pool.free_blocks(), 2);
}

/// Forced reclamation takes effect immediately, wakes a blocked waiter,
/// and absorbs straggling releases.
#[test]
fn test_forced_reclamation_under_contention() {
    let pool = BlockPool::new("forced", PoolConfig::new(64, 2)).unwrap();

    let held = pool.get_blocks(2, 2, Some("owner")).unwrap();
    let straggler = held[0].clone();

    let waiter = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.get_blocks(2, 2, Some("waiter")).unwrap())
    };
    thread::sleep(Duration::from_millis(20));

    pool.return_blocks(held);
    let reclaimed = waiter.join().unwrap();
    assert_eq!(reclaimed.len(), 2);

    // The straggler's later drop must not disturb the new owner
    drop(straggler);
    assert_eq!(pool.free_blocks(), 0);
    drop(reclaimed);
    assert_eq!(pool.free_blocks(), 2);
}

/// Several writers hammer a small pool with blocking claims; every
/// block comes home and no write tears.
#[test]
fn test_concurrent_blocking_claims() {
    let pool = BlockPool::new("stress", PoolConfig::new(32, 8)).unwrap();

    let mut handles = Vec::new();
    for t in 0..4u8 {
        let pool = Arc::clone(&pool);
        handles.push(thread::spawn(move || {
            for _ in 0..100 {
                let mut blocks = pool.get_blocks(2, 1, None).unwrap();
                for block in &mut blocks {
                    block.write(&[t; 32]).unwrap();
                }
                for block in &blocks {
                    assert!(block.as_slice().iter().all(|&b| b == t));
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(pool.free_blocks(), 8);
}

/// Non-blocking probes report pushback with an empty result instead of
/// stalling the caller.
#[test]
fn test_probe_reports_pushback() {
    let pool = BlockPool::new("probe", PoolConfig::new(64, 2)).unwrap();
    let held = pool.get_blocks(2, 2, None).unwrap();

    let probe = pool.get_blocks(1, 0, None).unwrap();
    assert!(probe.is_empty());

    drop(held);
    let probe = pool.get_blocks(1, 0, None).unwrap();
    assert_eq!(probe.len(), 1);
}
