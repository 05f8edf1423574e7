//! Stress driver - pool saturation, wait behaviour, hash exactness
//!
//! Exercises the engine's concurrency and query guarantees at scale and
//! prints PASS/FAIL per check. Exit code 1 on any failure.

use boids::{SpatialHash, TaskContext, WorkPool};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

// Mirrors the pool's adaptive-wait threshold
const SPIN_THRESHOLD: u64 = 1000;

unsafe fn bump_task(data: *mut u8, _ctx: &TaskContext) {
    (*(data as *const AtomicUsize)).fetch_add(1, Ordering::Relaxed);
}

fn check(name: &str, ok: bool) -> bool {
    println!("{:40} {}", name, if ok { "PASS" } else { "FAIL" });
    ok
}

fn saturation(workers: usize, n: usize) -> bool {
    let mut pool = WorkPool::start(workers, 10 * n, 4096).unwrap();
    let counter = AtomicUsize::new(0);

    let start = Instant::now();
    for _ in 0..10 * n {
        // Safety: counter outlives the wait below
        unsafe {
            pool.add_work(bump_task, &counter as *const _ as *mut u8);
        }
    }
    if pool.wait_for_completion(Some(Duration::from_secs(60))).is_err() {
        return false;
    }
    println!(
        "  {} tasks through {} workers in {:?}",
        10 * n,
        workers,
        start.elapsed()
    );

    counter.load(Ordering::Relaxed) == 10 * n
}

fn interleaved_waits(workers: usize) -> bool {
    let mut pool = WorkPool::start(workers, 512, 4096).unwrap();
    let counter = AtomicUsize::new(0);

    let mut total = 0;
    for round in 0..200 {
        let batch = 1 + round % 13;
        for _ in 0..batch {
            unsafe {
                pool.add_work(bump_task, &counter as *const _ as *mut u8);
            }
        }
        total += batch;
        if pool.wait_for_completion(Some(Duration::from_secs(10))).is_err() {
            return false;
        }
    }
    if counter.load(Ordering::Relaxed) != total {
        return false;
    }

    // No worker that executed work busy-spun past the deep-idle bound
    // while that work was available
    for w in 0..pool.worker_count() {
        if pool.tasks_run(w) > 0 && pool.max_spins_before_run(w) > 10 * SPIN_THRESHOLD {
            println!(
                "  worker {} spun {} times before a task",
                w,
                pool.max_spins_before_run(w)
            );
            return false;
        }
    }
    true
}

fn hash_exactness(n: usize, queries: usize) -> bool {
    let mut pool = WorkPool::start(4, 4096, 64 * 1024).unwrap();
    let mut hash = SpatialHash::new(0.25, n, 1.0, 32).unwrap();
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(0xD1CE);

    for _ in 0..2 {
        let positions: Vec<[f32; 4]> = (0..n)
            .map(|_| {
                [
                    rng.gen_range(-1.0f32..1.0),
                    rng.gen_range(-1.0f32..1.0),
                    rng.gen_range(-1.0f32..1.0),
                    1.0,
                ]
            })
            .collect();
        hash.rebuild(&positions, &mut pool);

        if !hash.verify_against_brute_force(&positions, [0.0; 3], 0.5) {
            return false;
        }
        for _ in 0..queries {
            let center = [
                rng.gen_range(-1.2f32..1.2),
                rng.gen_range(-1.2f32..1.2),
                rng.gen_range(-1.2f32..1.2),
            ];
            let radius = rng.gen_range(0.05f32..0.8);
            if !hash.verify_against_brute_force(&positions, center, radius) {
                println!("  query diverged at {:?} r {}", center, radius);
                return false;
            }
        }
    }
    true
}

fn main() {
    println!("=== boids stress ===\n");

    let n: usize = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(10_000);
    let workers = std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4);

    let mut ok = true;
    ok &= check("pool saturation (10N exact)", saturation(workers, n));
    ok &= check("interleaved submit/wait + spin bound", interleaved_waits(workers));
    ok &= check("hash exactness vs brute force", hash_exactness(1000, 50));

    println!("\n{}", if ok { "all checks passed" } else { "FAILURES" });
    if !ok {
        std::process::exit(1);
    }
}
