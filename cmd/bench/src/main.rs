//! Throughput sweep - frames per second across entity counts

use boids::{SimConfig, Simulation};
use std::time::Instant;

fn run(n: usize, frames: u64) {
    let config = SimConfig::from_env()
        .num_entities(n)
        .domain_radius((n as f32).cbrt() * 0.2)
        .seed(7);

    let mut sim = match Simulation::init(config) {
        Ok(sim) => sim,
        Err(e) => {
            eprintln!("n={}: failed to start: {}", n, e);
            return;
        }
    };

    // Warm the caches and the pool before timing
    for _ in 0..5 {
        sim.step(1.0 / 60.0).unwrap();
    }

    let start = Instant::now();
    for _ in 0..frames {
        sim.step(1.0 / 60.0).unwrap();
    }
    let elapsed = start.elapsed();
    let d = sim.diagnostics();

    println!(
        "{:>8} entities: {:7.1} fps, {:6.2} mean neighbours, {:6} cells",
        n,
        frames as f64 / elapsed.as_secs_f64(),
        d.mean_neighbors,
        d.occupied_cells
    );

    sim.shutdown();
}

fn main() {
    println!("=== boids throughput sweep ===\n");

    let frames: u64 = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(60);

    for n in [1_000, 4_000, 16_000] {
        run(n, frames);
    }
}
