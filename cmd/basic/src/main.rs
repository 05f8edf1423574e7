//! Basic demo - run a headless simulation and report
//!
//! Configuration comes from BOIDS_* environment variables; the frame
//! count is the first argument (default 120).

use boids::{NullRenderer, Renderer, SimConfig, Simulation};
use std::time::Instant;

fn main() {
    println!("=== boids basic demo ===\n");

    let frames: u64 = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(120);

    let config = SimConfig::from_env();
    println!(
        "entities: {}, workers: {} (0 = hardware), cell size: {}",
        config.num_entities, config.worker_count, config.cell_size
    );

    let mut sim = match Simulation::init(config) {
        Ok(sim) => sim,
        Err(e) => {
            eprintln!("failed to start: {}", e);
            std::process::exit(1);
        }
    };
    let mut renderer = NullRenderer::new();

    let dt = 1.0 / 60.0;
    let start = Instant::now();

    for frame in 0..frames {
        sim.step(dt).expect("step failed");

        let view = sim.frame_view();
        assert_eq!(view.frame, frame + 1);
        renderer.draw_frame();

        if (frame + 1) % 60 == 0 {
            let d = sim.diagnostics();
            println!(
                "frame {:5}: {:6.2} mean neighbours, {:6} occupied cells",
                d.frame, d.mean_neighbors, d.occupied_cells
            );
        }
    }

    let elapsed = start.elapsed();
    let d = sim.diagnostics();

    println!("\n=== Results ===");
    println!("frames:           {}", d.frame);
    println!("wall time:        {:?}", elapsed);
    println!(
        "frame rate:       {:.1} fps",
        frames as f64 / elapsed.as_secs_f64()
    );
    println!("workers:          {}", d.workers);
    println!("items processed:  {}", d.items_processed);
    println!("occupied cells:   {}", d.occupied_cells);
    println!("mean neighbours:  {:.2}", d.mean_neighbors);
    println!("frames drawn:     {}", renderer.frames_drawn);

    sim.shutdown();
}
