//! # boids - real-time flocking simulation engine
//!
//! Three tightly coupled subsystems drive every frame:
//!
//! - A **worker pool** (from `boids-runtime`) dispatching short-lived
//!   data-parallel tasks over a lock-free ring with adaptive waiting.
//! - A **uniform-grid spatial hash** with bulk parallel rebuilds,
//!   vectorized radius queries and an original-id permutation.
//! - A **flocking pipeline** (seek / flee / align) that queries the hash
//!   for neighbours and schedules per-entity work in independent blocks.
//!
//! ## Quick Start
//!
//! ```ignore
//! use boids::{SimConfig, Simulation};
//!
//! fn main() {
//!     let config = SimConfig::from_env().num_entities(4096);
//!     let mut sim = Simulation::init(config).expect("config rejected");
//!
//!     loop {
//!         let steps = sim.advance(frame_dt()).unwrap();
//!         if steps > 0 {
//!             render(sim.frame_view());
//!         }
//!     }
//! }
//! ```
//!
//! ## Frame anatomy
//!
//! ```text
//! reset scheduling arena
//!   -> partition [0, N) into blocks, one ring item each
//!   -> workers + main thread drain the ring (velocity pass)
//!   -> swap velocity buffers
//!   -> same blocks again (position pass)
//!   -> rebuild spatial hash from the new positions (parallel binning)
//!   -> hand positions/velocities to the renderer
//! ```
//!
//! All reads inside a pass come from the previous frame's snapshot, so
//! the cyclic neighbour graph never aliases a write.

#![allow(dead_code)]

pub mod flock;
pub mod hash;
pub mod render;
pub mod sim;

// Re-export core and runtime surface so hosts depend on one crate
pub use boids_core::config::SimConfig;
pub use boids_core::entity::{BehaviorMask, ComponentMask, EntityStore};
pub use boids_core::error::{ConfigError, PoolError, SimError, SimResult};
pub use boids_runtime::{BumpArena, PoolStats, TaskContext, TaskFn, WorkPool};

pub use flock::{block_count, StepParams, StepStats};
pub use hash::SpatialHash;
pub use render::{FrameView, MeshHandle, NullRenderer, Renderer};
pub use sim::{Diagnostics, Simulation};
