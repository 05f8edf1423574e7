//! Simulation driver
//!
//! Owns the worker pool, entity storage, spatial hash and scheduling
//! arena, and runs the per-frame cycle: step kernels over work blocks,
//! wait, rebuild the hash from the new positions, hand views to the
//! renderer. Nothing here is a process global; several simulations can
//! run side by side.

use crate::flock::{self, StepParams, StepStats};
use crate::hash::SpatialHash;
use crate::render::FrameView;
use boids_core::binfo;
use boids_core::entity::{BehaviorMask, ComponentMask, EntityStore};
use boids_core::error::{ConfigError, SimResult};
use boids_core::math::{renormalize, Vec3, Vec4};
use boids_core::SimConfig;
use boids_runtime::{BumpArena, WorkPool};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

/// Steps one `advance` call may run before dropping the backlog
///
/// Bounds the death spiral when a frame takes longer than the simulated
/// time it produces.
const MAX_STEPS_PER_ADVANCE: u32 = 8;

/// Ring headroom beyond one pass worth of blocks (hash build chunks)
const ORDER_SLACK: usize = 64;

/// Diagnostic snapshot for the host
#[derive(Debug, Clone, Copy)]
pub struct Diagnostics {
    pub frame: u64,
    pub workers: usize,
    pub items_added: u64,
    pub items_processed: u64,
    pub occupied_cells: usize,
    /// Mean neighbours per flocking agent in the last tick
    pub mean_neighbors: f32,
}

/// A running flocking simulation
pub struct Simulation {
    config: SimConfig,
    pool: WorkPool,
    entities: EntityStore,
    hash: SpatialHash,
    sched_arena: BumpArena,
    accumulator: f32,
    frame: u64,
    last_stats: StepStats,
}

impl Simulation {
    /// Validate the configuration and bring up every subsystem
    ///
    /// Positions scatter uniformly in `[-r, r]^3` from the seed; every
    /// entity starts as a spatial boid with all three behaviours and a
    /// random heading inside the speed band. The hash is built before
    /// the first tick so frame 0 queries a real snapshot.
    pub fn init(config: SimConfig) -> SimResult<Self> {
        config.validate()?;

        let n = config.num_entities;
        let workers = config.effective_workers();
        let max_blocks = workers * config.tasks_per_worker;

        // Per-executor scratch: one neighbour-id buffer of worst-case N
        let scratch_bytes = n * core::mem::size_of::<u32>() + 64 * 1024;
        let pool = WorkPool::start(workers, max_blocks + ORDER_SLACK, scratch_bytes)?;

        let hash = SpatialHash::new(config.cell_size, n, config.domain_radius, max_blocks)?;
        let sched_arena = BumpArena::new(max_blocks * 256 + 4096)?;

        let mut entities = EntityStore::new(n);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(config.seed);
        let r = config.domain_radius;
        for p in entities.positions_mut() {
            *p = [
                rng.gen_range(-r..r),
                rng.gen_range(-r..r),
                rng.gen_range(-r..r),
                1.0,
            ];
        }

        let cruise = (0.5 * (config.v_min + config.v_max)).max(config.v_min);
        for v in entities.velocities_mut() {
            let dir: Vec3 = [
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            ];
            *v = renormalize(dir, cruise);
        }

        for c in entities.components_mut() {
            *c = ComponentMask::SPATIAL.union(ComponentMask::BOID);
        }
        for b in entities.behaviors_mut() {
            *b = BehaviorMask::SEEK
                .union(BehaviorMask::FLEE)
                .union(BehaviorMask::ALIGN);
        }

        let mut sim = Self {
            config,
            pool,
            entities,
            hash,
            sched_arena,
            accumulator: 0.0,
            frame: 0,
            last_stats: StepStats::default(),
        };
        sim.hash.rebuild(sim.entities.positions(), &mut sim.pool);

        binfo!(
            "simulation up: {} entities, {} workers, {} occupied cells",
            n,
            workers,
            sim.hash.occupied_cells()
        );
        Ok(sim)
    }

    /// Run one tick with an explicit timestep
    pub fn step(&mut self, dt: f32) -> SimResult<()> {
        if !(dt > 0.0) {
            return Err(ConfigError::NonPositive("dt").into());
        }

        let params = StepParams {
            dt,
            v_min: self.config.v_min,
            v_max: self.config.v_max,
            a_max: self.config.a_max,
            r_seek: self.config.r_seek,
            r_flee: self.config.r_flee,
            r_align: self.config.r_align,
            attractor: self.config.attractor,
        };

        self.last_stats = flock::run_step(
            &mut self.entities,
            &self.hash,
            &mut self.pool,
            &self.sched_arena,
            &params,
            self.config.tasks_per_worker,
            self.config.min_block_entities,
        );

        // Reflect the new positions; queries next tick read this build
        self.hash.rebuild(self.entities.positions(), &mut self.pool);

        self.frame += 1;
        Ok(())
    }

    /// Feed wall-clock time through the fixed-step accumulator
    ///
    /// Runs zero or more fixed `config.fixed_dt` ticks and returns how
    /// many ran. A backlog past the step cap is discarded rather than
    /// chased.
    pub fn advance(&mut self, wall_dt: f32) -> SimResult<u32> {
        self.accumulator += wall_dt.max(0.0);

        let mut steps = 0u32;
        while self.accumulator >= self.config.fixed_dt && steps < MAX_STEPS_PER_ADVANCE {
            self.step(self.config.fixed_dt)?;
            self.accumulator -= self.config.fixed_dt;
            steps += 1;
        }
        if steps == MAX_STEPS_PER_ADVANCE {
            self.accumulator = 0.0;
        }
        Ok(steps)
    }

    /// Borrow-only position view, stable between ticks
    #[inline]
    pub fn positions(&self) -> &[Vec4] {
        self.entities.positions()
    }

    /// Borrow-only velocity view, stable between ticks
    #[inline]
    pub fn velocities(&self) -> &[Vec3] {
        self.entities.velocities()
    }

    /// The per-frame hand-off to a rendering collaborator
    pub fn frame_view(&self) -> FrameView<'_> {
        FrameView {
            positions: self.entities.positions(),
            velocities: self.entities.velocities(),
            frame: self.frame,
        }
    }

    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    #[inline]
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Mutable entity access for hosts that script components or
    /// behaviours between ticks
    pub fn entities_mut(&mut self) -> &mut EntityStore {
        &mut self.entities
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let pool = self.pool.stats();
        let mean_neighbors = if self.last_stats.agents > 0 {
            self.last_stats.neighbor_total as f32 / self.last_stats.agents as f32
        } else {
            0.0
        };

        Diagnostics {
            frame: self.frame,
            workers: pool.workers,
            items_added: pool.items_added,
            items_processed: pool.items_processed,
            occupied_cells: self.hash.occupied_cells(),
            mean_neighbors,
        }
    }

    /// Tear down the pool; dropping without calling this does the same
    pub fn shutdown(mut self) {
        self.pool.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boids_core::math::length;

    fn small_config(n: usize) -> SimConfig {
        SimConfig::from_env()
            .num_entities(n)
            .domain_radius(2.0)
            .cell_size(0.25)
            .speed_range(0.05, 1.0)
            .worker_count(2)
            .seed(42)
    }

    #[test]
    fn test_init_rejects_bad_config() {
        let cfg = small_config(0);
        assert!(Simulation::init(cfg).is_err());
    }

    #[test]
    fn test_init_scatters_in_domain() {
        let sim = Simulation::init(small_config(256)).unwrap();
        let r = sim.config().domain_radius;
        for p in sim.positions() {
            for a in 0..3 {
                assert!(p[a].abs() <= r);
            }
            assert_eq!(p[3], 1.0);
        }
        sim.shutdown();
    }

    #[test]
    fn test_step_holds_speed_invariants() {
        let mut sim = Simulation::init(small_config(256)).unwrap();
        for _ in 0..10 {
            sim.step(1.0 / 60.0).unwrap();
        }

        let cfg = sim.config().clone();
        for v in sim.velocities() {
            let speed = length(*v);
            assert!(speed <= cfg.v_max + 1e-4);
            assert!(speed >= cfg.v_min - 1e-4);
        }
        assert_eq!(sim.frame(), 10);
        sim.shutdown();
    }

    #[test]
    fn test_step_rejects_bad_dt() {
        let mut sim = Simulation::init(small_config(8)).unwrap();
        assert!(sim.step(0.0).is_err());
        assert!(sim.step(-1.0).is_err());
        sim.shutdown();
    }

    #[test]
    fn test_advance_accumulates_fixed_steps() {
        let mut sim = Simulation::init(small_config(64)).unwrap();
        let dt = sim.config().fixed_dt;

        // Less than one step of wall time: nothing runs
        assert_eq!(sim.advance(dt * 0.25).unwrap(), 0);
        // Enough accumulated for exactly one
        assert_eq!(sim.advance(dt * 0.80).unwrap(), 1);
        // Three more frames of backlog
        assert_eq!(sim.advance(dt * 3.0).unwrap(), 3);
        // A huge stall is capped, then the backlog is dropped
        assert_eq!(sim.advance(dt * 100.0).unwrap(), MAX_STEPS_PER_ADVANCE);
        assert_eq!(sim.advance(dt * 0.5).unwrap(), 0);

        sim.shutdown();
    }

    #[test]
    fn test_diagnostics_progress() {
        let mut sim = Simulation::init(small_config(256)).unwrap();
        sim.step(0.016).unwrap();
        let d = sim.diagnostics();

        assert_eq!(d.frame, 1);
        assert_eq!(d.workers, 2);
        assert!(d.items_processed > 0);
        assert!(d.items_added >= d.items_processed);
        assert!(d.occupied_cells > 0);
        assert!(d.mean_neighbors >= 0.0);
        sim.shutdown();
    }

    #[test]
    fn test_frame_view_lengths_agree() {
        let sim = Simulation::init(small_config(32)).unwrap();
        let view = sim.frame_view();
        assert_eq!(view.positions.len(), 32);
        assert_eq!(view.velocities.len(), 32);
        assert_eq!(view.frame, 0);
        sim.shutdown();
    }

    #[test]
    fn test_two_simulations_coexist() {
        let mut a = Simulation::init(small_config(64)).unwrap();
        let mut b = Simulation::init(small_config(64).seed(7)).unwrap();

        a.step(0.016).unwrap();
        b.step(0.016).unwrap();

        // Different seeds, different states
        assert_ne!(a.positions()[0], b.positions()[0]);
        a.shutdown();
        b.shutdown();
    }
}
