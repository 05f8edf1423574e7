//! Flocking step kernels and block scheduler
//!
//! One tick runs two passes over `[0, N)`, both partitioned into the same
//! independent blocks: a velocity pass (query neighbours, accumulate
//! seek/flee/align, integrate acceleration) and a position pass. Reads
//! come from the previous frame's snapshot - positions are stable during
//! the velocity pass and velocities are double-buffered - so no entity is
//! ever read and written concurrently.

use crate::hash::SpatialHash;
use boids_core::entity::{BehaviorMask, ComponentMask, EntityStore};
use boids_core::math::{add, clamp_magnitude, length_sq, renormalize, scale, sub, xyz, Vec3, EPSILON};
use boids_runtime::{BumpArena, TaskContext, WorkPool};

use std::sync::atomic::{AtomicU64, Ordering};

/// Kinematic parameters for one tick
#[derive(Debug, Clone, Copy)]
pub struct StepParams {
    pub dt: f32,
    pub v_min: f32,
    pub v_max: f32,
    pub a_max: f32,
    /// Cohesion radius; also the single neighbour-query radius
    pub r_seek: f32,
    /// Separation radius, effective value clamped to `r_seek`
    pub r_flee: f32,
    /// Alignment radius, effective value clamped to `r_seek`
    pub r_align: f32,
    /// Optional global seek target
    pub attractor: Option<Vec3>,
}

/// Aggregates accumulated by the velocity pass
#[derive(Debug, Clone, Copy, Default)]
pub struct StepStats {
    /// Neighbours returned across all agent queries (self excluded)
    pub neighbor_total: u64,
    /// Entities that ran the flocking kernels this tick
    pub agents: u64,
}

/// Shared tick counters, arena-allocated so blocks can report without a
/// result channel
struct StepMetrics {
    neighbors: AtomicU64,
    agents: AtomicU64,
}

/// Number of work blocks for `n` entities
///
/// `workers * tasks_per_worker`, clamped so every block keeps at least
/// `min_block` entities; the last block absorbs the remainder.
pub fn block_count(n: usize, workers: usize, tasks_per_worker: usize, min_block: usize) -> usize {
    if n == 0 {
        return 0;
    }
    let target = workers.max(1) * tasks_per_worker.max(1);
    let by_min = n / min_block.max(1);
    target.min(by_min).max(1)
}

/// Per-block task descriptor: plain POD, lives in the scheduling arena
/// until the pass completes
#[derive(Clone, Copy)]
struct BlockTask {
    start: u32,
    end: u32,
    /// Total entity count (scratch buffer size for queries)
    n: u32,

    positions: *mut [f32; 4],
    vel_front: *const [f32; 3],
    vel_back: *mut [f32; 3],
    components: *const ComponentMask,
    behaviors: *const BehaviorMask,
    hash: *const SpatialHash,
    metrics: *const StepMetrics,

    dt: f32,
    v_min: f32,
    v_max: f32,
    a_max: f32,
    r_seek: f32,
    r_flee: f32,
    r_align: f32,
    attractor: [f32; 3],
    has_attractor: u32,
}

/// Run one full tick: velocity pass, buffer swap, position pass
///
/// The scheduling arena is reset here; block descriptors and the shared
/// metrics live in it for the duration of the tick.
pub(crate) fn run_step(
    store: &mut EntityStore,
    hash: &SpatialHash,
    pool: &mut WorkPool,
    sched: &BumpArena,
    params: &StepParams,
    tasks_per_worker: usize,
    min_block: usize,
) -> StepStats {
    let n = store.len();
    if n == 0 {
        return StepStats::default();
    }

    sched.reset();

    let blocks = block_count(n, pool.worker_count(), tasks_per_worker, min_block);
    let per = n / blocks;

    // Zeroed arena bytes are valid zero atomics
    let metrics: &StepMetrics = unsafe {
        let ptr = sched
            .alloc_bytes(core::mem::size_of::<StepMetrics>())
            .expect("scheduling arena undersized for metrics")
            .as_ptr() as *mut StepMetrics;
        core::ptr::write_bytes(ptr as *mut u8, 0, core::mem::size_of::<StepMetrics>());
        &*ptr
    };

    let positions = store.positions_mut().as_mut_ptr();
    let components = store.components().as_ptr();
    let behaviors = store.behaviors().as_ptr();
    let vel_front = store.velocities().as_ptr();
    let vel_back = store.velocities_back_mut().as_mut_ptr();

    let tasks = sched
        .alloc_slice::<BlockTask>(blocks)
        .expect("scheduling arena undersized for block descriptors");

    for b in 0..blocks {
        let start = b * per;
        let end = if b == blocks - 1 { n } else { start + per };
        tasks[b] = BlockTask {
            start: start as u32,
            end: end as u32,
            n: n as u32,
            positions,
            vel_front,
            vel_back,
            components,
            behaviors,
            hash,
            metrics,
            dt: params.dt,
            v_min: params.v_min,
            v_max: params.v_max,
            a_max: params.a_max,
            r_seek: params.r_seek,
            r_flee: params.r_flee.min(params.r_seek),
            r_align: params.r_align.min(params.r_seek),
            attractor: params.attractor.unwrap_or([0.0; 3]),
            has_attractor: params.attractor.is_some() as u32,
        };
    }

    // Velocity pass: reads positions and front velocities, writes back
    // velocities disjointly per block
    for task in tasks.iter_mut() {
        // Safety: descriptors and every array they reference outlive the
        // wait below; block ranges never alias
        unsafe {
            pool.add_work(velocity_block_task, task as *mut BlockTask as *mut u8);
        }
    }
    pool.wait_for_completion(None).expect("unbounded wait");

    // The velocities written this tick become current
    store.swap_velocities();

    // Position pass: same partition, reads the freshly written buffer
    for task in tasks.iter_mut() {
        // Safety: as above
        unsafe {
            pool.add_work(integrate_block_task, task as *mut BlockTask as *mut u8);
        }
    }
    pool.wait_for_completion(None).expect("unbounded wait");

    StepStats {
        neighbor_total: metrics.neighbors.load(Ordering::Relaxed),
        agents: metrics.agents.load(Ordering::Relaxed),
    }
}

const FLOCKER: ComponentMask = ComponentMask::SPATIAL.union(ComponentMask::BOID);

/// Velocity pass over one block
///
/// # Safety
///
/// `data` must point at a live `BlockTask` whose arrays stay valid until
/// the pass completes; no other block writes this range.
unsafe fn velocity_block_task(data: *mut u8, ctx: &TaskContext) {
    let t = &*(data as *const BlockTask);
    let hash = &*t.hash;
    let metrics = &*t.metrics;

    let scratch = ctx
        .arena
        .alloc_slice::<u32>(t.n as usize)
        .expect("worker arena undersized for neighbour scratch");

    let r_seek2 = t.r_seek * t.r_seek;
    let r_flee2 = t.r_flee * t.r_flee;
    let r_align2 = t.r_align * t.r_align;

    let mut local_neighbors = 0u64;
    let mut local_agents = 0u64;

    for i in t.start as usize..t.end as usize {
        let vel_prev = *t.vel_front.add(i);
        let comp = *t.components.add(i);
        let beh = *t.behaviors.add(i);

        if !comp.contains(FLOCKER) || !beh.any_flocking() {
            // Copy-through keeps the buffer swap coherent for bystanders
            *t.vel_back.add(i) = vel_prev;
            continue;
        }

        let pi = xyz(*t.positions.add(i));
        let found = hash.query(pi, t.r_seek, scratch);

        let mut seek_sum = [0.0f32; 3];
        let mut seek_n = 0u32;
        let mut flee_sum = [0.0f32; 3];
        let mut flee_n = 0u32;
        let mut align_sum = [0.0f32; 3];
        let mut align_n = 0u32;

        for &j in scratch[..found].iter() {
            if j as usize == i {
                continue;
            }
            let pj = xyz(*t.positions.add(j as usize));
            let d = sub(pj, pi);
            let d2 = length_sq(d);
            if d2 < EPSILON {
                // Coincident pair: no direction to act along
                continue;
            }

            if d2 <= r_seek2 {
                seek_sum = add(seek_sum, d);
                seek_n += 1;
            }
            if d2 <= r_flee2 {
                let w = r_flee2 / (d2 + EPSILON);
                flee_sum = add(flee_sum, scale(d, w));
                flee_n += 1;
            }
            if d2 <= r_align2 {
                align_sum = add(align_sum, *t.vel_front.add(j as usize));
                align_n += 1;
            }
            local_neighbors += 1;
        }
        local_agents += 1;

        let mut accel = [0.0f32; 3];
        if beh.contains(BehaviorMask::SEEK) {
            let mut sum = seek_sum;
            let mut cnt = seek_n;
            if t.has_attractor != 0 {
                sum = add(sum, sub(t.attractor, pi));
                cnt += 1;
            }
            if cnt > 0 {
                accel = add(accel, scale(sum, 1.0 / cnt as f32));
            }
        }
        if beh.contains(BehaviorMask::FLEE) && flee_n > 0 {
            accel = sub(accel, scale(flee_sum, 1.0 / flee_n as f32));
        }
        if beh.contains(BehaviorMask::ALIGN) && align_n > 0 {
            accel = add(accel, scale(align_sum, 1.0 / align_n as f32));
        }

        accel = clamp_magnitude(accel, t.a_max);

        let mut v = add(vel_prev, scale(accel, t.dt));
        v = clamp_magnitude(v, t.v_max);
        if length_sq(v) < t.v_min * t.v_min {
            v = renormalize(v, t.v_min);
        }

        *t.vel_back.add(i) = v;
    }

    metrics.neighbors.fetch_add(local_neighbors, Ordering::Relaxed);
    metrics.agents.fetch_add(local_agents, Ordering::Relaxed);
}

/// Position pass over one block: `p += v * dt` with the tick's new
/// velocities
///
/// # Safety
///
/// Same contract as `velocity_block_task`; runs only after the velocity
/// pass completed, so `vel_back` holds this tick's result.
unsafe fn integrate_block_task(data: *mut u8, _ctx: &TaskContext) {
    let t = &*(data as *const BlockTask);

    for i in t.start as usize..t.end as usize {
        let comp = *t.components.add(i);
        if !comp.contains(FLOCKER) {
            continue;
        }
        let v = *t.vel_back.add(i);
        let p = &mut *t.positions.add(i);
        p[0] += v[0] * t.dt;
        p[1] += v[1] * t.dt;
        p[2] += v[2] * t.dt;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boids_core::math::length;

    fn pool_and_arena(workers: usize) -> (WorkPool, BumpArena) {
        let pool = WorkPool::start(workers, 1024, 64 * 1024).unwrap();
        let arena = BumpArena::new(256 * 1024).unwrap();
        (pool, arena)
    }

    fn flocking_store(positions: &[[f32; 4]], behaviors: BehaviorMask) -> EntityStore {
        let mut store = EntityStore::new(positions.len());
        store.positions_mut().copy_from_slice(positions);
        for c in store.components_mut() {
            *c = FLOCKER;
        }
        for b in store.behaviors_mut() {
            *b = behaviors;
        }
        store
    }

    fn rebuild_hash(store: &EntityStore, pool: &mut WorkPool) -> SpatialHash {
        let mut hash = SpatialHash::new(0.5, store.len().max(1), 10.0, 16).unwrap();
        hash.rebuild(store.positions(), pool);
        hash
    }

    fn params(dt: f32) -> StepParams {
        StepParams {
            dt,
            v_min: 0.0,
            v_max: 1.0,
            a_max: 1.0,
            r_seek: 10.0,
            r_flee: 0.0,
            r_align: 0.0,
            attractor: None,
        }
    }

    #[test]
    fn test_block_count_clamps() {
        // Enough entities: full worker x tasks fan-out
        assert_eq!(block_count(10_000, 4, 12, 48), 48);
        // Too few entities: blocks shrink to honour the minimum
        assert_eq!(block_count(100, 4, 12, 48), 2);
        assert_eq!(block_count(47, 4, 12, 48), 1);
        assert_eq!(block_count(0, 4, 12, 48), 0);
    }

    #[test]
    fn test_two_boids_pure_seek() {
        let (mut pool, sched) = pool_and_arena(2);
        let mut store = flocking_store(
            &[[0.0, 0.0, 0.0, 1.0], [1.0, 0.0, 0.0, 1.0]],
            BehaviorMask::SEEK,
        );
        let hash = rebuild_hash(&store, &mut pool);

        run_step(&mut store, &hash, &mut pool, &sched, &params(1.0), 12, 1);

        let v = store.velocities();
        // They accelerate toward each other, symmetrically
        assert!(v[0][0] > 0.0);
        assert!(v[1][0] < 0.0);
        for a in 0..3 {
            assert!((v[0][a] + v[1][a]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_separation_dominates_inside_flee_radius() {
        let (mut pool, sched) = pool_and_arena(2);
        let mut store = flocking_store(
            &[[0.0, 0.0, 0.0, 1.0], [0.1, 0.0, 0.0, 1.0]],
            BehaviorMask::FLEE,
        );
        let hash = rebuild_hash(&store, &mut pool);

        let p = StepParams {
            r_seek: 1.0,
            r_flee: 1.0,
            ..params(1.0)
        };
        run_step(&mut store, &hash, &mut pool, &sched, &p, 12, 1);

        // Pushed away from the close neighbour: x velocity negative and
        // the position moved in the same direction
        assert!(store.velocities()[0][0] < 0.0);
        assert!(store.positions()[0][0] < 0.0);
    }

    #[test]
    fn test_alignment_copies_velocity() {
        let (mut pool, sched) = pool_and_arena(2);
        let mut store = flocking_store(
            &[[0.0, 0.0, 0.0, 1.0], [0.1, 0.0, 0.0, 1.0]],
            BehaviorMask::ALIGN,
        );
        store.velocities_mut()[1] = [1.0, 0.0, 0.0];
        let hash = rebuild_hash(&store, &mut pool);

        let p = StepParams {
            r_seek: 10.0,
            r_align: 10.0,
            ..params(1.0)
        };
        run_step(&mut store, &hash, &mut pool, &sched, &p, 12, 1);

        assert!(store.velocities()[0][0] > 0.0);
    }

    #[test]
    fn test_speed_bounds_hold() {
        let (mut pool, sched) = pool_and_arena(2);
        let positions: Vec<[f32; 4]> = (0..64)
            .map(|i| {
                let f = i as f32 * 0.05;
                [f.sin(), f.cos(), f * 0.1, 1.0]
            })
            .collect();
        let mut store = flocking_store(
            &positions,
            BehaviorMask::SEEK.union(BehaviorMask::FLEE).union(BehaviorMask::ALIGN),
        );
        for (i, v) in store.velocities_mut().iter_mut().enumerate() {
            *v = [0.1, 0.02 * (i as f32).sin(), 0.0];
        }

        let p = StepParams {
            dt: 0.1,
            v_min: 0.05,
            v_max: 0.8,
            a_max: 2.0,
            r_seek: 1.0,
            r_flee: 0.5,
            r_align: 1.0,
            attractor: None,
        };

        for _ in 0..20 {
            let hash = rebuild_hash(&store, &mut pool);
            run_step(&mut store, &hash, &mut pool, &sched, &p, 12, 4);
        }

        for v in store.velocities() {
            let speed = length(*v);
            assert!(speed <= p.v_max + 1e-4, "speed {} above v_max", speed);
            assert!(speed >= p.v_min - 1e-4, "speed {} below v_min", speed);
        }
    }

    #[test]
    fn test_acceleration_bound_holds() {
        let (mut pool, sched) = pool_and_arena(2);
        // A dense clump that would generate huge separation forces
        let positions: Vec<[f32; 4]> = (0..32)
            .map(|i| [i as f32 * 0.01, 0.0, 0.0, 1.0])
            .collect();
        let mut store = flocking_store(
            &positions,
            BehaviorMask::SEEK.union(BehaviorMask::FLEE),
        );
        let before: Vec<[f32; 3]> = store.velocities().to_vec();
        let hash = rebuild_hash(&store, &mut pool);

        let p = StepParams {
            dt: 0.1,
            v_min: 0.0,
            v_max: 100.0,
            a_max: 2.0,
            r_seek: 1.0,
            r_flee: 1.0,
            r_align: 0.0,
            attractor: None,
        };
        run_step(&mut store, &hash, &mut pool, &sched, &p, 12, 1);

        for (v_new, v_old) in store.velocities().iter().zip(before.iter()) {
            let dv = sub(*v_new, *v_old);
            assert!(length(dv) / p.dt <= p.a_max + 1e-3);
        }
    }

    #[test]
    fn test_block_partition_invariance() {
        let positions: Vec<[f32; 4]> = (0..200)
            .map(|i| {
                let f = i as f32;
                [(f * 0.37).sin() * 2.0, (f * 0.91).cos() * 2.0, (f * 0.53).sin() * 2.0, 1.0]
            })
            .collect();
        let behaviors = BehaviorMask::SEEK.union(BehaviorMask::FLEE).union(BehaviorMask::ALIGN);
        let p = StepParams {
            dt: 0.016,
            v_min: 0.0,
            v_max: 1.0,
            a_max: 2.0,
            r_seek: 0.5,
            r_flee: 0.3,
            r_align: 0.5,
            attractor: None,
        };

        // Single block, serial order
        let (mut pool_one, sched_one) = pool_and_arena(1);
        let mut store_one = flocking_store(&positions, behaviors);
        let hash_one = rebuild_hash(&store_one, &mut pool_one);
        run_step(&mut store_one, &hash_one, &mut pool_one, &sched_one, &p, 1, 200);

        // Many small blocks across workers
        let (mut pool_many, sched_many) = pool_and_arena(4);
        let mut store_many = flocking_store(&positions, behaviors);
        let hash_many = rebuild_hash(&store_many, &mut pool_many);
        run_step(&mut store_many, &hash_many, &mut pool_many, &sched_many, &p, 12, 4);

        for i in 0..positions.len() {
            let a = store_one.velocities()[i];
            let b = store_many.velocities()[i];
            for c in 0..3 {
                assert!(
                    (a[c] - b[c]).abs() < 1e-5,
                    "entity {} velocity diverged across partitions",
                    i
                );
            }
        }
    }

    #[test]
    fn test_zero_boids_is_noop() {
        let (mut pool, sched) = pool_and_arena(2);
        let positions = [[0.3f32, 0.4, 0.5, 1.0], [1.0, 1.0, 1.0, 1.0]];
        let mut store = flocking_store(&positions, BehaviorMask::SEEK);
        // Strip the BOID component: kernels must skip everything
        for c in store.components_mut() {
            *c = ComponentMask::SPATIAL;
        }
        let hash = rebuild_hash(&store, &mut pool);

        let stats = run_step(&mut store, &hash, &mut pool, &sched, &params(1.0), 12, 1);

        assert_eq!(stats.agents, 0);
        assert_eq!(store.positions(), &positions[..]);
        assert!(store.velocities().iter().all(|v| *v == [0.0f32; 3]));
    }

    #[test]
    fn test_attractor_pulls_lone_boid() {
        let (mut pool, sched) = pool_and_arena(1);
        let mut store = flocking_store(&[[0.0, 0.0, 0.0, 1.0]], BehaviorMask::SEEK);
        let hash = rebuild_hash(&store, &mut pool);

        let p = StepParams {
            attractor: Some([5.0, 0.0, 0.0]),
            ..params(1.0)
        };
        run_step(&mut store, &hash, &mut pool, &sched, &p, 12, 1);

        assert!(store.velocities()[0][0] > 0.0);
        assert!(store.positions()[0][0] > 0.0);
    }
}
