//! Uniform-grid spatial hash
//!
//! A grid over the axis-aligned bounding box of the current positions,
//! rebuilt from scratch every frame: copy positions into dense SoA lanes,
//! reduce the domain, count entities per cell, prefix-scan into half-open
//! cell ranges, then scatter into cell order alongside an `original_id`
//! permutation. Domain reduction, binning and scatter all run on the
//! worker pool above a size threshold.
//!
//! Every byte of build state lives in one arena sized at init for the
//! declared entity count; `rebuild` is reset + build. There is no
//! incremental update.

mod cell;
mod simd;

pub use cell::{linear_index, linear_table_len, morton_index, morton_table_len};

use boids_core::bwarn;
use boids_core::constants::{
    CELL_EMPTY, CELL_SIZE_FACTOR, PARALLEL_BUILD_MIN, PARALLEL_CHUNK_MIN, QUERY_STAGE_SLOTS,
};
use boids_core::error::SimResult;
use boids_core::math::{Vec3, Vec4};
use boids_runtime::{BumpArena, TaskContext, WorkPool};

use std::sync::atomic::{AtomicU32, Ordering};

const ARENA_MSG: &str = "spatial hash arena exhausted; sized wrong at init";

/// Uniform-grid spatial hash with bulk rebuilds and radius queries
///
/// Queries are read-only and may run from any number of worker threads at
/// once; builds take `&mut self` and are externally serialized against
/// queries by the frame structure (step and rebuild alternate, never
/// overlap).
pub struct SpatialHash {
    arena: BumpArena,
    cell_side: f32,
    capacity: usize,
    cells_budget: usize,
    max_tasks: usize,

    // Build outputs; raw views into the arena, valid until the next reset
    count: usize,
    domain_min: [f32; 3],
    grid: [u32; 3],
    table_len: usize,
    occupied: usize,
    xs: *mut f32,
    ys: *mut f32,
    zs: *mut f32,
    ids: *mut u32,
    cell_start: *mut u32,
    cell_end: *mut u32,
}

// Safety: the raw members point into the hash's own arena. Builds require
// `&mut self`; everything reachable through `&self` is read-only.
unsafe impl Send for SpatialHash {}
unsafe impl Sync for SpatialHash {}

impl SpatialHash {
    /// Create a hash sized for `expected_entities`
    ///
    /// `cell_size` is the configured base side; the grid uses
    /// `cell_size * CELL_SIZE_FACTOR`. `domain_radius` seeds the cell
    /// table budget with double headroom per axis; a simulation that
    /// disperses past that budget is a configuration error and asserts
    /// at build. `max_tasks` bounds how many chunks a parallel build may
    /// enqueue at once.
    pub fn new(
        cell_size: f32,
        expected_entities: usize,
        domain_radius: f32,
        max_tasks: usize,
    ) -> SimResult<Self> {
        let cell_side = cell_size * CELL_SIZE_FACTOR;
        let max_tasks = max_tasks.max(1);

        // Budget the cell table for a domain twice the initial extent on
        // every axis, scheme-aware (Morton pads to the interleave bound).
        let axis = (((2.0 * domain_radius) / cell_side).ceil() as u32 + 1) * 2;
        let axis = axis.max(4);
        let cells_budget = (cell::table_len([axis, axis, axis]) as usize).max(4096);

        let entity_bytes = expected_entities.max(1) * 28; // 3 in + 3 out lanes + ids
        let table_bytes = cells_budget * 12; // counts + start + end
        let task_bytes = max_tasks * 256; // descriptors and reduce slots
        let arena = BumpArena::new(entity_bytes + table_bytes + task_bytes + 64 * 64)?;

        Ok(Self {
            arena,
            cell_side,
            capacity: expected_entities,
            cells_budget,
            max_tasks,
            count: 0,
            domain_min: [0.0; 3],
            grid: [0; 3],
            table_len: 0,
            occupied: 0,
            xs: core::ptr::null_mut(),
            ys: core::ptr::null_mut(),
            zs: core::ptr::null_mut(),
            ids: core::ptr::null_mut(),
            cell_start: core::ptr::null_mut(),
            cell_end: core::ptr::null_mut(),
        })
    }

    /// Reset the arena and build from the given positions
    ///
    /// The only way to reflect moved entities.
    pub fn rebuild(&mut self, positions: &[Vec4], pool: &mut WorkPool) {
        self.arena.reset();
        self.build(positions, pool);
    }

    fn build(&mut self, positions: &[Vec4], pool: &mut WorkPool) {
        let n = positions.len();
        assert!(n <= self.capacity, "{}", ARENA_MSG);

        self.count = n;
        self.occupied = 0;
        if n == 0 {
            self.table_len = 0;
            self.grid = [0; 3];
            return;
        }

        // 1. Dense SoA staging lanes plus identity ids
        let xs_in = self.arena.alloc_slice::<f32>(n).expect(ARENA_MSG);
        let ys_in = self.arena.alloc_slice::<f32>(n).expect(ARENA_MSG);
        let zs_in = self.arena.alloc_slice::<f32>(n).expect(ARENA_MSG);
        for (i, p) in positions.iter().enumerate() {
            xs_in[i] = p[0];
            ys_in[i] = p[1];
            zs_in[i] = p[2];
        }

        let parallel = n >= PARALLEL_BUILD_MIN && pool.worker_count() >= 2;

        // 2. Domain bounds
        let (dmin, dmax) = if parallel {
            self.minmax_parallel(xs_in, ys_in, zs_in, pool)
        } else {
            minmax_seq(xs_in, ys_in, zs_in, 0, n)
        };
        self.domain_min = dmin;

        // 3. Grid extents and cell table length
        let inv_cell = 1.0 / self.cell_side;
        let mut grid = [0u32; 3];
        for a in 0..3 {
            grid[a] = (((dmax[a] - dmin[a]) * inv_cell).ceil() as u32).max(1);
        }
        self.grid = grid;
        let table_len = cell::table_len(grid) as usize;
        assert!(table_len <= self.cells_budget, "{}", ARENA_MSG);
        self.table_len = table_len;

        // Cell population counts, atomically incremented by the binning
        // chunks. Zeroed arena bytes are valid AtomicU32 zeros.
        let counts: &[AtomicU32] = unsafe {
            let ptr = self
                .arena
                .alloc_bytes(table_len * core::mem::size_of::<AtomicU32>())
                .expect(ARENA_MSG)
                .as_ptr() as *mut AtomicU32;
            core::ptr::write_bytes(ptr as *mut u8, 0, table_len * 4);
            core::slice::from_raw_parts(ptr, table_len)
        };

        // 4. Binning
        if parallel {
            self.bin_parallel(xs_in, ys_in, zs_in, counts, inv_cell, pool);
        } else {
            bin_range(xs_in, ys_in, zs_in, counts, dmin, inv_cell, grid, 0, n);
        }

        // 5. Prefix scan into half-open ranges; sentinel for empty cells
        let cell_start = self.arena.alloc_slice::<u32>(table_len).expect(ARENA_MSG);
        let cell_end = self.arena.alloc_slice::<u32>(table_len).expect(ARENA_MSG);
        let mut running = 0u32;
        let mut occupied = 0usize;
        for c in 0..table_len {
            let len = counts[c].load(Ordering::Relaxed);
            if len == 0 {
                cell_start[c] = CELL_EMPTY;
                cell_end[c] = CELL_EMPTY;
            } else {
                cell_start[c] = running;
                running += len;
                cell_end[c] = running;
                occupied += 1;
            }
        }
        debug_assert_eq!(running as usize, n);
        self.occupied = occupied;

        // 6. Scatter into cell order
        let xs_out = self.arena.alloc_slice::<f32>(n).expect(ARENA_MSG);
        let ys_out = self.arena.alloc_slice::<f32>(n).expect(ARENA_MSG);
        let zs_out = self.arena.alloc_slice::<f32>(n).expect(ARENA_MSG);
        let ids_out = self.arena.alloc_slice::<u32>(n).expect(ARENA_MSG);

        self.xs = xs_out.as_mut_ptr();
        self.ys = ys_out.as_mut_ptr();
        self.zs = zs_out.as_mut_ptr();
        self.ids = ids_out.as_mut_ptr();
        self.cell_start = cell_start.as_mut_ptr();
        self.cell_end = cell_end.as_mut_ptr();

        if parallel {
            self.scatter_parallel(xs_in, ys_in, zs_in, counts, inv_cell, pool);
        } else {
            let task = ScatterTask {
                xs_in: xs_in.as_ptr(),
                ys_in: ys_in.as_ptr(),
                zs_in: zs_in.as_ptr(),
                xs_out: self.xs,
                ys_out: self.ys,
                zs_out: self.zs,
                ids_out: self.ids,
                counts: counts.as_ptr(),
                cell_start: self.cell_start,
                domain_min: self.domain_min,
                inv_cell,
                grid,
                start: 0,
                end: n as u32,
            };
            // Safety: every pointer in the task targets live arena memory
            unsafe { scatter_range(&task) };
        }
    }

    /// Chunk count and stride for a parallel phase
    fn chunk_plan(&self, n: usize) -> (usize, usize) {
        let by_size = n / PARALLEL_CHUNK_MIN;
        let chunks = by_size.clamp(1, self.max_tasks);
        (chunks, n.div_ceil(chunks))
    }

    fn minmax_parallel(
        &self,
        xs: &[f32],
        ys: &[f32],
        zs: &[f32],
        pool: &mut WorkPool,
    ) -> ([f32; 3], [f32; 3]) {
        let n = xs.len();
        let (chunks, per) = self.chunk_plan(n);

        // One cache line per chunk so reducers never false-share
        let slots = self.arena.alloc_slice::<[f32; 16]>(chunks).expect(ARENA_MSG);
        let tasks = self.arena.alloc_slice::<MinMaxTask>(chunks).expect(ARENA_MSG);

        for c in 0..chunks {
            tasks[c] = MinMaxTask {
                xs: xs.as_ptr(),
                ys: ys.as_ptr(),
                zs: zs.as_ptr(),
                start: (c * per) as u32,
                end: ((c + 1) * per).min(n) as u32,
                out: slots[c].as_mut_ptr(),
            };
            // Safety: task and lane memory live in self.arena until the
            // wait below returns; no reset can intervene.
            unsafe {
                pool.add_work(minmax_task, &mut tasks[c] as *mut MinMaxTask as *mut u8);
            }
        }
        pool.wait_for_completion(None).expect("unbounded wait");

        // Main-thread fold of the per-chunk results
        let mut mn = [f32::INFINITY; 3];
        let mut mx = [f32::NEG_INFINITY; 3];
        for slot in slots.iter() {
            for a in 0..3 {
                mn[a] = mn[a].min(slot[a]);
                mx[a] = mx[a].max(slot[a + 3]);
            }
        }
        (mn, mx)
    }

    fn bin_parallel(
        &self,
        xs: &[f32],
        ys: &[f32],
        zs: &[f32],
        counts: &[AtomicU32],
        inv_cell: f32,
        pool: &mut WorkPool,
    ) {
        let n = xs.len();
        let (chunks, per) = self.chunk_plan(n);
        let tasks = self.arena.alloc_slice::<BinTask>(chunks).expect(ARENA_MSG);

        for c in 0..chunks {
            tasks[c] = BinTask {
                xs: xs.as_ptr(),
                ys: ys.as_ptr(),
                zs: zs.as_ptr(),
                counts: counts.as_ptr(),
                domain_min: self.domain_min,
                inv_cell,
                grid: self.grid,
                start: (c * per) as u32,
                end: ((c + 1) * per).min(n) as u32,
            };
            // Safety: as in minmax_parallel
            unsafe {
                pool.add_work(bin_task, &mut tasks[c] as *mut BinTask as *mut u8);
            }
        }
        pool.wait_for_completion(None).expect("unbounded wait");
    }

    fn scatter_parallel(
        &self,
        xs_in: &[f32],
        ys_in: &[f32],
        zs_in: &[f32],
        counts: &[AtomicU32],
        inv_cell: f32,
        pool: &mut WorkPool,
    ) {
        let n = xs_in.len();
        let (chunks, per) = self.chunk_plan(n);
        let tasks = self.arena.alloc_slice::<ScatterTask>(chunks).expect(ARENA_MSG);

        for c in 0..chunks {
            tasks[c] = ScatterTask {
                xs_in: xs_in.as_ptr(),
                ys_in: ys_in.as_ptr(),
                zs_in: zs_in.as_ptr(),
                xs_out: self.xs,
                ys_out: self.ys,
                zs_out: self.zs,
                ids_out: self.ids,
                counts: counts.as_ptr(),
                cell_start: self.cell_start,
                domain_min: self.domain_min,
                inv_cell,
                grid: self.grid,
                start: (c * per) as u32,
                end: ((c + 1) * per).min(n) as u32,
            };
            // Safety: as in minmax_parallel; output ranges are disjoint
            // because every (cell, offset) pair is claimed exactly once.
            unsafe {
                pool.add_work(scatter_task, &mut tasks[c] as *mut ScatterTask as *mut u8);
            }
        }
        pool.wait_for_completion(None).expect("unbounded wait");
    }

    /// Collect the original ids of all entities within `radius` of
    /// `center` into `out`, returning how many were written
    ///
    /// Results are unordered and duplicate-free. When `out` is too small
    /// the overflow is dropped with a warning. A non-positive radius is
    /// reported and ignored.
    pub fn query(&self, center: Vec3, radius: f32, out: &mut [u32]) -> usize {
        if self.count == 0 {
            return 0;
        }
        if !(radius > 0.0) || out.is_empty() {
            bwarn!("spatial query rejected: radius {} out capacity {}", radius, out.len());
            return 0;
        }

        let inv_cell = 1.0 / self.cell_side;
        let reach = (radius * inv_cell).ceil() as i64;
        let r2 = radius * radius;

        // Central cell, unclamped so off-domain centres resolve correctly
        let mut lo = [0i64; 3];
        let mut hi = [0i64; 3];
        for a in 0..3 {
            let c = (((center[a] - self.domain_min[a]) * inv_cell).floor()) as i64;
            let top = self.grid[a] as i64 - 1;
            if c + reach < 0 || c - reach > top {
                return 0;
            }
            lo[a] = (c - reach).max(0);
            hi[a] = (c + reach).min(top);
        }

        let mut stage = [0u32; QUERY_STAGE_SLOTS];
        let mut staged = 0usize;
        let mut written = 0usize;
        let mut dropped = false;

        for z in lo[2]..=hi[2] {
            for y in lo[1]..=hi[1] {
                for x in lo[0]..=hi[0] {
                    let idx =
                        cell::cell_index([x as u32, y as u32, z as u32], self.grid) as usize;
                    // Safety: idx < table_len by construction of the ranges
                    let start = unsafe { *self.cell_start.add(idx) };
                    if start == CELL_EMPTY {
                        continue;
                    }
                    let end = unsafe { *self.cell_end.add(idx) };
                    let len = (end - start) as usize;

                    // Safety: [start, end) indexes the filled prefix of
                    // the permuted arrays
                    let (cxs, cys, czs, cids) = unsafe {
                        (
                            core::slice::from_raw_parts(self.xs.add(start as usize), len),
                            core::slice::from_raw_parts(self.ys.add(start as usize), len),
                            core::slice::from_raw_parts(self.zs.add(start as usize), len),
                            core::slice::from_raw_parts(self.ids.add(start as usize), len),
                        )
                    };

                    simd::filter_candidates(cxs, cys, czs, cids, center, r2, &mut |id| {
                        if staged == stage.len() {
                            flush_stage(&stage, &mut staged, out, &mut written, &mut dropped);
                        }
                        stage[staged] = id;
                        staged += 1;
                    });
                }
            }
        }

        flush_stage(&stage, &mut staged, out, &mut written, &mut dropped);
        if dropped {
            bwarn!("spatial query output buffer too small; results truncated");
        }
        written
    }

    /// Query into a fresh Vec sized for the worst case (test support)
    pub fn query_to_vec(&self, center: Vec3, radius: f32) -> Vec<u32> {
        let mut out = vec![0u32; self.count];
        let n = self.query(center, radius, &mut out);
        out.truncate(n);
        out
    }

    /// Compare one query against the brute-force definition
    ///
    /// The built-in self-test: true when the hash returns exactly the set
    /// `{ j : |p_j - center| <= radius }` with no duplicates.
    pub fn verify_against_brute_force(
        &self,
        positions: &[Vec4],
        center: Vec3,
        radius: f32,
    ) -> bool {
        let mut got = self.query_to_vec(center, radius);
        got.sort_unstable();
        if got.windows(2).any(|w| w[0] == w[1]) {
            return false;
        }

        let r2 = radius * radius;
        let want: Vec<u32> = positions
            .iter()
            .enumerate()
            .filter(|(_, p)| {
                let dx = p[0] - center[0];
                let dy = p[1] - center[1];
                let dz = p[2] - center[2];
                dx * dx + dy * dy + dz * dz <= r2
            })
            .map(|(i, _)| i as u32)
            .collect();

        got == want
    }

    /// Entities currently stored
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Grid extents of the last build
    #[inline]
    pub fn grid(&self) -> [u32; 3] {
        self.grid
    }

    /// Cells holding at least one entity
    #[inline]
    pub fn occupied_cells(&self) -> usize {
        self.occupied
    }

    /// The original-id permutation of the last build (test support)
    pub fn ids(&self) -> &[u32] {
        if self.count == 0 {
            return &[];
        }
        // Safety: ids points at count entries until the next rebuild
        unsafe { core::slice::from_raw_parts(self.ids, self.count) }
    }

    /// Sum of filled cell-range lengths; equals `count` after any build
    pub fn filled_span_total(&self) -> usize {
        let mut total = 0usize;
        for c in 0..self.table_len {
            // Safety: c < table_len
            let start = unsafe { *self.cell_start.add(c) };
            if start == CELL_EMPTY {
                continue;
            }
            let end = unsafe { *self.cell_end.add(c) };
            total += (end - start) as usize;
        }
        total
    }

    /// Cell ranges of the last build as (start, end) pairs (test support)
    pub fn cell_ranges(&self) -> Vec<(u32, u32)> {
        (0..self.table_len)
            .filter_map(|c| {
                // Safety: c < table_len
                let start = unsafe { *self.cell_start.add(c) };
                if start == CELL_EMPTY {
                    None
                } else {
                    Some((start, unsafe { *self.cell_end.add(c) }))
                }
            })
            .collect()
    }
}

fn flush_stage(
    stage: &[u32],
    staged: &mut usize,
    out: &mut [u32],
    written: &mut usize,
    dropped: &mut bool,
) {
    let room = out.len() - *written;
    let take = room.min(*staged);
    out[*written..*written + take].copy_from_slice(&stage[..take]);
    *written += take;
    if take < *staged {
        *dropped = true;
    }
    *staged = 0;
}

/// Clamped cell coordinates for one position
#[inline]
fn cell_coords(
    x: f32,
    y: f32,
    z: f32,
    dmin: [f32; 3],
    inv_cell: f32,
    grid: [u32; 3],
) -> [u32; 3] {
    #[inline]
    fn axis(v: f32, min: f32, inv: f32, g: u32) -> u32 {
        let c = ((v - min) * inv).floor();
        if c <= 0.0 {
            0
        } else {
            (c as u32).min(g - 1)
        }
    }
    [
        axis(x, dmin[0], inv_cell, grid[0]),
        axis(y, dmin[1], inv_cell, grid[1]),
        axis(z, dmin[2], inv_cell, grid[2]),
    ]
}

fn minmax_seq(xs: &[f32], ys: &[f32], zs: &[f32], start: usize, end: usize) -> ([f32; 3], [f32; 3]) {
    let mut mn = [f32::INFINITY; 3];
    let mut mx = [f32::NEG_INFINITY; 3];
    for i in start..end {
        mn[0] = mn[0].min(xs[i]);
        mn[1] = mn[1].min(ys[i]);
        mn[2] = mn[2].min(zs[i]);
        mx[0] = mx[0].max(xs[i]);
        mx[1] = mx[1].max(ys[i]);
        mx[2] = mx[2].max(zs[i]);
    }
    (mn, mx)
}

fn bin_range(
    xs: &[f32],
    ys: &[f32],
    zs: &[f32],
    counts: &[AtomicU32],
    dmin: [f32; 3],
    inv_cell: f32,
    grid: [u32; 3],
    start: usize,
    end: usize,
) {
    for i in start..end {
        let coords = cell_coords(xs[i], ys[i], zs[i], dmin, inv_cell, grid);
        let idx = cell::cell_index(coords, grid) as usize;
        counts[idx].fetch_add(1, Ordering::Relaxed);
    }
}

// Task descriptors: plain POD handed to the pool as raw bytes. All
// pointers target the hash arena or the staging lanes, which outlive the
// wait_for_completion call that ends each phase.

#[derive(Clone, Copy)]
struct MinMaxTask {
    xs: *const f32,
    ys: *const f32,
    zs: *const f32,
    start: u32,
    end: u32,
    out: *mut f32, // [min xyz, max xyz] in a 16-float slot
}

unsafe fn minmax_task(data: *mut u8, _ctx: &TaskContext) {
    let task = &*(data as *const MinMaxTask);
    let len = task.end as usize;
    let xs = core::slice::from_raw_parts(task.xs, len);
    let ys = core::slice::from_raw_parts(task.ys, len);
    let zs = core::slice::from_raw_parts(task.zs, len);

    let (mn, mx) = minmax_seq(xs, ys, zs, task.start as usize, len);
    for a in 0..3 {
        *task.out.add(a) = mn[a];
        *task.out.add(a + 3) = mx[a];
    }
}

#[derive(Clone, Copy)]
struct BinTask {
    xs: *const f32,
    ys: *const f32,
    zs: *const f32,
    counts: *const AtomicU32,
    domain_min: [f32; 3],
    inv_cell: f32,
    grid: [u32; 3],
    start: u32,
    end: u32,
}

unsafe fn bin_task(data: *mut u8, _ctx: &TaskContext) {
    let task = &*(data as *const BinTask);
    let len = task.end as usize;
    let xs = core::slice::from_raw_parts(task.xs, len);
    let ys = core::slice::from_raw_parts(task.ys, len);
    let zs = core::slice::from_raw_parts(task.zs, len);
    let table = cell::table_len(task.grid) as usize;
    let counts = core::slice::from_raw_parts(task.counts, table);

    bin_range(
        xs,
        ys,
        zs,
        counts,
        task.domain_min,
        task.inv_cell,
        task.grid,
        task.start as usize,
        len,
    );
}

#[derive(Clone, Copy)]
struct ScatterTask {
    xs_in: *const f32,
    ys_in: *const f32,
    zs_in: *const f32,
    xs_out: *mut f32,
    ys_out: *mut f32,
    zs_out: *mut f32,
    ids_out: *mut u32,
    counts: *const AtomicU32,
    cell_start: *const u32,
    domain_min: [f32; 3],
    inv_cell: f32,
    grid: [u32; 3],
    start: u32,
    end: u32,
}

unsafe fn scatter_task(data: *mut u8, _ctx: &TaskContext) {
    scatter_range(&*(data as *const ScatterTask));
}

/// Place each entity of the chunk into its cell's range
///
/// # Safety
///
/// Task pointers must target live build arrays; the shared atomic counts
/// guarantee each output slot is claimed exactly once.
unsafe fn scatter_range(task: &ScatterTask) {
    for i in task.start as usize..task.end as usize {
        let x = *task.xs_in.add(i);
        let y = *task.ys_in.add(i);
        let z = *task.zs_in.add(i);

        let coords = cell_coords(x, y, z, task.domain_min, task.inv_cell, task.grid);
        let idx = cell::cell_index(coords, task.grid) as usize;

        let remaining = (*task.counts.add(idx)).fetch_sub(1, Ordering::AcqRel);
        let offset = remaining - 1;
        let slot = (*task.cell_start.add(idx) + offset) as usize;

        *task.xs_out.add(slot) = x;
        *task.ys_out.add(slot) = y;
        *task.zs_out.add(slot) = z;
        *task.ids_out.add(slot) = i as u32;
    }
}
