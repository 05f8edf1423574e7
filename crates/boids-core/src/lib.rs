//! # boids-core
//!
//! Core types for the boids flocking engine.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! All platform-specific implementations (arena memory, events, worker
//! threads) live in `boids-runtime`.
//!
//! ## Modules
//!
//! - `entity` - SoA entity storage and component/behaviour bitmasks
//! - `math` - vector helpers for the flocking kernels
//! - `config` - simulation configuration with env overrides
//! - `error` - error types
//! - `env` - environment variable utilities
//! - `spinlock` - internal spinlock primitive
//! - `bprint` - context-aware debug printing macros

#![allow(dead_code)]

pub mod bprint;
pub mod config;
pub mod entity;
pub mod env;
pub mod error;
pub mod math;
pub mod spinlock;

// Re-exports for convenience
pub use config::SimConfig;
pub use entity::{BehaviorMask, ComponentMask, EntityStore};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};
pub use error::{ArenaError, ConfigError, PoolError, SimError, SimResult};
pub use spinlock::SpinLock;

/// Constants shared across the engine
pub mod constants {
    /// Cache line size for alignment and arena rounding
    pub const CACHE_LINE_SIZE: usize = 64;

    /// Sentinel marking an empty spatial hash cell
    pub const CELL_EMPTY: u32 = u32::MAX;

    /// Sentinel worker id for main-thread task execution
    pub const MAIN_WORKER_ID: u32 = u32::MAX;

    /// Maximum workers (OS threads)
    pub const MAX_WORKERS: usize = 64;

    /// Spin iterations before a worker moves from pause to yield
    pub const SPIN_THRESHOLD: u32 = 1000;

    /// Event wait slice while deeply idle (milliseconds)
    pub const IDLE_WAIT_MS: u64 = 1;

    /// Work blocks scheduled per worker and per step pass
    pub const DEFAULT_TASKS_PER_WORKER: usize = 12;

    /// Smallest entity count worth a dedicated work block
    pub const DEFAULT_MIN_BLOCK_ENTITIES: usize = 48;

    /// Grid cell side = configured cell size times this factor
    pub const CELL_SIZE_FACTOR: f32 = 2.0;

    /// Entity count below which hash builds stay sequential
    pub const PARALLEL_BUILD_MIN: usize = 1024;

    /// Smallest per-chunk range for the parallel domain reduction
    pub const PARALLEL_CHUNK_MIN: usize = 512;

    /// Local staging buffer slots for radius queries
    pub const QUERY_STAGE_SLOTS: usize = 2048;

    /// Elements per SIMD block in the query inner loop
    pub const SIMD_WIDTH: usize = 8;

    /// Elements prefetched ahead of the query inner loop
    pub const PREFETCH_STRIDE: usize = 16;
}
