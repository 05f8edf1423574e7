//! # boids-runtime
//!
//! Platform-specific runtime for the boids engine.
//!
//! This crate provides:
//! - Bump arena memory (mmap-backed linear allocators)
//! - Events (futex on Linux, condvar fallback elsewhere)
//! - The lock-free worker pool with adaptive waiting

#![allow(dead_code)]

pub mod arena;
pub mod event;
pub mod pool;

// Re-exports
pub use arena::BumpArena;
pub use event::{new_event, Event, PlatformEvent};
pub use pool::{PoolStats, TaskContext, TaskFn, WorkPool, WorkerState};
