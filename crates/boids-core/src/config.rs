//! Simulation configuration
//!
//! Compile-time defaults with runtime environment overrides, and builder
//! setters for programmatic use.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder setters
//! 2. Environment variables (`BOIDS_*`)
//! 3. Library defaults

use crate::constants::MAX_WORKERS;
use crate::env::{env_get, env_get_str};
use crate::error::ConfigError;
use crate::math::Vec3;

/// Compile-time defaults
pub mod defaults {
    pub const NUM_ENTITIES: usize = 4096;
    pub const DOMAIN_RADIUS: f32 = 10.0;
    pub const CELL_SIZE: f32 = 0.25;
    pub const V_MIN: f32 = 0.05;
    pub const V_MAX: f32 = 1.0;
    pub const A_MAX: f32 = 2.0;
    pub const R_SEEK: f32 = 0.25;
    pub const R_FLEE: f32 = 0.15;
    pub const R_ALIGN: f32 = 0.25;
    /// 0 = use hardware parallelism
    pub const WORKER_COUNT: usize = 0;
    pub const TASKS_PER_WORKER: usize = crate::constants::DEFAULT_TASKS_PER_WORKER;
    pub const MIN_BLOCK_ENTITIES: usize = crate::constants::DEFAULT_MIN_BLOCK_ENTITIES;
    pub const SEED: u64 = 0x5EED_0BAD;
    /// Fixed inner timestep for `advance` (seconds)
    pub const FIXED_DT: f32 = 1.0 / 120.0;
}

/// Simulation configuration with builder pattern
///
/// Use `from_env()` to start with compile-time defaults and apply any
/// environment variable overrides, then chain setters as needed.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Number of simulated entities (fixed for the simulation's lifetime)
    pub num_entities: usize,
    /// Half-extent of the initial scatter cube [-r, r]^3
    pub domain_radius: f32,
    /// Base grid cell side (the hash applies its internal factor)
    pub cell_size: f32,
    /// Minimum speed; slower entities are renormalized up
    pub v_min: f32,
    /// Maximum speed; faster entities are clamped down
    pub v_max: f32,
    /// Maximum acceleration magnitude per tick
    pub a_max: f32,
    /// Cohesion radius (also the single query radius)
    pub r_seek: f32,
    /// Separation radius
    pub r_flee: f32,
    /// Alignment radius
    pub r_align: f32,
    /// Worker threads; 0 selects hardware parallelism
    pub worker_count: usize,
    /// Work blocks per worker for each step pass
    pub tasks_per_worker: usize,
    /// Smallest entity range worth a dedicated block
    pub min_block_entities: usize,
    /// Seed for the initial position scatter
    pub seed: u64,
    /// Optional global seek target
    pub attractor: Option<Vec3>,
    /// Fixed inner timestep used by `advance`
    pub fixed_dt: f32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl SimConfig {
    /// Create config from compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `BOIDS_NUM_ENTITIES` - entity count
    /// - `BOIDS_DOMAIN_RADIUS` - initial scatter half-extent
    /// - `BOIDS_CELL_SIZE` - base grid cell side
    /// - `BOIDS_V_MIN` / `BOIDS_V_MAX` - speed bounds
    /// - `BOIDS_A_MAX` - acceleration bound
    /// - `BOIDS_R_SEEK` / `BOIDS_R_FLEE` / `BOIDS_R_ALIGN` - behaviour radii
    /// - `BOIDS_WORKERS` - worker threads (0 = hardware)
    /// - `BOIDS_TASKS_PER_WORKER` - blocks per worker
    /// - `BOIDS_MIN_BLOCK_ENTITIES` - minimum block size
    /// - `BOIDS_SEED` - scatter seed
    /// - `BOIDS_ATTRACTOR` - "x,y,z" global seek target
    /// - `BOIDS_FIXED_DT` - inner timestep in seconds
    pub fn from_env() -> Self {
        let attractor = {
            let raw = env_get_str("BOIDS_ATTRACTOR", "");
            if raw.is_empty() {
                None
            } else {
                parse_attractor(&raw)
            }
        };

        Self {
            num_entities: env_get("BOIDS_NUM_ENTITIES", defaults::NUM_ENTITIES),
            domain_radius: env_get("BOIDS_DOMAIN_RADIUS", defaults::DOMAIN_RADIUS),
            cell_size: env_get("BOIDS_CELL_SIZE", defaults::CELL_SIZE),
            v_min: env_get("BOIDS_V_MIN", defaults::V_MIN),
            v_max: env_get("BOIDS_V_MAX", defaults::V_MAX),
            a_max: env_get("BOIDS_A_MAX", defaults::A_MAX),
            r_seek: env_get("BOIDS_R_SEEK", defaults::R_SEEK),
            r_flee: env_get("BOIDS_R_FLEE", defaults::R_FLEE),
            r_align: env_get("BOIDS_R_ALIGN", defaults::R_ALIGN),
            worker_count: env_get("BOIDS_WORKERS", defaults::WORKER_COUNT),
            tasks_per_worker: env_get("BOIDS_TASKS_PER_WORKER", defaults::TASKS_PER_WORKER),
            min_block_entities: env_get("BOIDS_MIN_BLOCK_ENTITIES", defaults::MIN_BLOCK_ENTITIES),
            seed: env_get("BOIDS_SEED", defaults::SEED),
            attractor,
            fixed_dt: env_get("BOIDS_FIXED_DT", defaults::FIXED_DT),
        }
    }

    // Builder setters

    pub fn num_entities(mut self, n: usize) -> Self {
        self.num_entities = n;
        self
    }

    pub fn domain_radius(mut self, r: f32) -> Self {
        self.domain_radius = r;
        self
    }

    pub fn cell_size(mut self, s: f32) -> Self {
        self.cell_size = s;
        self
    }

    pub fn speed_range(mut self, v_min: f32, v_max: f32) -> Self {
        self.v_min = v_min;
        self.v_max = v_max;
        self
    }

    pub fn a_max(mut self, a: f32) -> Self {
        self.a_max = a;
        self
    }

    pub fn radii(mut self, seek: f32, flee: f32, align: f32) -> Self {
        self.r_seek = seek;
        self.r_flee = flee;
        self.r_align = align;
        self
    }

    pub fn worker_count(mut self, n: usize) -> Self {
        self.worker_count = n;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn attractor(mut self, target: Vec3) -> Self {
        self.attractor = Some(target);
        self
    }

    /// Worker count after hardware detection
    pub fn effective_workers(&self) -> usize {
        if self.worker_count != 0 {
            self.worker_count
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        }
    }

    /// Validate the configuration; the simulation refuses to start on error
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_entities == 0 {
            return Err(ConfigError::ZeroEntities);
        }
        if !(self.domain_radius > 0.0) {
            return Err(ConfigError::NonPositive("domain_radius"));
        }
        if !(self.cell_size > 0.0) {
            return Err(ConfigError::NonPositive("cell_size"));
        }
        if !(self.v_max > 0.0) {
            return Err(ConfigError::NonPositive("v_max"));
        }
        if self.v_min < 0.0 {
            return Err(ConfigError::NonPositive("v_min"));
        }
        if self.v_min > self.v_max {
            return Err(ConfigError::InvertedSpeedRange);
        }
        if !(self.a_max > 0.0) {
            return Err(ConfigError::NonPositive("a_max"));
        }
        if !(self.r_seek > 0.0) {
            return Err(ConfigError::NonPositive("r_seek"));
        }
        if self.r_flee < 0.0 {
            return Err(ConfigError::NonPositive("r_flee"));
        }
        if self.r_align < 0.0 {
            return Err(ConfigError::NonPositive("r_align"));
        }
        if !(self.fixed_dt > 0.0) {
            return Err(ConfigError::NonPositive("fixed_dt"));
        }
        if self.tasks_per_worker == 0 {
            return Err(ConfigError::NonPositive("tasks_per_worker"));
        }
        if self.min_block_entities == 0 {
            return Err(ConfigError::NonPositive("min_block_entities"));
        }
        if self.worker_count > MAX_WORKERS {
            return Err(ConfigError::TooManyWorkers);
        }
        Ok(())
    }
}

/// Parse "x,y,z" into a point; None on malformed input
fn parse_attractor(raw: &str) -> Option<Vec3> {
    let mut parts = raw.split(',');
    let x: f32 = parts.next()?.trim().parse().ok()?;
    let y: f32 = parts.next()?.trim().parse().ok()?;
    let z: f32 = parts.next()?.trim().parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some([x, y, z])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> SimConfig {
        SimConfig {
            num_entities: defaults::NUM_ENTITIES,
            domain_radius: defaults::DOMAIN_RADIUS,
            cell_size: defaults::CELL_SIZE,
            v_min: defaults::V_MIN,
            v_max: defaults::V_MAX,
            a_max: defaults::A_MAX,
            r_seek: defaults::R_SEEK,
            r_flee: defaults::R_FLEE,
            r_align: defaults::R_ALIGN,
            worker_count: defaults::WORKER_COUNT,
            tasks_per_worker: defaults::TASKS_PER_WORKER,
            min_block_entities: defaults::MIN_BLOCK_ENTITIES,
            seed: defaults::SEED,
            attractor: None,
            fixed_dt: defaults::FIXED_DT,
        }
    }

    #[test]
    fn test_defaults_valid() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_entities() {
        let cfg = base().num_entities(0);
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroEntities));
    }

    #[test]
    fn test_rejects_bad_radii() {
        let cfg = base().cell_size(0.0);
        assert_eq!(cfg.validate(), Err(ConfigError::NonPositive("cell_size")));

        let cfg = base().radii(0.0, 0.1, 0.1);
        assert_eq!(cfg.validate(), Err(ConfigError::NonPositive("r_seek")));
    }

    #[test]
    fn test_rejects_inverted_speed_range() {
        let cfg = base().speed_range(2.0, 1.0);
        assert_eq!(cfg.validate(), Err(ConfigError::InvertedSpeedRange));
    }

    #[test]
    fn test_rejects_too_many_workers() {
        let cfg = base().worker_count(MAX_WORKERS + 1);
        assert_eq!(cfg.validate(), Err(ConfigError::TooManyWorkers));
    }

    #[test]
    fn test_builder_chain() {
        let cfg = base()
            .num_entities(100)
            .speed_range(0.0, 2.0)
            .attractor([1.0, 2.0, 3.0]);
        assert_eq!(cfg.num_entities, 100);
        assert_eq!(cfg.v_max, 2.0);
        assert_eq!(cfg.attractor, Some([1.0, 2.0, 3.0]));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_effective_workers() {
        assert_eq!(base().worker_count(3).effective_workers(), 3);
        assert!(base().effective_workers() >= 1);
    }

    #[test]
    fn test_parse_attractor() {
        assert_eq!(parse_attractor("1,2,3"), Some([1.0, 2.0, 3.0]));
        assert_eq!(parse_attractor(" 0.5 , -1 , 2.25 "), Some([0.5, -1.0, 2.25]));
        assert_eq!(parse_attractor("1,2"), None);
        assert_eq!(parse_attractor("1,2,3,4"), None);
        assert_eq!(parse_attractor("a,b,c"), None);
    }
}
