//! Error types for the boids engine

use core::fmt;

/// Result type for simulation operations
pub type SimResult<T> = Result<T, SimError>;

/// Errors that can occur across the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    /// Configuration rejected at init
    Config(ConfigError),

    /// Worker pool error
    Pool(PoolError),

    /// Arena allocation error
    Arena(ArenaError),
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimError::Config(e) => write!(f, "config error: {}", e),
            SimError::Pool(e) => write!(f, "pool error: {}", e),
            SimError::Arena(e) => write!(f, "arena error: {}", e),
        }
    }
}

impl std::error::Error for SimError {}

/// Configuration errors, rejected before the simulation starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Entity count must be >= 1
    ZeroEntities,

    /// A length, radius or bound that must be > 0 was not
    NonPositive(&'static str),

    /// v_min exceeds v_max
    InvertedSpeedRange,

    /// Attractor string did not parse as "x,y,z"
    BadAttractor,

    /// Requested more workers than supported
    TooManyWorkers,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroEntities => write!(f, "entity count must be at least 1"),
            ConfigError::NonPositive(what) => write!(f, "{} must be positive", what),
            ConfigError::InvertedSpeedRange => write!(f, "v_min exceeds v_max"),
            ConfigError::BadAttractor => write!(f, "attractor must be \"x,y,z\""),
            ConfigError::TooManyWorkers => write!(f, "worker count exceeds supported maximum"),
        }
    }
}

impl From<ConfigError> for SimError {
    fn from(e: ConfigError) -> Self {
        SimError::Config(e)
    }
}

/// Worker pool errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Pool already started
    AlreadyStarted,

    /// Pool not started or already shut down
    NotStarted,

    /// wait_for_completion hit its deadline with work still pending.
    /// The pool remains usable; the caller may retry or shut down.
    WaitTimeout,

    /// Failed to spawn a worker thread
    SpawnFailed,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::AlreadyStarted => write!(f, "worker pool already started"),
            PoolError::NotStarted => write!(f, "worker pool not started"),
            PoolError::WaitTimeout => write!(f, "completion wait timed out"),
            PoolError::SpawnFailed => write!(f, "failed to spawn worker thread"),
        }
    }
}

impl From<PoolError> for SimError {
    fn from(e: PoolError) -> Self {
        SimError::Pool(e)
    }
}

/// Arena allocation errors
///
/// Only creation can fail with an error value. Running out of a correctly
/// sized arena mid-frame is a fatal sizing bug and asserts instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArenaError {
    /// Requested a zero-byte arena
    ZeroSize,

    /// mmap failed
    MapFailed,
}

impl fmt::Display for ArenaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArenaError::ZeroSize => write!(f, "arena size must be nonzero"),
            ArenaError::MapFailed => write!(f, "arena memory mapping failed"),
        }
    }
}

impl From<ArenaError> for SimError {
    fn from(e: ArenaError) -> Self {
        SimError::Arena(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = SimError::Pool(PoolError::WaitTimeout);
        assert_eq!(format!("{}", e), "pool error: completion wait timed out");

        let e = SimError::Config(ConfigError::NonPositive("cell_size"));
        assert_eq!(format!("{}", e), "config error: cell_size must be positive");
    }

    #[test]
    fn test_error_conversion() {
        let err: SimError = ConfigError::ZeroEntities.into();
        assert!(matches!(err, SimError::Config(ConfigError::ZeroEntities)));

        let err: SimError = ArenaError::ZeroSize.into();
        assert!(matches!(err, SimError::Arena(ArenaError::ZeroSize)));
    }
}
