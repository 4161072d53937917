//! Error types for the culling crate

use glam::IVec3;
use thiserror::Error;

/// Result type alias for culling operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while maintaining the section tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// Insert coordinate outside the configured world radius
    #[error("section at {pos} is outside the configured world radius {radius}")]
    OutOfBounds { pos: IVec3, radius: i32 },

    /// Tree configuration rejected at construction
    #[error("invalid world radius {radius}, must be between 1 and {max}")]
    InvalidRadius { radius: i32, max: i32 },

    /// Internal structure invariant violated; the mutation was dropped
    #[error("invariant violation: {0}")]
    InvariantViolation(&'static str),
}
