//! Error types for ringcast-media.

use thiserror::Error;

/// Result type for ringcast-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for ringcast-media operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Cache control state violates an internal invariant. This is a bug,
    /// not a runtime condition, and must never be silently tolerated.
    #[error("corrupt cache control state: head {head} outside [0, {capacity})")]
    CorruptControlState { head: u64, capacity: u64 },

    /// A single buffer can never fit the cache, even with every old GOP
    /// evicted.
    #[error("buffer of {need} bytes exceeds usable cache capacity {usable}")]
    BufferTooLarge { need: usize, usable: usize },

    /// Cache capacity too small to hold even one GOP record header.
    #[error("cache capacity {0} too small")]
    CapacityTooSmall(usize),
}
