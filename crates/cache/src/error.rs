//! Cache Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// A cache miss is not an error. Only failures of the persistent tier, or
/// values that can't be encoded, surface here.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The persistent tier failed; the in-process tier is still consistent.
    #[display("persistent cache tier error")]
    Storage,
    /// Value could not be (de)serialized for the given cache key.
    #[display("invalid cache data for {_0:?}")]
    Serialization(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage)
    }
}
