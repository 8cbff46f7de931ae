//! Record Error Types

use derive_more::{Display, Error};

/// A record error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for record operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Caller supplied a record key that can't be used (fix the input).
    #[display("invalid record key: {_0:?}")]
    InvalidRecordKey(#[error(not(source))] String),
    /// Caller supplied a username that can't be used as a key segment.
    #[display("invalid username: {_0:?}")]
    InvalidUsername(#[error(not(source))] String),
    /// The storage backend failed.
    #[display("record storage error")]
    Storage,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage)
    }
}
