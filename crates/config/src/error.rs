//! Config Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// An explicitly requested settings file doesn't exist.
    #[display("settings file not found: {}", _0.display())]
    FileNotFound(#[error(not(source))] PathBuf),
    /// Settings are present but don't make sense (fix the file/environment).
    #[display("invalid settings")]
    InvalidSettings,
    /// The admin configuration could not be encoded.
    #[display("could not serialize admin configuration")]
    Serialization,
    /// The storage backend failed.
    #[display("configuration storage error")]
    Storage,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage)
    }
}
