//! CLI Error Types

use derive_more::{Display, Error};

/// A CLI error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for CLI operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Settings could not be loaded (fix the file or environment).
    #[display("could not load settings")]
    Settings,
    /// The configured storage backend can't be used.
    #[display("storage backend unavailable: {_0}")]
    Backend(#[error(not(source))] String),
    #[display("record store error")]
    Records,
    #[display("admin configuration error")]
    Config,
    #[display("cache error")]
    Cache,
    /// Bad command-line input.
    #[display("invalid input: {_0}")]
    InvalidInput(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Records | Self::Config | Self::Cache)
    }
}
