pub mod backend;
pub mod clock;
pub mod error;
mod key;

pub use crate::backend::{StorageBackend, StorageBackendExt};
pub use crate::key::{validate as validate_key, validate_prefix};
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
