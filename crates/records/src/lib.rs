//! Per-user media state.
//!
//! Every record a user owns lives under `u/{username}/`, so the whole account
//! can be listed or removed with a single prefix. The user registry itself is
//! kept under `users/{username}`.

pub mod error;
mod key;
pub mod models;
mod store;

pub use crate::key::RecordKey;
pub use crate::models::{Favorite, PlayRecord, SkipConfig, UserMeta};
pub use crate::store::{RecordStore, SEARCH_HISTORY_LIMIT};
