//! Configuration for reel.
//!
//! Two unrelated kinds of configuration live here:
//! - [`Settings`]: how this process runs (which storage backend, cache
//!   sizing, log level), loaded once at startup from defaults, a file and the
//!   environment.
//! - [`AdminConfig`]: the site configuration edited by administrators at
//!   runtime, persisted through a storage backend by [`ConfigManager`]. Its
//!   source list is stored separately from the rest of the document.

mod admin;
pub mod error;
pub mod import;
mod manager;
mod settings;

pub use crate::admin::{
    AdminConfig, CategoryKind, ConfigSubscription, CustomCategory, LiveChannel, Origin, Role, SiteConfig,
    SourceDescriptor, UserConfig, UserEntry, UserTag,
};
pub use crate::manager::{ConfigManager, DEFAULT_SOURCES_KEY, ROOT_KEY};
pub use crate::settings::{CacheSettings, LogSettings, Settings, StorageSettings};
