//! Operator CLI for the reel media-state store.

pub mod app;
pub mod cli;
pub mod error;

pub use crate::app::App;
pub use crate::cli::Cli;
