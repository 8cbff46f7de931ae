//! Persisted record shapes.
//!
//! Every field has a default so that documents written by older versions (or
//! by hand) still load; a missing number reads as zero, a missing string as
//! empty.

use serde::{Deserialize, Serialize};

/// Watch progress of one title.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayRecord {
    pub title: String,
    pub source_name: String,
    pub cover: String,
    pub year: String,
    /// Episode being watched, 1-based.
    pub index: u32,
    pub total_episodes: u32,
    /// Position within the episode, in seconds.
    pub play_time: u64,
    /// Length of the episode, in seconds.
    pub total_time: u64,
    /// Epoch millis of the last save.
    pub save_time: i64,
    pub search_title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Favorite {
    pub source_name: String,
    pub total_episodes: u32,
    pub title: String,
    pub year: String,
    pub cover: String,
    pub save_time: i64,
    pub search_title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

/// Intro/outro skipping for one title, in seconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkipConfig {
    pub enable: bool,
    pub intro_time: u64,
    pub outro_time: u64,
}

/// Registration and login metadata of a user. Times are epoch millis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    pub login_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_login_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_time: Option<i64>,
}
