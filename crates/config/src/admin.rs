//! The administrator-edited site configuration.
//!
//! Section and field names match the persisted JSON document, which is shared
//! with the web front end. Unknown top-level sections are kept as-is so that a
//! load/save round trip never loses data written by a newer version.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Where an entry came from: the imported config file, or added by hand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Config,
    #[default]
    Custom,
}

/// A video source (an upstream search/detail API).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub key: String,
    pub name: String,
    pub api: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default)]
    pub from: Origin,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ConfigSubscription {
    #[serde(rename = "URL")]
    pub url: String,
    pub auto_update: bool,
    pub last_check: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SiteConfig {
    pub site_name: String,
    pub announcement: String,
    pub search_downstream_max_page: u32,
    /// Seconds.
    pub site_interface_cache_time: u64,
    pub douban_proxy_type: String,
    pub douban_proxy: String,
    pub douban_image_proxy_type: String,
    pub douban_image_proxy: String,
    pub disable_yellow_filter: bool,
    pub fluid_search: bool,
}
impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            site_name: "Reel".to_string(),
            announcement: String::new(),
            search_downstream_max_page: 5,
            site_interface_cache_time: 7200,
            douban_proxy_type: "direct".to_string(),
            douban_proxy: String::new(),
            douban_image_proxy_type: "direct".to_string(),
            douban_image_proxy: String::new(),
            disable_yellow_filter: false,
            fluid_search: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    #[default]
    User,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    pub username: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub banned: bool,
    #[serde(rename = "enabledApis", default, skip_serializing_if = "Option::is_none")]
    pub enabled_apis: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// A user group granting access to a set of sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTag {
    pub name: String,
    #[serde(rename = "enabledApis", default)]
    pub enabled_apis: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct UserConfig {
    pub users: Vec<UserEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<UserTag>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryKind {
    #[default]
    Movie,
    Tv,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomCategory {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: CategoryKind,
    pub query: String,
    #[serde(default)]
    pub from: Origin,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChannel {
    pub key: String,
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ua: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epg: Option<String>,
    #[serde(default)]
    pub from: Origin,
    #[serde(default)]
    pub channel_number: u32,
    #[serde(default)]
    pub disabled: bool,
}

/// The root admin document.
///
/// [`source_config`](Self::source_config) is materialized by
/// [`ConfigManager`](crate::ConfigManager) from its own storage location and
/// is never written inline with the rest of the document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AdminConfig {
    // Field name misspelled in every document written so far.
    #[serde(rename = "ConfigSubscribtion")]
    pub config_subscription: ConfigSubscription,
    /// Raw text of the last imported config file.
    pub config_file: String,
    pub site_config: SiteConfig,
    pub user_config: UserConfig,
    pub source_config: Vec<SourceDescriptor>,
    pub custom_categories: Vec<CustomCategory>,
    pub live_config: Vec<LiveChannel>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AdminConfig {
    pub fn source(&self, key: &str) -> Option<&SourceDescriptor> {
        self.source_config.iter().find(|source| source.key == key)
    }

    /// Sources that aren't disabled, in list order.
    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceDescriptor> {
        self.source_config.iter().filter(|source| !source.disabled)
    }
}
