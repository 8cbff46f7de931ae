//! Best-effort extraction of sources, live channels and categories from a
//! config file written for the web front end.
//!
//! The file format was never formally specified and hand-edited files are
//! common, so every entry is parsed on its own: it either fits the expected
//! shape or is skipped (and logged), never failing the whole import.

use crate::admin::{AdminConfig, CategoryKind, CustomCategory, LiveChannel, Origin, SourceDescriptor};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

#[derive(Deserialize)]
#[serde(untagged)]
enum Entry<T> {
    Typed(T),
    Skipped(Value),
}

#[derive(Deserialize)]
struct RawSource {
    api: String,
    name: String,
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Deserialize)]
struct RawLive {
    name: String,
    url: String,
    #[serde(default)]
    ua: Option<String>,
    #[serde(default)]
    epg: Option<String>,
}

#[derive(Deserialize)]
struct RawCategory {
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    kind: CategoryKind,
    query: String,
}

/// What a config file contributes to an [`AdminConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportedConfig {
    pub sources: Vec<SourceDescriptor>,
    pub lives: Vec<LiveChannel>,
    pub categories: Vec<CustomCategory>,
    /// Seconds.
    pub cache_time: Option<u64>,
}

fn typed<T>(section: &str, name: &str, value: &Value) -> Option<T>
where
    T: DeserializeOwned,
{
    match Entry::<T>::deserialize(value) {
        Ok(Entry::Typed(entry)) => Some(entry),
        Ok(Entry::Skipped(_)) | Err(_) => {
            tracing::debug!(section, entry = name, "Skipping unrecognized config entry");
            None
        },
    }
}

/// Extract everything recognizable from a raw config document.
pub fn parse_import(raw: &Value) -> ImportedConfig {
    let mut imported = ImportedConfig {
        cache_time: raw.get("cache_time").and_then(Value::as_u64),
        ..ImportedConfig::default()
    };

    if let Some(sites) = raw.get("api_site").and_then(Value::as_object) {
        imported.sources = sites
            .iter()
            .filter_map(|(key, value)| {
                let site: RawSource = typed("api_site", key, value)?;
                Some(SourceDescriptor {
                    key: key.clone(),
                    name: site.name,
                    api: site.api,
                    detail: site.detail,
                    from: Origin::Config,
                    disabled: false,
                })
            })
            .collect();
    }

    if let Some(lives) = raw.get("lives").and_then(Value::as_object) {
        imported.lives = lives
            .iter()
            .filter_map(|(key, value)| {
                let live: RawLive = typed("lives", key, value)?;
                Some(LiveChannel {
                    key: key.clone(),
                    name: live.name,
                    url: live.url,
                    ua: live.ua,
                    epg: live.epg,
                    from: Origin::Config,
                    channel_number: 0,
                    disabled: false,
                })
            })
            .collect();
    }

    if let Some(categories) = raw.get("custom_category").and_then(Value::as_array) {
        imported.categories = categories
            .iter()
            .enumerate()
            .filter_map(|(index, value)| {
                let category: RawCategory = typed("custom_category", &index.to_string(), value)?;
                let name = match category.name.trim() {
                    "" => category.query.clone(),
                    name => name.to_string(),
                };
                Some(CustomCategory {
                    name,
                    kind: category.kind,
                    query: category.query,
                    from: Origin::Config,
                    disabled: false,
                })
            })
            .collect();
    }

    imported
}

/// Entries that an import can replace.
trait Importable {
    fn same_entry(&self, other: &Self) -> bool;
    fn origin(&self) -> Origin;
    fn is_disabled(&self) -> bool;
    fn set_disabled(&mut self, disabled: bool);
}

macro_rules! importable {
    ($ty:ty, |$a:ident, $b:ident| $same:expr) => {
        impl Importable for $ty {
            fn same_entry(&self, other: &Self) -> bool {
                let ($a, $b) = (self, other);
                $same
            }

            fn origin(&self) -> Origin {
                self.from
            }

            fn is_disabled(&self) -> bool {
                self.disabled
            }

            fn set_disabled(&mut self, disabled: bool) {
                self.disabled = disabled;
            }
        }
    };
}

importable!(SourceDescriptor, |a, b| a.key == b.key);
importable!(LiveChannel, |a, b| a.key == b.key);
importable!(CustomCategory, |a, b| a.query == b.query && a.kind == b.kind);

/// Imported entries first (keeping the disabled flag of an entry they
/// replace), then hand-added entries the import doesn't cover. Entries from a
/// previous import that are no longer present are dropped.
fn merge<T: Importable>(existing: Vec<T>, mut imported: Vec<T>) -> Vec<T> {
    for entry in &mut imported {
        if let Some(previous) = existing.iter().find(|previous| previous.same_entry(entry)) {
            entry.set_disabled(previous.is_disabled());
        }
    }
    let custom: Vec<T> = existing
        .into_iter()
        .filter(|previous| previous.origin() == Origin::Custom && !imported.iter().any(|entry| entry.same_entry(previous)))
        .collect();
    imported.extend(custom);
    imported
}

/// Merge an import into `config`.
pub fn apply_import(config: &mut AdminConfig, imported: ImportedConfig) {
    config.source_config = merge(std::mem::take(&mut config.source_config), imported.sources);
    config.live_config = merge(std::mem::take(&mut config.live_config), imported.lives);
    config.custom_categories = merge(std::mem::take(&mut config.custom_categories), imported.categories);
    if let Some(cache_time) = imported.cache_time {
        config.site_config.site_interface_cache_time = cache_time;
    }
}
