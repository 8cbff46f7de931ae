use crate::admin::{AdminConfig, SourceDescriptor};
use crate::error::{ErrorKind, Result};
use crate::import::{apply_import, parse_import};
use exn::ResultExt;
use reel_storage::{BackendHandle, StorageBackend, StorageBackendExt};
use serde_json::Value;
use std::collections::HashSet;
use tracing::instrument;

/// Storage key of the root admin document.
pub const ROOT_KEY: &str = "admin/config";
/// Where the source list goes when the root doesn't reference one yet.
pub const DEFAULT_SOURCES_KEY: &str = "admin/sources";
/// Internal field of the persisted root pointing at the source list.
const SOURCE_LIST_FIELD: &str = "__sourceListKey";
const SOURCE_CONFIG_FIELD: &str = "SourceConfig";

/// Loads and saves the [`AdminConfig`].
///
/// The source list can be large and is edited far more often than the rest
/// of the document, so it's persisted as its own value. The root only carries
/// a reference to it.
#[derive(Clone)]
pub struct ConfigManager {
    backend: BackendHandle,
}

impl ConfigManager {
    pub fn new(backend: BackendHandle) -> Self {
        Self { backend }
    }

    async fn root_document(&self) -> Result<Option<Value>> {
        self.backend.get(ROOT_KEY).await.or_raise(|| ErrorKind::Storage)
    }

    /// Source list location recorded in the persisted root, if any.
    async fn source_reference(&self) -> Result<Option<String>> {
        let root = self.root_document().await?;
        Ok(root.as_ref().and_then(|doc| doc.get(SOURCE_LIST_FIELD)).and_then(Value::as_str).map(str::to_string))
    }

    async fn read_sources(&self, key: &str) -> Result<Vec<SourceDescriptor>> {
        // Missing or malformed lists load as empty.
        let sources = self.backend.get_as(key).await.or_raise(|| ErrorKind::Storage)?;
        Ok(sources.unwrap_or_default())
    }

    async fn write_sources(&self, sources: &[SourceDescriptor]) -> Result<()> {
        match self.source_reference().await? {
            Some(key) => self.backend.set_as(&key, &sources, None).await.or_raise(|| ErrorKind::Storage),
            None => {
                // No list yet: go through save() so that the root gets its
                // reference.
                let mut config = self.load().await?.unwrap_or_default();
                config.source_config = sources.to_vec();
                self.save(&config).await
            },
        }
    }

    /// Load the admin config with its source list attached. `None` if no
    /// config has been saved yet (or the stored one can't be decoded).
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<Option<AdminConfig>> {
        let Some(mut root) = self.root_document().await? else {
            return Ok(None);
        };
        let reference = root
            .as_object_mut()
            .and_then(|doc| doc.remove(SOURCE_LIST_FIELD))
            .and_then(|value| value.as_str().map(str::to_string));
        let mut config: AdminConfig = match serde_json::from_value(root) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(key = ROOT_KEY, error = %e, "Ignoring malformed admin config");
                return Ok(None);
            },
        };
        config.source_config = match reference {
            Some(key) => self.read_sources(&key).await?,
            None => Vec::new(),
        };
        Ok(Some(config))
    }

    /// Persist the admin config, writing its source list separately.
    ///
    /// An empty source list never drops an existing reference: the referenced
    /// list is emptied instead, so nothing is orphaned.
    #[instrument(skip_all)]
    pub async fn save(&self, config: &AdminConfig) -> Result<()> {
        let previous = self.source_reference().await?;
        let mut root = serde_json::to_value(config).or_raise(|| ErrorKind::Serialization)?;
        let Some(doc) = root.as_object_mut() else {
            exn::bail!(ErrorKind::Serialization);
        };
        doc.remove(SOURCE_CONFIG_FIELD);
        doc.remove(SOURCE_LIST_FIELD);

        let reference = match (config.source_config.is_empty(), previous) {
            (false, previous) => Some(previous.unwrap_or_else(|| DEFAULT_SOURCES_KEY.to_string())),
            (true, Some(previous)) => Some(previous),
            (true, None) => None,
        };
        // List first: the root must never point at a list that isn't there.
        if let Some(key) = &reference {
            self.backend.set_as(key, &config.source_config, None).await.or_raise(|| ErrorKind::Storage)?;
            doc.insert(SOURCE_LIST_FIELD.to_string(), Value::from(key.as_str()));
        }
        self.backend.set(ROOT_KEY, &root, None).await.or_raise(|| ErrorKind::Storage)
    }

    /// The source list on its own.
    pub async fn sources(&self) -> Result<Vec<SourceDescriptor>> {
        match self.source_reference().await? {
            Some(key) => self.read_sources(&key).await,
            None => Ok(Vec::new()),
        }
    }

    /// Remove sources by key. Returns whether anything was removed; the list
    /// is only rewritten if so.
    pub async fn remove_sources<K: AsRef<str>>(&self, keys: &[K]) -> Result<bool> {
        let doomed: HashSet<&str> = keys.iter().map(AsRef::as_ref).collect();
        let mut sources = self.sources().await?;
        let before = sources.len();
        sources.retain(|source| !doomed.contains(source.key.as_str()));
        if sources.len() == before {
            return Ok(false);
        }
        self.write_sources(&sources).await?;
        Ok(true)
    }

    /// Append a source. Returns `false` (and changes nothing) if a source with
    /// the same key already exists.
    pub async fn add_source(&self, source: SourceDescriptor) -> Result<bool> {
        let mut sources = self.sources().await?;
        if sources.iter().any(|existing| existing.key == source.key) {
            return Ok(false);
        }
        sources.push(source);
        self.write_sources(&sources).await?;
        Ok(true)
    }

    /// Enable or disable a source. Returns `false` if there is no such source.
    pub async fn set_source_disabled(&self, key: &str, disabled: bool) -> Result<bool> {
        let mut sources = self.sources().await?;
        let Some(source) = sources.iter_mut().find(|source| source.key == key) else {
            return Ok(false);
        };
        if source.disabled != disabled {
            source.disabled = disabled;
            self.write_sources(&sources).await?;
        }
        Ok(true)
    }

    /// Move the listed sources to the front, in the given order. Unknown keys
    /// are ignored; unlisted sources keep their relative order after them.
    pub async fn reorder_sources<K: AsRef<str>>(&self, keys: &[K]) -> Result<()> {
        let mut remaining = self.sources().await?;
        let mut ordered = Vec::with_capacity(remaining.len());
        for key in keys {
            if let Some(index) = remaining.iter().position(|source| source.key == key.as_ref()) {
                ordered.push(remaining.remove(index));
            }
        }
        ordered.append(&mut remaining);
        self.write_sources(&ordered).await
    }

    /// Import a raw config document into the stored admin config (creating
    /// one if needed) and save the result.
    #[instrument(skip_all)]
    pub async fn import(&self, raw: &Value) -> Result<AdminConfig> {
        let imported = parse_import(raw);
        let mut config = self.load().await?.unwrap_or_default();
        apply_import(&mut config, imported);
        config.config_file = serde_json::to_string_pretty(raw).or_raise(|| ErrorKind::Serialization)?;
        self.save(&config).await?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::Origin;
    use reel_storage::backend::MemoryBackend;
    use serde_json::json;
    use std::sync::Arc;

    fn source(key: &str) -> SourceDescriptor {
        SourceDescriptor {
            key: key.to_string(),
            name: key.to_uppercase(),
            api: format!("https://{key}.example/api"),
            detail: None,
            from: Origin::Custom,
            disabled: false,
        }
    }

    fn manager() -> (BackendHandle, ConfigManager) {
        let backend: BackendHandle = Arc::new(MemoryBackend::default());
        (backend.clone(), ConfigManager::new(backend))
    }

    fn keys(sources: &[SourceDescriptor]) -> Vec<&str> {
        sources.iter().map(|s| s.key.as_str()).collect()
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let (_, manager) = manager();
        assert_eq!(manager.load().await.unwrap(), None);
        assert!(manager.sources().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_source_list_is_stored_separately() {
        let (backend, manager) = manager();
        let config = AdminConfig {
            source_config: vec![source("a"), source("b")],
            ..AdminConfig::default()
        };
        manager.save(&config).await.unwrap();

        let root = backend.get(ROOT_KEY).await.unwrap().unwrap();
        assert!(root.get(SOURCE_CONFIG_FIELD).is_none());
        assert_eq!(root[SOURCE_LIST_FIELD], json!(DEFAULT_SOURCES_KEY));
        let list = backend.get(DEFAULT_SOURCES_KEY).await.unwrap().unwrap();
        assert_eq!(list.as_array().map(Vec::len), Some(2));

        assert_eq!(manager.load().await.unwrap(), Some(config));
    }

    #[tokio::test]
    async fn test_empty_list_preserves_reference() {
        let (backend, manager) = manager();
        let mut config = AdminConfig {
            source_config: vec![source("a")],
            ..AdminConfig::default()
        };
        manager.save(&config).await.unwrap();
        config.source_config.clear();
        manager.save(&config).await.unwrap();

        let root = backend.get(ROOT_KEY).await.unwrap().unwrap();
        assert_eq!(root[SOURCE_LIST_FIELD], json!(DEFAULT_SOURCES_KEY));
        assert_eq!(backend.get(DEFAULT_SOURCES_KEY).await.unwrap(), Some(json!([])));
        assert!(manager.load().await.unwrap().unwrap().source_config.is_empty());
    }

    #[tokio::test]
    async fn test_empty_list_without_reference() {
        let (backend, manager) = manager();
        manager.save(&AdminConfig::default()).await.unwrap();
        let root = backend.get(ROOT_KEY).await.unwrap().unwrap();
        assert!(root.get(SOURCE_LIST_FIELD).is_none());
        assert!(!backend.exists(DEFAULT_SOURCES_KEY).await.unwrap());
    }

    #[tokio::test]
    async fn test_custom_reference_is_followed() {
        let backend: BackendHandle = Arc::new(MemoryBackend::with_entries([
            (ROOT_KEY, json!({"SiteConfig": {"SiteName": "Mine"}, "__sourceListKey": "custom/list"})),
            ("custom/list", json!([{"key": "x", "name": "X", "api": "https://x"}])),
        ]));
        let manager = ConfigManager::new(backend.clone());
        let config = manager.load().await.unwrap().unwrap();
        assert_eq!(config.site_config.site_name, "Mine");
        assert_eq!(keys(&config.source_config), vec!["x"]);
        assert!(config.extra.is_empty());

        assert!(manager.add_source(source("y")).await.unwrap());
        assert_eq!(backend.get("custom/list").await.unwrap().unwrap().as_array().map(Vec::len), Some(2));
        assert!(!backend.exists(DEFAULT_SOURCES_KEY).await.unwrap());
    }

    #[tokio::test]
    async fn test_broken_reference_loads_empty_list() {
        let backend: BackendHandle = Arc::new(MemoryBackend::with_entries([
            (ROOT_KEY, json!({"__sourceListKey": "admin/sources"})),
            ("admin/sources", json!({"not": "a list"})),
        ]));
        let config = ConfigManager::new(backend).load().await.unwrap().unwrap();
        assert!(config.source_config.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_root_is_none() {
        let backend: BackendHandle = Arc::new(MemoryBackend::with_entries([(ROOT_KEY, json!("garbage"))]));
        assert_eq!(ConfigManager::new(backend).load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remove_sources() {
        let (_, manager) = manager();
        manager
            .save(&AdminConfig {
                source_config: vec![source("a"), source("b"), source("c")],
                ..AdminConfig::default()
            })
            .await
            .unwrap();
        assert!(manager.remove_sources(&["b", "zzz"]).await.unwrap());
        assert!(!manager.remove_sources(&["zzz"]).await.unwrap());
        assert_eq!(keys(&manager.sources().await.unwrap()), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_source_edits_without_saved_config() {
        let (backend, manager) = manager();
        assert!(manager.add_source(source("a")).await.unwrap());
        assert!(!manager.add_source(source("a")).await.unwrap());
        assert!(manager.add_source(source("b")).await.unwrap());
        // The first edit created a root referencing the list.
        let root = backend.get(ROOT_KEY).await.unwrap().unwrap();
        assert_eq!(root[SOURCE_LIST_FIELD], json!(DEFAULT_SOURCES_KEY));

        assert!(manager.set_source_disabled("a", true).await.unwrap());
        assert!(!manager.set_source_disabled("missing", true).await.unwrap());
        let config = manager.load().await.unwrap().unwrap();
        assert_eq!(config.enabled_sources().map(|s| s.key.as_str()).collect::<Vec<_>>(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_reorder_sources() {
        let (_, manager) = manager();
        for key in ["a", "b", "c", "d"] {
            manager.add_source(source(key)).await.unwrap();
        }
        manager.reorder_sources(&["c", "nope", "a"]).await.unwrap();
        assert_eq!(keys(&manager.sources().await.unwrap()), vec!["c", "a", "b", "d"]);
    }

    #[tokio::test]
    async fn test_import_keeps_custom_sources() {
        let (_, manager) = manager();
        manager.add_source(source("mine")).await.unwrap();
        let raw = json!({
            "cache_time": 600,
            "api_site": {
                "siteA": {"api": "https://a.example/api", "name": "Site A"},
                "broken": {"name": "no api"},
            },
        });
        let config = manager.import(&raw).await.unwrap();
        assert_eq!(keys(&config.source_config), vec!["siteA", "mine"]);
        assert_eq!(config.site_config.site_interface_cache_time, 600);

        let reloaded = manager.load().await.unwrap().unwrap();
        assert_eq!(reloaded.source_config, config.source_config);
        assert!(reloaded.config_file.contains("siteA"));
    }
}
