use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "REEL_";
const DEFAULT_FILE: &str = "reel.toml";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "reel")
}

fn default_data_dir() -> PathBuf {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf()).unwrap_or_else(|| PathBuf::from(".reel"))
}

/// Which storage backend holds records, admin config and the persistent cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageSettings {
    /// JSON file tree under `path`.
    Local {
        #[serde(default = "default_data_dir")]
        path: PathBuf,
    },
    /// Process memory; nothing survives a restart.
    Memory,
    Redis {
        url: String,
        #[serde(default)]
        namespace: Option<String>,
    },
    S3 {
        bucket: String,
        #[serde(default)]
        prefix: Option<String>,
        region: String,
        #[serde(default)]
        endpoint: Option<String>,
        key_id: String,
        key_secret: String,
    },
    Sqlite {
        path: PathBuf,
    },
}
impl Default for StorageSettings {
    fn default() -> Self {
        Self::Local { path: default_data_dir() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Entry limit of the in-process tier.
    pub max_size: usize,
    pub cleanup_interval_secs: u64,
    /// Also keep cache entries in the storage backend.
    pub persistent: bool,
}
impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_size: 1000,
            cleanup_interval_secs: 60,
            persistent: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
}
impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Process settings.
///
/// Layered, later layers winning: built-in defaults, then a settings file
/// (TOML, JSON or YAML by extension), then `REEL_*` environment variables with
/// `__` separating nested keys (`REEL_STORAGE__BACKEND=redis`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub storage: StorageSettings,
    pub cache: CacheSettings,
    pub log: LogSettings,
}

impl Settings {
    /// Load settings from `path`, or from `reel.toml` in the user's config
    /// directory when no path is given (a missing default file is fine).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let figment = match path {
            Some(path) if !path.is_file() => exn::bail!(ErrorKind::FileNotFound(path.to_path_buf())),
            Some(path) => Self::with_file(Self::defaults(), path),
            None => match project_dirs() {
                Some(dirs) => Self::with_file(Self::defaults(), &dirs.config_dir().join(DEFAULT_FILE)),
                None => Self::defaults(),
            },
        };
        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    fn defaults() -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
    }

    fn with_file(figment: Figment, path: &Path) -> Figment {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => figment.merge(Json::file(path)),
            Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
            _ => figment.merge(Toml::file(path)),
        }
    }

    fn extract(figment: Figment) -> Result<Self> {
        let settings: Self = figment.extract().or_raise(|| ErrorKind::InvalidSettings)?;
        if settings.cache.cleanup_interval_secs == 0 {
            exn::bail!(ErrorKind::InvalidSettings);
        }
        Ok(settings)
    }
}
