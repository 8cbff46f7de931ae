use crate::app::App;
use crate::error::{ErrorKind, Result};
use clap::{Args, Parser, Subcommand};
use exn::ResultExt;
use reel_storage::clock;
use serde_json::{Value, json};
use std::path::PathBuf;

/// Operator tool for the reel media-state store.
///
/// Every command prints its result as JSON on stdout; logs go to stderr.
#[derive(Debug, Parser)]
#[command(name = "reel", version)]
pub struct Cli {
    /// Settings file (TOML, JSON or YAML). Defaults to `reel.toml` in the
    /// user's config directory.
    #[arg(long, global = true, env = "REEL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Report what would change without writing anything.
    #[arg(long, global = true)]
    pub read_only: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Viewing statistics.
    #[command(subcommand)]
    Stats(StatsCommand),
    /// Manage the video source list.
    #[command(subcommand)]
    Sources(SourcesCommand),
    /// Inspect or import the admin configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Maintain the persistent cache tier.
    #[command(subcommand)]
    Cache(CacheCommand),
    /// Manage the user registry.
    #[command(subcommand)]
    Users(UsersCommand),
}

#[derive(Debug, Subcommand)]
pub enum StatsCommand {
    /// Statistics of one user.
    User { username: String },
    /// Site-wide statistics.
    Site,
    /// Most played titles.
    Content {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Debug, Subcommand)]
pub enum SourcesCommand {
    List,
    /// Remove sources by key.
    Remove {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    Disable(SourceKey),
    Enable(SourceKey),
}

#[derive(Debug, Args)]
pub struct SourceKey {
    pub key: String,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the admin configuration, source list included.
    Show,
    /// Import sources, live channels and categories from a JSON config file.
    Import { file: PathBuf },
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Remove every entry of a category.
    Clear { category: String },
    /// Remove expired entries.
    Sweep,
}

#[derive(Debug, Subcommand)]
pub enum UsersCommand {
    List,
    Register { username: String },
    /// Delete a user and everything they own.
    Delete { username: String },
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).or_raise(|| ErrorKind::InvalidInput("unserializable output".to_string()))
}

impl Command {
    /// Run the command, returning what should be printed.
    pub async fn execute(self, app: &App) -> Result<Value> {
        let now = clock::now_millis();
        match self {
            Self::Stats(StatsCommand::User { username }) => to_json(&app.user_stat(&username, now).await?),
            Self::Stats(StatsCommand::Site) => to_json(&app.site_stat(now).await?),
            Self::Stats(StatsCommand::Content { limit }) => to_json(&app.content_stat(limit).await?),

            Self::Sources(SourcesCommand::List) => {
                to_json(&app.config().sources().await.or_raise(|| ErrorKind::Config)?)
            },
            Self::Sources(SourcesCommand::Remove { keys }) => {
                let removed = app.config().remove_sources(&keys).await.or_raise(|| ErrorKind::Config)?;
                Ok(json!({ "removed": removed }))
            },
            Self::Sources(SourcesCommand::Disable(SourceKey { key })) => set_disabled(app, &key, true).await,
            Self::Sources(SourcesCommand::Enable(SourceKey { key })) => set_disabled(app, &key, false).await,

            Self::Config(ConfigCommand::Show) => match app.config().load().await.or_raise(|| ErrorKind::Config)? {
                Some(config) => to_json(&config),
                None => Ok(Value::Null),
            },
            Self::Config(ConfigCommand::Import { file }) => {
                let raw = tokio::fs::read(&file)
                    .await
                    .or_raise(|| ErrorKind::InvalidInput(format!("can't read {}", file.display())))?;
                let raw: Value = serde_json::from_slice(&raw)
                    .or_raise(|| ErrorKind::InvalidInput(format!("{} is not JSON", file.display())))?;
                let config = app.config().import(&raw).await.or_raise(|| ErrorKind::Config)?;
                Ok(json!({
                    "sources": config.source_config.len(),
                    "lives": config.live_config.len(),
                    "categories": config.custom_categories.len(),
                }))
            },

            Self::Cache(CacheCommand::Clear { category }) => {
                let cleared = app.cache().clear_category(&category).await.or_raise(|| ErrorKind::Cache)?;
                Ok(json!({ "cleared": cleared }))
            },
            Self::Cache(CacheCommand::Sweep) => to_json(&app.cache().clear_expired().await.or_raise(|| ErrorKind::Cache)?),

            Self::Users(UsersCommand::List) => to_json(&app.records().usernames().await.or_raise(|| ErrorKind::Records)?),
            Self::Users(UsersCommand::Register { username }) => {
                let created = app.records().register_user(&username, now).await.or_raise(|| ErrorKind::Records)?;
                Ok(json!({ "created": created }))
            },
            Self::Users(UsersCommand::Delete { username }) => {
                let deleted = app.records().delete_user(&username).await.or_raise(|| ErrorKind::Records)?;
                Ok(json!({ "deleted": deleted }))
            },
        }
    }
}

async fn set_disabled(app: &App, key: &str, disabled: bool) -> Result<Value> {
    if !app.config().set_source_disabled(key, disabled).await.or_raise(|| ErrorKind::Config)? {
        exn::bail!(ErrorKind::InvalidInput(format!("no source {key:?}")));
    }
    Ok(json!({ "key": key, "disabled": disabled }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use reel_config::CacheSettings;
    use reel_storage::backend::MemoryBackend;
    use reel_storage::{BackendHandle, StorageBackend};
    use std::sync::Arc;

    fn app() -> (BackendHandle, App) {
        let backend: BackendHandle = Arc::new(MemoryBackend::default());
        let settings = CacheSettings {
            persistent: true,
            ..CacheSettings::default()
        };
        (backend.clone(), App::from_backend(backend, &settings, false))
    }

    async fn run(app: &App, args: &[&str]) -> Result<Value> {
        let cli = Cli::try_parse_from(std::iter::once("reel").chain(args.iter().copied())).unwrap();
        cli.command.execute(app).await
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from(["reel", "users", "list", "--read-only", "--config", "x.toml"]).unwrap();
        assert!(cli.read_only);
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        assert!(Cli::try_parse_from(["reel", "sources", "remove"]).is_err());
    }

    #[tokio::test]
    async fn test_users() {
        let (_, app) = app();
        assert_eq!(run(&app, &["users", "register", "bob"]).await.unwrap(), json!({"created": true}));
        assert_eq!(run(&app, &["users", "register", "bob"]).await.unwrap(), json!({"created": false}));
        assert_eq!(run(&app, &["users", "list"]).await.unwrap(), json!(["bob"]));
        run(&app, &["users", "delete", "bob"]).await.unwrap();
        assert_eq!(run(&app, &["users", "list"]).await.unwrap(), json!([]));
    }

    #[tokio::test]
    async fn test_import_and_sources() {
        let (_, app) = app();
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.json");
        let raw = json!({"api_site": {
            "a": {"api": "https://a.example/api", "name": "A"},
            "b": {"api": "https://b.example/api", "name": "B"},
        }});
        std::fs::write(&file, raw.to_string()).unwrap();

        let summary = run(&app, &["config", "import", file.to_str().unwrap()]).await.unwrap();
        assert_eq!(summary["sources"], json!(2));

        run(&app, &["sources", "disable", "a"]).await.unwrap();
        let sources = run(&app, &["sources", "list"]).await.unwrap();
        assert_eq!(sources[0]["disabled"], json!(true));
        let err = run(&app, &["sources", "enable", "zzz"]).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidInput(_)));

        assert_eq!(run(&app, &["sources", "remove", "a", "b"]).await.unwrap(), json!({"removed": true}));
        assert_eq!(run(&app, &["sources", "list"]).await.unwrap(), json!([]));
        let shown = run(&app, &["config", "show"]).await.unwrap();
        assert_eq!(shown["SourceConfig"], json!([]));
    }

    #[tokio::test]
    async fn test_config_show_empty() {
        let (_, app) = app();
        assert_eq!(run(&app, &["config", "show"]).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_cache_clear() {
        let (backend, app) = app();
        app.cache().set("search", "dune", json!([1]), None).await;
        app.close().await;
        assert!(!backend.keys("cache/search/").await.unwrap().is_empty());

        assert_eq!(run(&app, &["cache", "clear", "search"]).await.unwrap(), json!({"cleared": 2}));
        assert!(backend.keys("cache/search/").await.unwrap().is_empty());
        let report = run(&app, &["cache", "sweep"]).await.unwrap();
        assert_eq!(report, json!({"volatile": 0, "persistent": 0}));
    }
}
