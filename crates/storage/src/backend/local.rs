//! Local filesystem storage backend.
//!
//! This module provides a storage backend implementation for the local
//! filesystem. Every key maps to one JSON document under a configured root
//! directory (`a/b/c` → `{root}/a/b/c.json`) and is accessed via `tokio::fs`
//! for async I/O.

use super::KeyStream;
use super::envelope::{self, Unwrapped};
use crate::clock;
use crate::error::{ErrorKind, Result};
use crate::key::{prefix_dir, validate as validate_key, validate_prefix};
use crate::StorageBackend;
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use serde_json::Value;
use std::fs::create_dir_all as sync_create_dir;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::fs::{self, DirEntry};

const EXTENSION: &str = ".json";
const TEMP_EXTENSION: &str = ".tmp";

enum WalkEntry {
    Key(String),
    Descend(PathBuf),
    Skip,
}

/// Local filesystem storage backend.
///
/// Stores one JSON file per key in a directory on the local filesystem.
///
/// # Examples
///
/// ```no_run
/// use reel_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("local", "/var/lib/reel")?;
/// # Ok(())
/// # }
/// ```
pub struct LocalBackend {
    name: String,
    /// Root directory for the data tree
    root: PathBuf,
    /// Suffix for temporary files, unique per write within this process.
    temp_counter: AtomicU64,
}
impl LocalBackend {
    /// Create a new local filesystem backend.
    ///
    /// # Arguments
    /// * `root` - Absolute path to the data root directory
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute, or exists and is not a
    /// directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::BackendError(format!("root {} must be an absolute path", root.display())));
        }

        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::BackendError(format!("root {} is not a directory", root.display())));
            }
        } else {
            // Use non-async here; it'll only happen once on initialization
            // and it's not worth the hassle of making the constructor async.
            sync_create_dir(&root).map_err(|e| Self::map_io_error(e, &root))?;
        }

        Ok(Self {
            name: name.into(),
            root,
            temp_counter: AtomicU64::new(0),
        })
    }

    /// Get the absolute file path for a key.
    fn key_path(&self, key: &str) -> Result<PathBuf> {
        let key = validate_key(key)?;
        let mut path = self.root.join(key);
        // Can't use set_extension(): keys like "siteA+1.5" already contain dots.
        path.as_mut_os_string().push(EXTENSION);
        Ok(path)
    }

    /// Convert an absolute file path back into a key.
    ///
    /// Returns `None` for anything that isn't a key file (temporary files,
    /// stray files without the extension, non-UTF8 names).
    fn path_key(&self, absolute: &Path) -> Result<Option<String>> {
        let relative = absolute.strip_prefix(&self.root).or_raise(|| {
            ErrorKind::BackendError(format!("path `{:?}` is not within root `{:?}`", absolute, self.root))
        })?;
        let Some(relative) = relative.to_str() else {
            return Ok(None);
        };
        let key = match relative.strip_suffix(EXTENSION) {
            Some(key) => key.replace(std::path::MAIN_SEPARATOR, "/"),
            None => return Ok(None),
        };
        Ok(validate_key(&key).is_ok().then_some(key))
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }

    /// Helper to stay sane inside the stream loop where you can't `?` errors.
    async fn process_entry(&self, entry: DirEntry, prefix: &str) -> Result<WalkEntry> {
        let path = entry.path();
        let file_type = entry.file_type().await.map_err(|e| Self::map_io_error(e, &path))?;
        if file_type.is_dir() {
            return Ok(WalkEntry::Descend(path));
        }
        if !file_type.is_file() {
            // Note: silently drop what is most likely a broken symlink.
            return Ok(WalkEntry::Skip);
        }
        Ok(match self.path_key(&path)? {
            Some(key) if key.starts_with(prefix) => WalkEntry::Key(key),
            _ => WalkEntry::Skip,
        })
    }

    async fn remove_file(path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => exn::bail!(Self::map_io_error(e, path)),
        }
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.key_path(key)?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => exn::bail!(Self::map_io_error(e, &path)),
        };
        let document: Value = match serde_json::from_slice(&bytes) {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!(backend = %self.name, key, error = %e, "Ignoring corrupt value on disk");
                return Ok(None);
            },
        };
        match envelope::unwrap(document, clock::now_millis()) {
            Unwrapped::Live(value) => Ok(Some(value)),
            Unwrapped::Expired => {
                Self::remove_file(&path).await?;
                Ok(None)
            },
        }
    }

    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<()> {
        let path = self.key_path(key)?;
        let document = envelope::wrap(value, ttl, clock::now_millis());
        let bytes = serde_json::to_vec(&document).or_raise(|| ErrorKind::Serialization(key.to_string()))?;
        // Create parent directories if needed, to keep behaviour consistent
        // with flat key-value backends.
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, parent))?;
        }
        // Write-then-rename so that concurrent readers see either the old or
        // the new document, never half of one. The temporary file doesn't
        // carry the key extension, so listings never pick it up.
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let mut temp = path.clone();
        temp.as_mut_os_string().push(format!(".{}.{n}{TEMP_EXTENSION}", std::process::id()));
        fs::write(&temp, bytes).await.map_err(|e| Self::map_io_error(e, &temp))?;
        if let Err(e) = fs::rename(&temp, &path).await {
            _ = fs::remove_file(&temp).await;
            exn::bail!(Self::map_io_error(e, &path));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.key_path(key)?;
        Self::remove_file(&path).await
    }

    fn key_stream<'a>(&'a self, prefix: &'a str) -> KeyStream<'a> {
        if let Err(e) = validate_prefix(prefix) {
            return Box::pin(futures::stream::once(async { Err(e) }));
        }

        // Walk from the directory part of the prefix. So the prefix
        // "u/alice/pl" starts in "u/alice" and matches:
        // - [MATCH] "u/alice/play/siteA+1"
        // - [MATCH] "u/alice/playlist"
        // - [NOT MATCH] "u/alice/fav/siteA+1"
        let start_dir = prefix_dir(prefix).map(|dir| self.root.join(dir)).unwrap_or_else(|| self.root.clone());
        let mut stack = vec![start_dir];

        Box::pin(stream! {
            'dirs: while let Some(current) = stack.pop() {
                let mut entries = match fs::read_dir(&current).await {
                    Ok(entries) => entries,
                    // Asking for the contents of a directory that doesn't
                    // exist results in an empty list, not an error.
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(err) => {
                        yield Err(exn::Exn::from(Self::map_io_error(err, &current)));
                        continue 'dirs;
                    }
                };

                'entries: loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break 'entries,
                        Err(e) => { yield Err(exn::Exn::from(Self::map_io_error(e, &current))); continue 'entries; },
                    };
                    match self.process_entry(entry, prefix).await {
                        Ok(WalkEntry::Key(k)) => yield Ok(k),
                        Ok(WalkEntry::Descend(d)) => stack.push(d),
                        Ok(WalkEntry::Skip) => {},
                        Err(e) => yield Err(e),
                    };
                }
            }
        })
    }
}
