//! Atomic JSON document storage.
//!
//! One directory, one `<name>.json` file per document. Writes go through a
//! `<name>.json.tmp` sibling that is fsynced and then renamed over the target,
//! so a reader never observes a partially written document.

use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Errors from document storage.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to create config directory '{}': {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("document '{}' does not exist", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize document: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to write '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Key→document store rooted at one directory.
#[derive(Debug, Clone)]
pub struct AtomicConfigStore {
    dir: PathBuf,
}

impl AtomicConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Backing file for document `name`.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    /// Create the store directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CreateDir`] if the directory cannot be created.
    pub async fn ensure_dir(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StoreError::CreateDir {
                path: self.dir.clone(),
                source,
            })
    }

    /// Whether document `name` exists on disk.
    pub async fn exists(&self, name: &str) -> bool {
        tokio::fs::try_exists(self.path_for(name))
            .await
            .unwrap_or(false)
    }

    /// Write `default` as document `name` unless a file is already there.
    ///
    /// Returns `true` if the document was seeded. An existing file is never
    /// touched, whatever its content.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the write fails.
    pub async fn seed_if_missing(&self, name: &str, default: &Value) -> Result<bool, StoreError> {
        self.ensure_dir().await?;
        if self.exists(name).await {
            return Ok(false);
        }
        self.write_atomic(name, default).await?;
        tracing::info!(doc = name, path = %self.path_for(name).display(), "seeded default document");
        Ok(true)
    }

    /// Read and parse document `name`.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the file is absent, [`StoreError::Read`] on
    /// other I/O failures, [`StoreError::Parse`] on malformed JSON.
    pub async fn read(&self, name: &str) -> Result<Value, StoreError> {
        let path = self.path_for(name);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound { path });
            }
            Err(source) => return Err(StoreError::Read { path, source }),
        };
        serde_json::from_str(&text).map_err(|source| StoreError::Parse { path, source })
    }

    /// Write document `name` atomically (temp file → fsync → rename).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialize`] or [`StoreError::Write`]; the temp
    /// file is removed on failure.
    pub async fn write_atomic(&self, name: &str, value: &Value) -> Result<(), StoreError> {
        let path = self.path_for(name);
        let tmp_path = path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(value).map_err(StoreError::Serialize)?;

        let result = write_and_rename(&tmp_path, &path, text.as_bytes()).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&tmp_path).await;
        }
        result.map_err(|source| StoreError::Write { path, source })
    }
}

async fn write_and_rename(tmp_path: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(tmp_path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(tmp_path, path).await
}
