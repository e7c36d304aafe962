//! Adventure persistence for save/load functionality.
//!
//! The session only needs a get/set/delete contract over string values, so
//! storage is a trait with an in-memory implementation for tests and a
//! directory-of-JSON-files implementation for the binary.

use crate::memory::ConversationMemory;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

/// Key the session stores its adventure under.
pub const STORAGE_KEY: &str = "text-adventure-state";

/// Current save format version.
pub const SAVE_VERSION: u32 = 1;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// A string key/value store.
#[async_trait]
pub trait Storage: Send + Sync {
    /// The value under `key`, or `None` if nothing is stored there.
    async fn get(&self, key: &str) -> Result<Option<String>, PersistError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), PersistError>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), PersistError>;
}

/// Process-local storage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistError> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), PersistError> {
        self.values
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), PersistError> {
        self.values.lock().await.remove(key);
        Ok(())
    }
}

/// Stores each key as `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path for a key. Characters outside `[A-Za-z0-9_-]` become `_`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

#[async_trait]
impl Storage for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistError> {
        match fs::read_to_string(self.path_for(key)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), PersistError> {
        fs::create_dir_all(&self.dir).await?;

        // Write then rename, so a crash mid-write never leaves a torn save.
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).await?;
        fs::rename(&tmp, &path).await?;

        debug!(path = %path.display(), bytes = value.len(), "wrote save");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), PersistError> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// A saved adventure with all state needed to resume play.
///
/// The continuation token is not part of it: a restored adventure starts a
/// fresh server-side context and relies on the context reminder instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedAdventure {
    /// Save format version for compatibility checking.
    pub version: u32,

    /// When the save was created.
    pub saved_at: DateTime<Utc>,

    /// Model the adventure was being narrated by.
    pub model: String,

    pub system_prompt: String,

    #[serde(flatten)]
    pub memory: ConversationMemory,
}

impl SavedAdventure {
    pub fn new(
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        memory: ConversationMemory,
    ) -> Self {
        Self {
            version: SAVE_VERSION,
            saved_at: Utc::now(),
            model: model.into(),
            system_prompt: system_prompt.into(),
            memory,
        }
    }

    pub fn to_json(&self) -> Result<String, PersistError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a save, rejecting other format versions before anything else.
    pub fn from_json(content: &str) -> Result<Self, PersistError> {
        #[derive(Deserialize)]
        struct Partial {
            version: u32,
        }

        let partial: Partial = serde_json::from_str(content)?;
        if partial.version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: partial.version,
            });
        }

        let mut saved: Self = serde_json::from_str(content)?;
        saved.memory.normalize();
        Ok(saved)
    }

    pub async fn save(&self, store: &dyn Storage, key: &str) -> Result<(), PersistError> {
        store.set(key, &self.to_json()?).await
    }

    /// Load the adventure under `key`, if one was saved.
    pub async fn load(store: &dyn Storage, key: &str) -> Result<Option<Self>, PersistError> {
        match store.get(key).await? {
            Some(content) => Self::from_json(&content).map(Some),
            None => Ok(None),
        }
    }
}
