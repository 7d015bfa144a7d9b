//! Durable key/value store for key→path mappings and children sets.
//!
//! # Design
//!
//! Values are opaque strings, with one extra shape: an append-only set of
//! strings used for parent→children bookkeeping. Plain values and sets share
//! one key space, so [`KvStore::exists`] and [`KvStore::delete`] work on
//! either.
//!
//! ## Storage
//!
//! [`JsonFileStore`] keeps the whole map in a single JSON document:
//!
//! ```json
//! {
//!   "version": 1,
//!   "entries": {
//!     "9f86d0…": "9f/86/9f86d0….jpg",
//!     "2c26b4…:children": ["9f86d0…", "fcde2b…"]
//!   }
//! }
//! ```
//!
//! The document is rewritten after every mutation while the store's mutex is
//! held, so concurrent writers in one process never interleave. A missing,
//! corrupt, or older-version file loads as an empty store; the next write
//! replaces it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Version of the store document format. Bump to discard existing files when
/// the layout changes.
const STORE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store {op} failed for key {key}: {source}")]
    Io {
        op: &'static str,
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("store serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("corrupt store entry {key}: {reason}")]
    Corrupt { key: String, reason: &'static str },
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;
    async fn delete(&self, key: &str) -> StoreResult<()>;
    async fn exists(&self, key: &str) -> StoreResult<bool>;
    /// Add `value` to the set at `set_key`, creating the set if needed.
    async fn append_to_set(&self, set_key: &str, value: &str) -> StoreResult<()>;
    /// Members of the set at `set_key` in insertion order; empty if absent.
    async fn read_set(&self, set_key: &str) -> StoreResult<Vec<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum Value {
    Text(String),
    Set(Vec<String>),
}

/// The key space shared by both store implementations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Entries(BTreeMap<String, Value>);

impl Entries {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match self.0.get(key) {
            None => Ok(None),
            Some(Value::Text(v)) => Ok(Some(v.clone())),
            Some(Value::Set(_)) => Err(StoreError::Corrupt {
                key: key.to_string(),
                reason: "expected a value, found a set",
            }),
        }
    }

    fn set(&mut self, key: &str, value: &str) {
        self.0
            .insert(key.to_string(), Value::Text(value.to_string()));
    }

    /// Returns whether the key was present.
    fn delete(&mut self, key: &str) -> bool {
        self.0.remove(key).is_some()
    }

    fn exists(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Returns whether the set changed.
    fn append_to_set(&mut self, set_key: &str, value: &str) -> StoreResult<bool> {
        match self
            .0
            .entry(set_key.to_string())
            .or_insert_with(|| Value::Set(Vec::new()))
        {
            Value::Set(members) => {
                if members.iter().any(|m| m == value) {
                    Ok(false)
                } else {
                    members.push(value.to_string());
                    Ok(true)
                }
            }
            Value::Text(_) => Err(StoreError::Corrupt {
                key: set_key.to_string(),
                reason: "expected a set, found a value",
            }),
        }
    }

    fn read_set(&self, set_key: &str) -> StoreResult<Vec<String>> {
        match self.0.get(set_key) {
            None => Ok(Vec::new()),
            Some(Value::Set(members)) => Ok(members.clone()),
            Some(Value::Text(_)) => Err(StoreError::Corrupt {
                key: set_key.to_string(),
                reason: "expected a set, found a value",
            }),
        }
    }
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Entries>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.entries.lock().await.get(key)
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.entries.lock().await.set(key, value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries.lock().await.delete(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.entries.lock().await.exists(key))
    }

    async fn append_to_set(&self, set_key: &str, value: &str) -> StoreResult<()> {
        self.entries
            .lock()
            .await
            .append_to_set(set_key, value)
            .map(|_| ())
    }

    async fn read_set(&self, set_key: &str) -> StoreResult<Vec<String>> {
        self.entries.lock().await.read_set(set_key)
    }
}

/// On-disk document layout.
#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    entries: Entries,
}

/// Store persisted as one JSON file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<Entries>,
}

impl JsonFileStore {
    /// Open the store at `path`. Unreadable or outdated files start empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = load_entries(&path);
        debug!(path = %path.display(), entries = entries.0.len(), "opened json store");
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, entries: &Entries, key: &str, op: &'static str) -> StoreResult<()> {
        let document = StoreDocument {
            version: STORE_VERSION,
            entries: entries.clone(),
        };
        let json = serde_json::to_string_pretty(&document)?;
        let io_err = |source: io::Error| StoreError::Io {
            op,
            key: key.to_string(),
            source,
        };
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::write(&self.path, json).await.map_err(io_err)
    }
}

fn load_entries(path: &Path) -> Entries {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return Entries::default(),
    };
    let document: StoreDocument = match serde_json::from_str(&content) {
        Ok(d) => d,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "store file unreadable, starting empty");
            return Entries::default();
        }
    };
    if document.version != STORE_VERSION {
        warn!(
            path = %path.display(),
            version = document.version,
            "store file version mismatch, starting empty"
        );
        return Entries::default();
    }
    document.entries
}

#[async_trait]
impl KvStore for JsonFileStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.entries.lock().await.get(key)
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut entries = self.entries.lock().await;
        entries.set(key, value);
        self.persist(&entries, key, "set").await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut entries = self.entries.lock().await;
        if entries.delete(key) {
            self.persist(&entries, key, "delete").await?;
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.entries.lock().await.exists(key))
    }

    async fn append_to_set(&self, set_key: &str, value: &str) -> StoreResult<()> {
        let mut entries = self.entries.lock().await;
        if entries.append_to_set(set_key, value)? {
            self.persist(&entries, set_key, "append").await?;
        }
        Ok(())
    }

    async fn read_set(&self, set_key: &str) -> StoreResult<Vec<String>> {
        self.entries.lock().await.read_set(set_key)
    }
}
