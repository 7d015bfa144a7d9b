//! Byte storage addressed by logical path.
//!
//! Source images and derived variants live in two separate [`Storage`]
//! instances. Paths are `/`-separated and relative; they never escape the
//! storage root.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("invalid storage path: {0}")]
    InvalidPath(String),
    #[error("storage {op} failed for {path}: {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    fn io(op: &'static str, path: &str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            StorageError::NotFound(path.to_string())
        } else {
            StorageError::Io {
                op,
                path: path.to_string(),
                source,
            }
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Byte-addressable storage. Implementations must be safe for concurrent use.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn open(&self, path: &str) -> StorageResult<Bytes>;

    /// Write `content` at `path`, replacing any previous bytes.
    async fn save(&self, path: &str, content: Bytes) -> StorageResult<()>;

    /// Remove `path`. Missing files are [`StorageError::NotFound`].
    async fn delete(&self, path: &str) -> StorageResult<()>;

    async fn exists(&self, path: &str) -> StorageResult<bool>;
}

/// Storage rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a logical path to a file under the root, refusing traversal.
    fn resolve(&self, path: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(path);
        let clean = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || !clean {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn open(&self, path: &str) -> StorageResult<Bytes> {
        let file = self.resolve(path)?;
        let data = fs::read(&file)
            .await
            .map_err(|e| StorageError::io("open", path, e))?;
        Ok(Bytes::from(data))
    }

    async fn save(&self, path: &str, content: Bytes) -> StorageResult<()> {
        let file = self.resolve(path)?;
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io("save", path, e))?;
        }
        // Concurrent writers of one path each rename a complete file; last wins
        let staging = file.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        fs::write(&staging, &content)
            .await
            .map_err(|e| StorageError::io("save", path, e))?;
        if let Err(e) = fs::rename(&staging, &file).await {
            let _ = fs::remove_file(&staging).await;
            return Err(StorageError::io("save", path, e));
        }
        debug!(path = %path, size_bytes = content.len(), "saved file");
        Ok(())
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        let file = self.resolve(path)?;
        fs::remove_file(&file)
            .await
            .map_err(|e| StorageError::io("delete", path, e))
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let file = self.resolve(path)?;
        fs::try_exists(&file)
            .await
            .map_err(|e| StorageError::io("exists", path, e))
    }
}

/// In-memory storage for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: RwLock<HashMap<String, Bytes>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.files.read().await.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn open(&self, path: &str) -> StorageResult<Bytes> {
        self.files
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn save(&self, path: &str, content: Bytes) -> StorageResult<()> {
        self.files.write().await.insert(path.to_string(), content);
        Ok(())
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        self.files
            .write()
            .await
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        Ok(self.files.read().await.contains_key(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn fs_save_creates_parent_directories() {
        let tmp = TempDir::new().unwrap();
        let storage = FsStorage::new(tmp.path());

        storage
            .save("ab/cd/key.jpg", Bytes::from_static(b"data"))
            .await
            .unwrap();

        assert!(tmp.path().join("ab/cd/key.jpg").exists());
        assert!(storage.exists("ab/cd/key.jpg").await.unwrap());
        assert_eq!(
            storage.open("ab/cd/key.jpg").await.unwrap().as_ref(),
            b"data"
        );
    }

    #[tokio::test]
    async fn fs_concurrent_saves_leave_one_complete_file() {
        let tmp = TempDir::new().unwrap();
        let storage = FsStorage::new(tmp.path());

        let (a, b) = tokio::join!(
            storage.save("k.png", Bytes::from(vec![1u8; 4096])),
            storage.save("k.png", Bytes::from(vec![2u8; 4096]))
        );
        a.unwrap();
        b.unwrap();

        let data = storage.open("k.png").await.unwrap();
        assert_eq!(data.len(), 4096);
        assert!(data.iter().all(|&b| b == data[0]));
        let names: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec!["k.png"]);
    }

    #[tokio::test]
    async fn fs_missing_file_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let storage = FsStorage::new(tmp.path());

        assert!(!storage.exists("nope.png").await.unwrap());
        assert!(storage.open("nope.png").await.unwrap_err().is_not_found());
        assert!(storage.delete("nope.png").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn fs_delete_removes_file() {
        let tmp = TempDir::new().unwrap();
        let storage = FsStorage::new(tmp.path());
        storage.save("a.png", Bytes::from_static(b"x")).await.unwrap();

        storage.delete("a.png").await.unwrap();
        assert!(!storage.exists("a.png").await.unwrap());
    }

    #[tokio::test]
    async fn fs_rejects_traversal() {
        let tmp = TempDir::new().unwrap();
        let storage = FsStorage::new(tmp.path().join("root"));

        for bad in ["../escape.png", "a/../../b.png", "/etc/passwd", ""] {
            let err = storage
                .save(bad, Bytes::from_static(b"x"))
                .await
                .unwrap_err();
            assert!(
                matches!(err, StorageError::InvalidPath(_)),
                "{bad} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn memory_storage_roundtrip() {
        let storage = MemoryStorage::new();
        assert!(storage.is_empty().await);

        storage.save("k", Bytes::from_static(b"v")).await.unwrap();
        assert!(storage.exists("k").await.unwrap());
        assert_eq!(storage.open("k").await.unwrap().as_ref(), b"v");
        assert_eq!(storage.len().await, 1);

        storage.delete("k").await.unwrap();
        assert!(storage.open("k").await.unwrap_err().is_not_found());
        assert!(storage.delete("k").await.unwrap_err().is_not_found());
    }
}
