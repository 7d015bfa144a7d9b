//! Cache and consistency layer.
//!
//! The [`Processor`] sits between callers and the [`Engine`]. For a request
//! carrying a cache key it:
//!
//! 1. Short-circuits conditional requests to [`Outcome::NotModified`].
//! 2. Looks the key up in the [`KvStore`] and serves the mapped file from the
//!    destination [`Storage`]. A mapping whose file has disappeared counts as
//!    a miss, not an error.
//! 3. On a miss, loads the source, runs the engine, and persists the result
//!    under a sharded path, either before returning or in a detached task.
//! 4. Optionally records the new key in the source's children set, so that
//!    [`Processor::delete`] can cascade.
//!
//! # Consistency caveats
//!
//! - Concurrent misses on one key are not deduplicated. Each regenerates and
//!   writes the same destination path; the last write wins.
//! - With [`Persistence::Async`] the key→path mapping may not be visible to
//!   the next request, which may regenerate again. Await the returned
//!   [`PersistHandle`] for read-after-write.
//! - Cascade delete is not atomic. It stops at the first child that fails;
//!   children already removed stay removed, the rest and the children set are
//!   left in place.

use crate::config::{ImgfitConfig, ShardConfig};
use crate::engine::{Engine, EngineError, EngineOperation};
use crate::hash::{children_key, shard_path};
use crate::image_file::{ETAG_HEADER, ImageFile};
use crate::imaging::TransformOptions;
use crate::storage::{FsStorage, Storage, StorageError};
use crate::store::{JsonFileStore, KvStore, StoreError};
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("source file does not exist: {0}")]
    SourceNotFound(String),
    #[error("image {0} has no cache key")]
    MissingKey(String),
}

/// When a regenerated file is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Persistence {
    /// Write file and mapping before returning.
    #[default]
    Sync,
    /// Return immediately; write in a detached task.
    Async,
}

/// Completion handle of a background write.
///
/// Dropping it does not cancel the write. Failures are logged by the task
/// itself and are not reported here.
#[derive(Debug)]
pub struct PersistHandle(JoinHandle<()>);

impl PersistHandle {
    /// Wait until the background write has finished.
    pub async fn wait(self) {
        if let Err(e) = self.0.await {
            error!(error = %e, "background persistence task panicked");
        }
    }
}

/// Result of [`Processor::process`].
#[derive(Debug)]
pub enum Outcome {
    /// The client's copy is current; nothing was loaded or generated.
    NotModified,
    /// Served from the destination storage.
    Cached(ImageFile),
    /// Regenerated (or passed through when there was nothing to apply).
    Fresh {
        image: ImageFile,
        /// Set when persistence runs in the background.
        persist: Option<PersistHandle>,
    },
}

impl Outcome {
    pub fn is_not_modified(&self) -> bool {
        matches!(self, Outcome::NotModified)
    }

    pub fn image(&self) -> Option<&ImageFile> {
        match self {
            Outcome::NotModified => None,
            Outcome::Cached(image) | Outcome::Fresh { image, .. } => Some(image),
        }
    }

    pub fn into_image(self) -> Option<ImageFile> {
        match self {
            Outcome::NotModified => None,
            Outcome::Cached(image) | Outcome::Fresh { image, .. } => Some(image),
        }
    }
}

/// One cache lookup / regeneration request.
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub key: String,
    /// Source path in the source storage.
    pub path: String,
    /// Alternatives tried in order; the first that succeeds is used.
    pub candidates: Vec<EngineOperation>,
    /// Skip the conditional checks and the store lookup.
    pub force: bool,
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<String>,
    /// Mutating requests never short-circuit on `If-None-Match`.
    pub is_mutation: bool,
    /// Read the bytes of a cached file, or only check that it exists.
    pub load: bool,
    /// Overrides the processor's default persistence mode.
    pub persistence: Option<Persistence>,
}

impl ProcessRequest {
    pub fn new(
        key: impl Into<String>,
        path: impl Into<String>,
        candidates: Vec<EngineOperation>,
    ) -> Self {
        Self {
            key: key.into(),
            path: path.into(),
            candidates,
            force: false,
            if_none_match: None,
            if_modified_since: None,
            is_mutation: false,
            load: true,
            persistence: None,
        }
    }
}

/// Behaviour switches, usually taken from [`ImgfitConfig`].
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    pub shard: ShardConfig,
    pub enable_cascade_delete: bool,
    pub persistence: Persistence,
    pub upload_max_dimension: u32,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            shard: ShardConfig::default(),
            enable_cascade_delete: false,
            persistence: Persistence::Sync,
            upload_max_dimension: 2000,
        }
    }
}

impl From<&ImgfitConfig> for ProcessorOptions {
    fn from(config: &ImgfitConfig) -> Self {
        Self {
            shard: config.shard.clone(),
            enable_cascade_delete: config.options.enable_cascade_delete,
            persistence: if config.options.async_persistence {
                Persistence::Async
            } else {
                Persistence::Sync
            },
            upload_max_dimension: config.engine.upload_max_dimension,
        }
    }
}

#[derive(Clone)]
pub struct Processor {
    engine: Arc<Engine>,
    source: Arc<dyn Storage>,
    destination: Arc<dyn Storage>,
    store: Arc<dyn KvStore>,
    options: ProcessorOptions,
}

impl Processor {
    pub fn new(
        engine: Arc<Engine>,
        source: Arc<dyn Storage>,
        destination: Arc<dyn Storage>,
        store: Arc<dyn KvStore>,
        options: ProcessorOptions,
    ) -> Self {
        Self {
            engine,
            source,
            destination,
            store,
            options,
        }
    }

    /// Filesystem storages, JSON store, and engine as configured.
    pub fn from_config(config: &ImgfitConfig) -> Self {
        Self::new(
            Arc::new(Engine::from_config(&config.engine)),
            Arc::new(FsStorage::new(&config.storage.source)),
            Arc::new(FsStorage::new(&config.storage.destination)),
            Arc::new(JsonFileStore::open(&config.store.path)),
            ProcessorOptions::from(config),
        )
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn options(&self) -> &ProcessorOptions {
        &self.options
    }

    /// Destination path for a derived file with extension `ext`.
    pub fn shard_filename(&self, key: &str, ext: &str) -> String {
        let shard = &self.options.shard;
        shard_path(key, shard.width, shard.depth, shard.rest_only, ext)
    }

    /// Serve `request.key` from the cache, regenerating it on a miss.
    pub async fn process(&self, request: ProcessRequest) -> Result<Outcome, ProcessError> {
        let key = request.key.as_str();

        if !request.force
            && !request.is_mutation
            && request.if_none_match.as_deref() == Some(key)
        {
            info!(key = %key, "client copy matches key, not modified");
            return Ok(Outcome::NotModified);
        }

        if !request.force
            && let Some(since) = &request.if_modified_since
            && self.store.exists(key).await?
        {
            info!(key = %key, modified_since = %since, "key already in store, not modified");
            return Ok(Outcome::NotModified);
        }

        if request.force {
            info!(key = %key, "force set, key will be regenerated");
        } else {
            match self.store.get(key).await? {
                Some(filepath) => {
                    debug!(key = %key, filepath = %filepath, "key found in store");
                    match self.file_from_storage(key, &filepath, request.load).await {
                        Ok(image) => return Ok(Outcome::Cached(image)),
                        Err(e) if e.is_not_found() => {
                            warn!(
                                key = %key,
                                filepath = %filepath,
                                "mapped file is missing, regenerating"
                            );
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                None => debug!(key = %key, "key not found in store"),
            }
        }

        self.regenerate(request).await
    }

    /// Load (or only check) a derived file and tag it with its key.
    async fn file_from_storage(
        &self,
        key: &str,
        filepath: &str,
        load: bool,
    ) -> Result<ImageFile, StorageError> {
        let mut image = if load {
            ImageFile::new(filepath, self.destination.open(filepath).await?)
        } else {
            if !self.destination.exists(filepath).await? {
                return Err(StorageError::NotFound(filepath.to_string()));
            }
            ImageFile::reference(filepath, key)
        };
        image.key = Some(key.to_string());
        image.set_etag(key);
        Ok(image)
    }

    async fn regenerate(&self, request: ProcessRequest) -> Result<Outcome, ProcessError> {
        let ProcessRequest {
            key,
            path,
            candidates,
            persistence,
            ..
        } = request;

        if !self.source.exists(&path).await? {
            return Err(ProcessError::SourceNotFound(path));
        }
        let mut image = ImageFile::new(path.as_str(), self.source.open(&path).await?);

        if candidates.is_empty() {
            // Nothing to apply: serve the source as is, nothing to persist
            image.key = Some(key.clone());
            image.set_etag(&key);
            return Ok(Outcome::Fresh {
                image,
                persist: None,
            });
        }

        self.engine.transform(&mut image, &candidates).await?;
        image.filepath = self.shard_filename(&key, image.format());
        image.key = Some(key.clone());
        image.set_etag(&key);
        info!(key = %key, filepath = %image.filepath, source = %path, "regenerated");

        let persist = match persistence.unwrap_or(self.options.persistence) {
            Persistence::Sync => {
                self.store_image(&path, &image).await?;
                None
            }
            Persistence::Async => {
                let this = self.clone();
                let stored = image.clone();
                Some(PersistHandle(tokio::spawn(async move {
                    if let Err(e) = this.store_image(&path, &stored).await {
                        error!(
                            key = ?stored.key,
                            filepath = %stored.filepath,
                            error = %e,
                            "background persistence failed"
                        );
                    }
                })))
            }
        };

        Ok(Outcome::Fresh { image, persist })
    }

    /// Persist a derived image: bytes to the destination storage, key→path
    /// to the store, and (if enabled) the key into the source's children set.
    pub async fn store_image(&self, source_path: &str, image: &ImageFile) -> Result<(), ProcessError> {
        let key = image
            .key
            .as_deref()
            .ok_or_else(|| ProcessError::MissingKey(image.filepath.clone()))?;

        self.destination
            .save(&image.filepath, image.content().clone())
            .await?;
        debug!(filepath = %image.filepath, "saved file to storage");

        self.store.set(key, &image.filepath).await?;
        debug!(key = %key, filepath = %image.filepath, "saved key to store");

        if self.options.enable_cascade_delete {
            let set = children_key(source_path);
            self.store.append_to_set(&set, key).await?;
            debug!(set = %set, key = %key, source = %source_path, "recorded child key");
        }
        Ok(())
    }

    /// Store an upload under a fresh random name in the source storage.
    ///
    /// The image goes through the engine's upload resize first. Returns the
    /// stored file and its final dimensions.
    pub async fn upload(
        &self,
        filename: &str,
        content: Bytes,
    ) -> Result<(ImageFile, u32, u32), ProcessError> {
        let name = match Path::new(filename).extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{}.{}", uuid::Uuid::new_v4(), ext),
            None => uuid::Uuid::new_v4().to_string(),
        };
        let mut image = ImageFile::new(name.as_str(), content);

        let format = image
            .image_format()
            .ok_or_else(|| EngineError::NoBackendAvailable(image.content_type()))?;
        let options = TransformOptions {
            format,
            quality: self.engine.quality(),
            ..TransformOptions::default()
        };

        let (width, height) = self
            .engine
            .upload_transform(&mut image, &options, self.options.upload_max_dimension)
            .await?;

        self.source.save(&name, image.content().clone()).await?;
        info!(filename = %filename, stored_as = %name, width, height, "upload stored");
        Ok((image, width, height))
    }

    /// Delete a source file and, through its children set, every derived
    /// file recorded for it. Returns the number of children removed.
    ///
    /// Not atomic: the first failing child aborts the deletion. Children
    /// removed before it stay removed; the set and the remaining children are
    /// kept.
    pub async fn delete(&self, path: &str) -> Result<usize, ProcessError> {
        info!(path = %path, "deleting file on source storage");
        if !self.source.exists(path).await? {
            info!(path = %path, "file does not exist on source storage");
            return Err(ProcessError::SourceNotFound(path.to_string()));
        }
        self.source.delete(path).await?;

        let set = children_key(path);
        if !self.store.exists(&set).await? {
            debug!(set = %set, "no children set for source");
            return Ok(0);
        }

        let children = self.store.read_set(&set).await?;
        for child in &children {
            self.delete_child(child).await?;
        }

        self.store.delete(&set).await?;
        info!(set = %set, children = children.len(), "deleted children set");
        Ok(children.len())
    }

    /// Remove one derived variant: its file (when mapped) and its key.
    ///
    /// A mapped file that is already gone is not an error.
    pub async fn delete_child(&self, key: &str) -> Result<(), ProcessError> {
        if let Some(filepath) = self.store.get(key).await? {
            match self.destination.delete(&filepath).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    warn!(key = %key, filepath = %filepath, "child file already gone");
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.store.delete(key).await?;
        info!(key = %key, "deleted child");
        Ok(())
    }

    pub async fn get_key(&self, key: &str) -> Result<Option<String>, ProcessError> {
        Ok(self.store.get(key).await?)
    }

    pub async fn key_exists(&self, key: &str) -> Result<bool, ProcessError> {
        Ok(self.store.exists(key).await?)
    }

    /// Whether `name` exists in the source storage.
    pub async fn file_exists(&self, name: &str) -> Result<bool, ProcessError> {
        Ok(self.source.exists(name).await?)
    }

    /// Read `name` from the source storage.
    pub async fn open_file(&self, name: &str) -> Result<Bytes, ProcessError> {
        Ok(self.source.open(name).await?)
    }
}

/// The ETag a processed file carries, if any.
pub fn etag(image: &ImageFile) -> Option<&str> {
    image.headers.get(ETAG_HEADER).map(String::as_str)
}
