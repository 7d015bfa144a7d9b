//! Backend registry and transform dispatch.
//!
//! The [`Engine`] holds an immutable, weight-ordered list of backends, each
//! with the content types it accepts. It is built once at startup and then
//! only read, so it can be shared across tasks behind an `Arc` without
//! locking.
//!
//! ## Candidate fallback
//!
//! [`Engine::transform`] takes a list of candidate operations. They are
//! alternatives, not a pipeline: the first candidate a capable backend
//! completes wins and the rest are never attempted. A candidate that answers
//! [`BackendError::NotImplemented`] is skipped; any other error aborts the
//! call.

use crate::config::EngineConfig;
use crate::image_file::{ImageFile, parse_format};
use crate::imaging::external_backend::locate;
use crate::imaging::rust_backend::DEFAULT_MIME_TYPES;
use crate::imaging::{
    BackendError, ExternalBackend, ImageBackend, Operation, Quality, RustBackend,
    TransformOptions,
};
use image::ImageFormat;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no backend registered for content type {0}")]
    NoBackendAvailable(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("no operations requested")]
    NoOperations,
}

/// One candidate for [`Engine::transform`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOperation {
    pub operation: Operation,
    pub options: TransformOptions,
}

impl EngineOperation {
    pub fn new(operation: Operation, options: TransformOptions) -> Self {
        Self { operation, options }
    }
}

/// A registered backend with its priority and accepted content types.
pub struct BackendEntry {
    pub backend: Arc<dyn ImageBackend>,
    /// Lower weights are tried first.
    pub weight: i32,
    pub mimetypes: Vec<String>,
}

impl BackendEntry {
    pub fn new(backend: Arc<dyn ImageBackend>, weight: i32, mimetypes: Vec<String>) -> Self {
        Self {
            backend,
            weight,
            mimetypes,
        }
    }

    fn accepts(&self, content_type: &str) -> bool {
        self.mimetypes.iter().any(|m| m == content_type)
    }
}

pub struct Engine {
    backends: Vec<BackendEntry>,
    default_format: ImageFormat,
    format: Option<ImageFormat>,
    quality: Quality,
}

impl Engine {
    /// Build a registry, stable-sorted by ascending weight.
    pub fn new(mut backends: Vec<BackendEntry>) -> Self {
        backends.sort_by_key(|entry| entry.weight);
        Self {
            backends,
            default_format: ImageFormat::Jpeg,
            format: None,
            quality: Quality::default(),
        }
    }

    /// Format used when neither the request nor the source decides.
    pub fn with_default_format(mut self, format: ImageFormat) -> Self {
        self.default_format = format;
        self
    }

    /// Force every output to `format`.
    pub fn with_forced_format(mut self, format: Option<ImageFormat>) -> Self {
        self.format = format;
        self
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    /// Build from configuration.
    ///
    /// Without a `backends` table this is a single native backend over the
    /// built-in content types. The external backend is only registered when
    /// its program resolves.
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut entries = Vec::new();
        match &config.backends {
            None => entries.push(native_default()),
            Some(backends) => {
                if let Some(external) = &backends.external {
                    match locate(&external.path) {
                        Some(program) => entries.push(BackendEntry::new(
                            Arc::new(
                                ExternalBackend::new(program)
                                    .with_timeout(Duration::from_secs(external.timeout_secs)),
                            ),
                            external.weight,
                            external.mimetypes.clone(),
                        )),
                        None => warn!(
                            path = %external.path,
                            "external backend program not found, skipping"
                        ),
                    }
                }
                if let Some(native) = &backends.native {
                    entries.push(BackendEntry::new(
                        Arc::new(RustBackend::new()),
                        native.weight,
                        native.mimetypes.clone(),
                    ));
                }
            }
        }

        let default_format = parse_format(&config.default_format).unwrap_or(ImageFormat::Jpeg);
        let engine = Self::new(entries)
            .with_default_format(default_format)
            .with_forced_format(config.format.as_deref().and_then(parse_format))
            .with_quality(Quality::new(config.quality));
        info!(backends = %engine, "engine initialised");
        engine
    }

    /// Names of the registered backends in the order they are tried.
    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|e| e.backend.name()).collect()
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    /// Output format for a derived variant of `image`.
    ///
    /// A forced format wins, then the requested one, then the source's own
    /// format, then the default.
    pub fn output_format(&self, image: &ImageFile, requested: Option<ImageFormat>) -> ImageFormat {
        self.format
            .or(requested)
            .or_else(|| image.image_format())
            .unwrap_or(self.default_format)
    }

    /// First backend, by weight, that accepts `content_type`.
    pub fn resolve_backend(&self, content_type: &str) -> Result<&BackendEntry, EngineError> {
        self.backends
            .iter()
            .find(|entry| entry.accepts(content_type))
            .ok_or_else(|| EngineError::NoBackendAvailable(content_type.to_string()))
    }

    /// Ingest-time resize. Keeps `image.source`, sets `image.processed`, and
    /// returns the final dimensions.
    pub async fn upload_transform(
        &self,
        image: &mut ImageFile,
        options: &TransformOptions,
        max_dimension: u32,
    ) -> Result<(u32, u32), EngineError> {
        let content_type = image.content_type();
        let entry = self.resolve_backend(&content_type)?;
        debug!(
            backend = entry.backend.name(),
            content_type = %content_type,
            max_dimension,
            "upload resize"
        );

        let resized = entry
            .backend
            .upload_resize(image, options, max_dimension)
            .await?;
        image.processed = Some(resized.content);
        Ok((resized.width, resized.height))
    }

    /// Run the first candidate a capable backend completes.
    ///
    /// On success `image.processed` holds the output and `image.output_format`
    /// the candidate's format; `image.source` is never touched.
    pub async fn transform(
        &self,
        image: &mut ImageFile,
        candidates: &[EngineOperation],
    ) -> Result<(), EngineError> {
        let mut last_unsupported = None;

        for candidate in candidates {
            let content_type = image.content_type();
            let entry = self.resolve_backend(&content_type)?;
            let backend = entry.backend.name();

            match entry
                .backend
                .apply(candidate.operation, image, &candidate.options)
                .await
            {
                Ok(bytes) => {
                    debug!(
                        backend,
                        operation = %candidate.operation,
                        size_bytes = bytes.len(),
                        "transform done"
                    );
                    image.processed = Some(bytes);
                    image.output_format = Some(candidate.options.format);
                    return Ok(());
                }
                Err(BackendError::NotImplemented(op)) => {
                    debug!(backend, operation = %op, "not implemented, trying next candidate");
                    last_unsupported = Some(op);
                }
                Err(e) => return Err(e.into()),
            }
        }

        match last_unsupported {
            Some(op) => Err(BackendError::NotImplemented(op).into()),
            None => Err(EngineError::NoOperations),
        }
    }
}

fn native_default() -> BackendEntry {
    BackendEntry::new(
        Arc::new(RustBackend::new()),
        0,
        DEFAULT_MIME_TYPES.iter().map(|m| m.to_string()).collect(),
    )
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(vec![native_default()])
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.backend_names().join(" "))
    }
}
