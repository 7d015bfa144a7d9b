//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait is the capability set every backend is asked
//! about: resize, thumbnail, fit, rotate, flip, blur, flat, and the ingest-time
//! upload resize. A backend that cannot perform an operation answers
//! [`BackendError::NotImplemented`]; the [`Engine`](crate::engine::Engine)
//! treats that as "try the next candidate", never as a failure.
//!
//! | Operation | [`RustBackend`](super::RustBackend) | [`ExternalBackend`](super::ExternalBackend) |
//! |---|---|---|
//! | Resize | yes | yes |
//! | Thumbnail | yes | yes |
//! | UploadResize | yes | yes |
//! | Fit, Rotate, Flip, Blur, Flat | yes | NotImplemented |

use super::params::{Operation, TransformOptions};
use crate::image_file::ImageFile;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("operation {0} is not implemented by this backend")]
    NotImplemented(Operation),
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("failed to encode image: {0}")]
    Encode(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// Non-zero exit; `stderr` is the diagnostic output, verbatim.
    #[error("{stderr}")]
    Subprocess { status: Option<i32>, stderr: String },
    #[error("subprocess timed out after {0:?}")]
    Timeout(Duration),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("processing task failed: {0}")]
    Task(String),
}

impl BackendError {
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, BackendError::NotImplemented(_))
    }
}

/// Bytes produced by an upload resize, with the dimensions they decode to.
#[derive(Debug, Clone, PartialEq)]
pub struct Resized {
    pub content: Bytes,
    pub width: u32,
    pub height: u32,
}

/// Trait for image processing backends.
///
/// Every method reads from `image.source` and returns the transformed bytes.
/// Unsupported operations keep the default body and answer
/// [`BackendError::NotImplemented`].
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Short name used in logs and in the engine's `Display`.
    fn name(&self) -> &'static str;

    async fn resize(
        &self,
        _image: &ImageFile,
        _opts: &TransformOptions,
    ) -> Result<Bytes, BackendError> {
        Err(BackendError::NotImplemented(Operation::Resize))
    }

    /// Center crop to the destination aspect ratio, then resize.
    async fn thumbnail(
        &self,
        _image: &ImageFile,
        _opts: &TransformOptions,
    ) -> Result<Bytes, BackendError> {
        Err(BackendError::NotImplemented(Operation::Thumbnail))
    }

    /// Scale down to fit inside the destination box, keeping the aspect ratio.
    async fn fit(
        &self,
        _image: &ImageFile,
        _opts: &TransformOptions,
    ) -> Result<Bytes, BackendError> {
        Err(BackendError::NotImplemented(Operation::Fit))
    }

    async fn rotate(
        &self,
        _image: &ImageFile,
        _opts: &TransformOptions,
    ) -> Result<Bytes, BackendError> {
        Err(BackendError::NotImplemented(Operation::Rotate))
    }

    async fn flip(
        &self,
        _image: &ImageFile,
        _opts: &TransformOptions,
    ) -> Result<Bytes, BackendError> {
        Err(BackendError::NotImplemented(Operation::Flip))
    }

    async fn blur(
        &self,
        _image: &ImageFile,
        _opts: &TransformOptions,
    ) -> Result<Bytes, BackendError> {
        Err(BackendError::NotImplemented(Operation::Blur))
    }

    async fn flat(
        &self,
        _image: &ImageFile,
        _opts: &TransformOptions,
    ) -> Result<Bytes, BackendError> {
        Err(BackendError::NotImplemented(Operation::Flat))
    }

    /// Ingest-time resize capped at `max_dimension` on the longer edge.
    ///
    /// Ignores any destination size in `opts`; only format and quality apply.
    async fn upload_resize(
        &self,
        image: &ImageFile,
        opts: &TransformOptions,
        max_dimension: u32,
    ) -> Result<Resized, BackendError>;

    /// Dispatch one operation to the matching method.
    async fn apply(
        &self,
        operation: Operation,
        image: &ImageFile,
        opts: &TransformOptions,
    ) -> Result<Bytes, BackendError> {
        match operation {
            Operation::Resize => self.resize(image, opts).await,
            Operation::Thumbnail => self.thumbnail(image, opts).await,
            Operation::Fit => self.fit(image, opts).await,
            Operation::Rotate => self.rotate(image, opts).await,
            Operation::Flip => self.flip(image, opts).await,
            Operation::Blur => self.blur(image, opts).await,
            Operation::Flat => self.flat(image, opts).await,
        }
    }
}
