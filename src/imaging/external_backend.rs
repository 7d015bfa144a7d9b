//! External-process backend (gifsicle-compatible command line).
//!
//! Supports only Resize, Thumbnail and UploadResize; everything else keeps
//! the trait default and answers NotImplemented so the engine moves on to the
//! next candidate.
//!
//! The source bytes are written to the child's stdin while stdout and stderr
//! are drained, all under one timeout. The child is spawned with
//! `kill_on_drop`, so a timeout or any early return reaps it.

use super::backend::{BackendError, ImageBackend, Resized};
use super::calculations::{
    CropBox, complete_dimensions, compute_crop, needs_resize, upload_target,
};
use super::params::TransformOptions;
use crate::image_file::ImageFile;
use async_trait::async_trait;
use bytes::Bytes;
use image::ImageReader;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

pub const DEFAULT_PROGRAM: &str = "gifsicle";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// `WxH` geometry; a zero side is written as `_` (keep aspect ratio).
fn geometry(width: u32, height: u32) -> String {
    let side = |v: u32| {
        if v == 0 {
            "_".to_string()
        } else {
            v.to_string()
        }
    };
    format!("{}x{}", side(width), side(height))
}

/// Arguments for a plain resize.
pub fn resize_args(width: u32, height: u32) -> Vec<String> {
    vec!["--resize".to_string(), geometry(width, height)]
}

/// Arguments for a thumbnail: crop window first, then the resize.
pub fn thumbnail_args(crop: CropBox, width: u32, height: u32) -> Vec<String> {
    vec![
        "--crop".to_string(),
        crop.to_geometry(),
        "--resize".to_string(),
        geometry(width, height),
    ]
}

/// Find an executable by name on `PATH`, or check an explicit path.
pub fn locate(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|p| p.is_file())
}

/// Read only the header of an encoded image.
fn read_dimensions(bytes: &[u8]) -> Result<(u32, u32), BackendError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_dimensions()
        .map_err(|e| BackendError::Decode(e.to_string()))
}

#[derive(Debug, Clone)]
pub struct ExternalBackend {
    program: PathBuf,
    timeout: Duration,
}

impl ExternalBackend {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Run the program with `args`, feeding `input` on stdin.
    ///
    /// A non-zero exit becomes [`BackendError::Subprocess`] carrying stderr
    /// verbatim. Exceeding the timeout kills the child.
    pub async fn run(&self, args: &[String], input: &Bytes) -> Result<Bytes, BackendError> {
        debug!(program = %self.program.display(), ?args, "spawning external backend");

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| BackendError::Io(std::io::Error::other("child stdin not captured")))?;
        let input = input.clone();
        let feed = async move {
            let written = stdin.write_all(&input).await;
            // Closing stdin signals end of input
            drop(stdin);
            written
        };

        let (written, output) = tokio::time::timeout(self.timeout, async move {
            tokio::join!(feed, child.wait_with_output())
        })
        .await
        .map_err(|_| {
            warn!(
                program = %self.program.display(),
                timeout = ?self.timeout,
                "external backend timed out"
            );
            BackendError::Timeout(self.timeout)
        })?;

        let output = output?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            warn!(
                program = %self.program.display(),
                status = ?output.status.code(),
                stderr = %stderr.trim_end(),
                "external backend failed"
            );
            return Err(BackendError::Subprocess {
                status: output.status.code(),
                stderr,
            });
        }
        // A clean exit that did not read all of stdin is still an input failure
        written?;

        Ok(Bytes::from(output.stdout))
    }
}

impl Default for ExternalBackend {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

#[async_trait]
impl ImageBackend for ExternalBackend {
    fn name(&self) -> &'static str {
        "external"
    }

    async fn resize(
        &self,
        image: &ImageFile,
        opts: &TransformOptions,
    ) -> Result<Bytes, BackendError> {
        self.run(&resize_args(opts.width, opts.height), &image.source)
            .await
    }

    async fn thumbnail(
        &self,
        image: &ImageFile,
        opts: &TransformOptions,
    ) -> Result<Bytes, BackendError> {
        let source = read_dimensions(&image.source)?;
        let (width, height) = complete_dimensions(source, (opts.width, opts.height));
        let crop = compute_crop(source, (width, height));
        self.run(&thumbnail_args(crop, width, height), &image.source)
            .await
    }

    async fn upload_resize(
        &self,
        image: &ImageFile,
        _opts: &TransformOptions,
        max_dimension: u32,
    ) -> Result<Resized, BackendError> {
        let source = read_dimensions(&image.source)?;
        let (width, height) = upload_target(source, max_dimension);
        if !needs_resize(source, (width, height), false) {
            return Ok(Resized {
                content: image.source.clone(),
                width: source.0,
                height: source.1,
            });
        }
        let content = self
            .run(&resize_args(width, height), &image.source)
            .await?;
        // The program's output is opaque; decode it to learn the real size
        let (width, height) = read_dimensions(&content)?;
        Ok(Resized {
            content,
            width,
            height,
        })
    }
}
