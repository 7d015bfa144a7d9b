//! The image value object passed between storage, engine, and cache layer.
//!
//! An [`ImageFile`] carries two byte slots. `source` is set on ingest and never
//! overwritten by a transform; `processed` holds the output of the last
//! successful transform. [`ImageFile::content`] is what gets written or served.

use bytes::Bytes;
use image::ImageFormat;
use std::collections::BTreeMap;
use std::path::Path;

/// Header carrying the cache key as a validator.
pub const ETAG_HEADER: &str = "ETag";

#[derive(Debug, Clone, Default)]
pub struct ImageFile {
    /// Original bytes as read from storage or upload.
    pub source: Bytes,
    /// Output of the last transform, if any.
    pub processed: Option<Bytes>,
    /// Logical path inside whichever storage owns the file.
    pub filepath: String,
    /// Cache key, set once the file represents a derived variant.
    pub key: Option<String>,
    pub headers: BTreeMap<String, String>,
    /// Output format requested for the derived variant.
    pub output_format: Option<ImageFormat>,
}

impl ImageFile {
    pub fn new(filepath: impl Into<String>, source: impl Into<Bytes>) -> Self {
        Self {
            source: source.into(),
            filepath: filepath.into(),
            ..Self::default()
        }
    }

    /// Metadata-only file: path and key, no bytes loaded.
    pub fn reference(filepath: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            filepath: filepath.into(),
            key: Some(key.into()),
            ..Self::default()
        }
    }

    /// Transformed bytes if present, otherwise the original.
    pub fn content(&self) -> &Bytes {
        self.processed.as_ref().unwrap_or(&self.source)
    }

    /// Format of the bytes this file represents.
    ///
    /// Resolution order: explicit output format, filepath extension, then a
    /// sniff of the source bytes.
    pub fn image_format(&self) -> Option<ImageFormat> {
        self.output_format
            .or_else(|| {
                Path::new(&self.filepath)
                    .extension()
                    .and_then(|e| e.to_str())
                    .and_then(ImageFormat::from_extension)
            })
            .or_else(|| image::guess_format(&self.source).ok())
    }

    /// MIME type used to pick a backend and to serve the file.
    pub fn content_type(&self) -> String {
        self.image_format()
            .map(|f| f.to_mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string())
    }

    /// File extension used when a derived variant is written.
    pub fn format(&self) -> &'static str {
        self.image_format().map(extension_for).unwrap_or("bin")
    }

    /// Last component of the filepath.
    pub fn filename(&self) -> &str {
        self.filepath
            .rsplit('/')
            .next()
            .unwrap_or(self.filepath.as_str())
    }

    pub fn set_etag(&mut self, key: &str) {
        self.headers.insert(ETAG_HEADER.to_string(), key.to_string());
    }
}

/// Canonical extension for a format (`jpg` rather than `jpeg`).
pub fn extension_for(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "jpg",
        ImageFormat::Png => "png",
        ImageFormat::Gif => "gif",
        ImageFormat::WebP => "webp",
        ImageFormat::Tiff => "tiff",
        ImageFormat::Bmp => "bmp",
        other => other.extensions_str().first().copied().unwrap_or("bin"),
    }
}

/// Parse a format name as used in config and on the command line.
pub fn parse_format(name: &str) -> Option<ImageFormat> {
    ImageFormat::from_extension(name.trim_start_matches('.'))
        .or_else(|| ImageFormat::from_mime_type(name))
}
