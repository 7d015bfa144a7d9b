//! Shared test utilities for the imgfit test suite.
//!
//! Image synthesis (encoded PNG/JPEG/GIF bytes of a given size), a processor
//! harness wired to a [`MockBackend`] and in-memory storage, and a storage
//! wrapper that injects delete failures.
//!
//! # Usage
//!
//! ```rust,ignore
//! use crate::test_helpers::*;
//!
//! let h = mock_harness(ProcessorOptions::default());
//! h.source.save("cat.png", png_bytes(40, 20)).await.unwrap();
//! h.destination.fail_deletes_of("k.png").await;
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, DynamicImage, Frame, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::engine::{BackendEntry, Engine};
use crate::imaging::backend::tests::MockBackend;
use crate::imaging::{Operation, rust_backend};
use crate::processor::{Processor, ProcessorOptions};
use crate::storage::{MemoryStorage, Storage, StorageError, StorageResult};
use crate::store::MemoryStore;

// =========================================================================
// Image synthesis
// =========================================================================

fn gradient(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255])
    })
}

/// Encoded PNG of the given size.
pub fn png_bytes(width: u32, height: u32) -> Bytes {
    rust_backend::encode(
        &DynamicImage::ImageRgba8(gradient(width, height)),
        ImageFormat::Png,
        90,
    )
    .unwrap()
}

/// Encoded JPEG of the given size.
pub fn jpeg_bytes(width: u32, height: u32) -> Bytes {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    rust_backend::encode(&DynamicImage::ImageRgb8(img), ImageFormat::Jpeg, 90).unwrap()
}

/// Looping GIF with `frames` solid frames of distinct colours.
pub fn animated_gif(width: u32, height: u32, frames: usize) -> Bytes {
    let mut out = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut out);
        encoder.set_repeat(Repeat::Infinite).unwrap();
        for i in 0..frames {
            let shade = (i * 80 % 256) as u8;
            let buffer = RgbaImage::from_pixel(width, height, Rgba([shade, 255 - shade, 0, 255]));
            encoder
                .encode_frame(Frame::from_parts(
                    buffer,
                    0,
                    0,
                    Delay::from_numer_denom_ms(100, 1),
                ))
                .unwrap();
        }
    }
    Bytes::from(out)
}

/// Width and height of encoded image bytes.
pub fn decode_dimensions(bytes: &Bytes) -> (u32, u32) {
    let img = image::load_from_memory(bytes).unwrap();
    (img.width(), img.height())
}

// =========================================================================
// Processor harness
// =========================================================================

/// A processor over a mock backend named `m`, plus handles to every part.
///
/// The backend accepts PNG, JPEG and GIF, and fails `blur` with a decode
/// error.
pub struct MockHarness {
    pub processor: Processor,
    pub backend: Arc<MockBackend>,
    pub source: Arc<MemoryStorage>,
    pub destination: Arc<FailingStorage>,
    pub store: Arc<MemoryStore>,
}

pub fn mock_harness(options: ProcessorOptions) -> MockHarness {
    let backend = Arc::new(MockBackend::new("m").failing_on(&[Operation::Blur]));
    let engine = Engine::new(vec![BackendEntry::new(
        backend.clone(),
        0,
        vec![
            "image/png".to_string(),
            "image/jpeg".to_string(),
            "image/gif".to_string(),
        ],
    )]);
    let source = Arc::new(MemoryStorage::new());
    let destination = Arc::new(FailingStorage::new());
    let store = Arc::new(MemoryStore::new());

    let processor = Processor::new(
        Arc::new(engine),
        source.clone(),
        destination.clone(),
        store.clone(),
        options,
    );
    MockHarness {
        processor,
        backend,
        source,
        destination,
        store,
    }
}

// =========================================================================
// Fault injection
// =========================================================================

/// In-memory storage whose deletes fail for chosen paths.
#[derive(Debug, Default)]
pub struct FailingStorage {
    inner: MemoryStorage,
    failing: Mutex<HashSet<String>>,
}

impl FailingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_deletes_of(&self, path: &str) {
        self.failing.lock().await.insert(path.to_string());
    }
}

#[async_trait]
impl Storage for FailingStorage {
    async fn open(&self, path: &str) -> StorageResult<Bytes> {
        self.inner.open(path).await
    }

    async fn save(&self, path: &str, content: Bytes) -> StorageResult<()> {
        self.inner.save(path, content).await
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        if self.failing.lock().await.contains(path) {
            return Err(StorageError::Io {
                op: "delete",
                path: path.to_string(),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "injected failure"),
            });
        }
        self.inner.delete(path).await
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        self.inner.exists(path).await
    }
}
