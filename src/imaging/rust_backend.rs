//! Pure Rust in-process backend.
//!
//! Decodes and encodes through the `image` crate and implements the whole
//! capability set.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, GIF, TIFF, WebP, BMP) | `image::ImageReader` with guessed format |
//! | Resize / Fit | `DynamicImage::resize_exact` with `Lanczos3` |
//! | Thumbnail | shared [`compute_crop`] + `crop_imm` + `resize_exact` |
//! | Rotate / Flip | `rotate90/180/270`, `fliph`, `flipv` |
//! | Blur | `DynamicImage::blur` |
//! | Flat | `imageops::overlay` onto a white canvas |
//! | Animated GIF | `GifDecoder::into_frames` → per-frame transform (rayon) → [`FixedPalette`] dither → `GifEncoder` |
//!
//! Static images are never upscaled implicitly: when the scale factor is ≥ 1
//! and `upscale` is off, the pixels are kept. The source bytes are returned
//! untouched if they are already in the requested format, otherwise they are
//! re-encoded at the original size.

use super::backend::{BackendError, ImageBackend, Resized};
use super::calculations::{
    complete_dimensions, compute_crop, fit_dimensions, needs_resize, upload_target,
};
use super::palette::FixedPalette;
use super::params::{FlipAxis, Rotation, TransformOptions};
use crate::image_file::ImageFile;
use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{
    AnimationDecoder, DynamicImage, Frame, GenericImageView, ImageDecoder, ImageFormat,
    ImageReader, Rgba, RgbaImage,
};
use rayon::prelude::*;
use std::io::Cursor;
use tracing::debug;

/// Content types the native backend accepts when no explicit backend
/// configuration is given.
pub const DEFAULT_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/tiff",
    "image/bmp",
];

/// Geometric transforms that share the scale-or-passthrough logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Geometry {
    Resize,
    Thumbnail,
    Fit,
}

impl Geometry {
    /// Final output dimensions for a source of the given size.
    fn output_dimensions(self, source: (u32, u32), dest: (u32, u32)) -> (u32, u32) {
        match self {
            Geometry::Resize | Geometry::Thumbnail => complete_dimensions(source, dest),
            Geometry::Fit => fit_dimensions(source, dest),
        }
    }

    fn apply(self, img: &DynamicImage, dest: (u32, u32)) -> DynamicImage {
        self.apply_exact(img, self.output_dimensions(img.dimensions(), dest))
    }

    /// Transform to already-resolved output dimensions.
    fn apply_exact(self, img: &DynamicImage, (w, h): (u32, u32)) -> DynamicImage {
        match self {
            Geometry::Resize | Geometry::Fit => img.resize_exact(w, h, FilterType::Lanczos3),
            Geometry::Thumbnail => {
                let crop = compute_crop(img.dimensions(), (w, h));
                img.crop_imm(crop.left, crop.top, crop.width, crop.height)
                    .resize_exact(w, h, FilterType::Lanczos3)
            }
        }
    }
}

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Run CPU-bound work off the async executor.
async fn blocking<T, F>(work: F) -> Result<T, BackendError>
where
    F: FnOnce() -> Result<T, BackendError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| BackendError::Task(e.to_string()))?
}

fn decode(source: &[u8]) -> Result<DynamicImage, BackendError> {
    ImageReader::new(Cursor::new(source))
        .with_guessed_format()
        .map_err(BackendError::Io)?
        .decode()
        .map_err(|e| BackendError::Decode(e.to_string()))
}

fn is_gif(source: &[u8]) -> bool {
    matches!(image::guess_format(source), Ok(ImageFormat::Gif))
}

/// Encode an image in the requested format.
pub(crate) fn encode(
    img: &DynamicImage,
    format: ImageFormat,
    quality: u32,
) -> Result<Bytes, BackendError> {
    let mut buf = Vec::new();
    match format {
        ImageFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100) as u8);
            DynamicImage::ImageRgb8(img.to_rgb8())
                .write_with_encoder(encoder)
                .map_err(|e| BackendError::Encode(e.to_string()))?;
        }
        ImageFormat::Png
        | ImageFormat::Gif
        | ImageFormat::WebP
        | ImageFormat::Tiff
        | ImageFormat::Bmp => {
            DynamicImage::ImageRgba8(img.to_rgba8())
                .write_to(&mut Cursor::new(&mut buf), format)
                .map_err(|e| BackendError::Encode(e.to_string()))?;
        }
        other => {
            return Err(BackendError::Encode(format!(
                "unsupported output format: {other:?}"
            )));
        }
    }
    Ok(Bytes::from(buf))
}

/// Static path: decode, transform unless that would upscale, re-encode.
fn transform_static(
    source: &Bytes,
    geometry: Geometry,
    opts: &TransformOptions,
) -> Result<Bytes, BackendError> {
    let img = decode(source)?;
    let dest = (opts.width, opts.height);
    if !needs_resize(img.dimensions(), dest, opts.upscale) {
        if image::guess_format(source).ok() == Some(opts.format) {
            debug!(?geometry, "no resize needed, returning source bytes");
            return Ok(source.clone());
        }
        debug!(?geometry, format = ?opts.format, "no resize needed, re-encoding only");
        return encode(&img, opts.format, opts.quality.value());
    }
    encode(&geometry.apply(&img, dest), opts.format, opts.quality.value())
}

/// Animated path: composite every frame onto a running canvas, transform each
/// canvas, re-quantize to the fixed palette, and re-encode.
///
/// Returns the source bytes and dimensions untouched when no resize is needed.
fn transform_animated(
    source: &Bytes,
    geometry: Geometry,
    dest: (u32, u32),
    upscale: bool,
) -> Result<Resized, BackendError> {
    let decoder = GifDecoder::new(Cursor::new(source.as_ref()))
        .map_err(|e| BackendError::Decode(e.to_string()))?;
    let (src_w, src_h) = decoder.dimensions();

    if !needs_resize((src_w, src_h), dest, upscale) {
        return Ok(Resized {
            content: source.clone(),
            width: src_w,
            height: src_h,
        });
    }

    let frames = decoder
        .into_frames()
        .collect_frames()
        .map_err(|e| BackendError::Decode(e.to_string()))?;

    // Frames may be partial deltas; accumulate them in order
    let mut canvas = RgbaImage::new(src_w, src_h);
    let mut composited = Vec::with_capacity(frames.len());
    for frame in &frames {
        imageops::overlay(
            &mut canvas,
            frame.buffer(),
            frame.left() as i64,
            frame.top() as i64,
        );
        composited.push((canvas.clone(), frame.delay()));
    }

    let (out_w, out_h) = geometry.output_dimensions((src_w, src_h), dest);
    let output: Vec<Frame> = composited
        .into_par_iter()
        .map(|(canvas, delay)| {
            let mut scaled = geometry
                .apply_exact(&DynamicImage::ImageRgba8(canvas), (out_w, out_h))
                .to_rgba8();
            imageops::dither(&mut scaled, &FixedPalette);
            Frame::from_parts(scaled, 0, 0, delay)
        })
        .collect();

    let mut buf = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut buf);
        encoder
            .set_repeat(Repeat::Infinite)
            .map_err(|e| BackendError::Encode(e.to_string()))?;
        encoder
            .encode_frames(output)
            .map_err(|e| BackendError::Encode(e.to_string()))?;
    }

    Ok(Resized {
        content: Bytes::from(buf),
        width: out_w,
        height: out_h,
    })
}

/// Pick the animated or static path for a geometric transform.
fn transform(
    source: Bytes,
    geometry: Geometry,
    opts: TransformOptions,
) -> Result<Bytes, BackendError> {
    if opts.format == ImageFormat::Gif && is_gif(&source) {
        let dest = (opts.width, opts.height);
        return Ok(transform_animated(&source, geometry, dest, opts.upscale)?.content);
    }
    transform_static(&source, geometry, &opts)
}

fn upload(
    source: Bytes,
    opts: TransformOptions,
    max_dimension: u32,
) -> Result<Resized, BackendError> {
    if opts.format == ImageFormat::Gif && is_gif(&source) {
        let decoder = GifDecoder::new(Cursor::new(source.as_ref()))
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        let target = upload_target(decoder.dimensions(), max_dimension);
        drop(decoder);
        return transform_animated(&source, Geometry::Resize, target, opts.upscale);
    }

    let img = decode(&source)?;
    let (src_w, src_h) = img.dimensions();
    let target = upload_target((src_w, src_h), max_dimension);

    // Only re-encode when the dimensions actually change
    if !needs_resize((src_w, src_h), target, opts.upscale) {
        return Ok(Resized {
            content: source,
            width: src_w,
            height: src_h,
        });
    }

    let resized = Geometry::Resize.apply(&img, target);
    let (width, height) = resized.dimensions();
    Ok(Resized {
        content: encode(&resized, opts.format, opts.quality.value())?,
        width,
        height,
    })
}

fn rotate(source: Bytes, opts: TransformOptions) -> Result<Bytes, BackendError> {
    let rotation = Rotation::try_from(opts.degree)?;
    let img = decode(&source)?;
    let rotated = match rotation {
        Rotation::Deg90 => img.rotate90(),
        Rotation::Deg180 => img.rotate180(),
        Rotation::Deg270 => img.rotate270(),
    };
    encode(&rotated, opts.format, opts.quality.value())
}

fn flip(source: Bytes, opts: TransformOptions) -> Result<Bytes, BackendError> {
    let axis: FlipAxis = opts.position.parse()?;
    let img = decode(&source)?;
    let flipped = match axis {
        FlipAxis::Horizontal => img.fliph(),
        FlipAxis::Vertical => img.flipv(),
    };
    encode(&flipped, opts.format, opts.quality.value())
}

fn blur(source: Bytes, opts: TransformOptions) -> Result<Bytes, BackendError> {
    let sigma = opts.blur_sigma();
    if sigma <= 0.0 {
        return Err(BackendError::InvalidParameter(
            "blur needs a positive sigma or width".into(),
        ));
    }
    let img = decode(&source)?;
    encode(&img.blur(sigma), opts.format, opts.quality.value())
}

fn flat(source: Bytes, opts: TransformOptions) -> Result<Bytes, BackendError> {
    let img = decode(&source)?;
    let (w, h) = img.dimensions();
    let mut canvas = RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255]));
    imageops::overlay(&mut canvas, &img.to_rgba8(), 0, 0);
    encode(
        &DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8()),
        opts.format,
        opts.quality.value(),
    )
}

#[async_trait]
impl ImageBackend for RustBackend {
    fn name(&self) -> &'static str {
        "native"
    }

    async fn resize(
        &self,
        image: &ImageFile,
        opts: &TransformOptions,
    ) -> Result<Bytes, BackendError> {
        let (source, opts) = (image.source.clone(), opts.clone());
        blocking(move || transform(source, Geometry::Resize, opts)).await
    }

    async fn thumbnail(
        &self,
        image: &ImageFile,
        opts: &TransformOptions,
    ) -> Result<Bytes, BackendError> {
        let (source, opts) = (image.source.clone(), opts.clone());
        blocking(move || transform(source, Geometry::Thumbnail, opts)).await
    }

    async fn fit(
        &self,
        image: &ImageFile,
        opts: &TransformOptions,
    ) -> Result<Bytes, BackendError> {
        let (source, opts) = (image.source.clone(), opts.clone());
        blocking(move || transform(source, Geometry::Fit, opts)).await
    }

    async fn rotate(
        &self,
        image: &ImageFile,
        opts: &TransformOptions,
    ) -> Result<Bytes, BackendError> {
        let (source, opts) = (image.source.clone(), opts.clone());
        blocking(move || rotate(source, opts)).await
    }

    async fn flip(
        &self,
        image: &ImageFile,
        opts: &TransformOptions,
    ) -> Result<Bytes, BackendError> {
        let (source, opts) = (image.source.clone(), opts.clone());
        blocking(move || flip(source, opts)).await
    }

    async fn blur(
        &self,
        image: &ImageFile,
        opts: &TransformOptions,
    ) -> Result<Bytes, BackendError> {
        let (source, opts) = (image.source.clone(), opts.clone());
        blocking(move || blur(source, opts)).await
    }

    async fn flat(
        &self,
        image: &ImageFile,
        opts: &TransformOptions,
    ) -> Result<Bytes, BackendError> {
        let (source, opts) = (image.source.clone(), opts.clone());
        blocking(move || flat(source, opts)).await
    }

    async fn upload_resize(
        &self,
        image: &ImageFile,
        opts: &TransformOptions,
        max_dimension: u32,
    ) -> Result<Resized, BackendError> {
        let (source, opts) = (image.source.clone(), opts.clone());
        blocking(move || upload(source, opts, max_dimension)).await
    }
}
