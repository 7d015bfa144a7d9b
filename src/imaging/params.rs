//! Parameter types for image operations.
//!
//! These types describe *what* to do, not *how* to do it. They are the
//! interface between the [`Engine`](crate::engine::Engine) (which decides which
//! backend runs an operation) and the [`backend`](super::backend) adapters
//! (which do the actual pixel work).
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100, default 95). Clamped on construction.
//! - [`Operation`]: The fixed capability set every backend is asked about.
//! - [`Rotation`] / [`FlipAxis`]: Validated rotate/flip parameters.
//! - [`TransformOptions`]: Full parameter set shared by all operations.

use super::backend::BackendError;
use image::ImageFormat;
use std::fmt;
use std::str::FromStr;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(95)
    }
}

/// A single transform a backend may (or may not) be able to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Resize,
    Thumbnail,
    Fit,
    Rotate,
    Flip,
    Blur,
    Flat,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Resize => "resize",
            Operation::Thumbnail => "thumbnail",
            Operation::Fit => "fit",
            Operation::Rotate => "rotate",
            Operation::Flip => "flip",
            Operation::Blur => "blur",
            Operation::Flat => "flat",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "resize" => Ok(Operation::Resize),
            "thumbnail" | "thumb" => Ok(Operation::Thumbnail),
            "fit" => Ok(Operation::Fit),
            "rotate" => Ok(Operation::Rotate),
            "flip" => Ok(Operation::Flip),
            "blur" => Ok(Operation::Blur),
            "flat" => Ok(Operation::Flat),
            other => Err(BackendError::InvalidParameter(format!(
                "unknown operation: {other}"
            ))),
        }
    }
}

/// Rotation in degrees; only quarter turns are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Deg90,
    Deg180,
    Deg270,
}

impl TryFrom<u32> for Rotation {
    type Error = BackendError;

    fn try_from(degree: u32) -> Result<Self, Self::Error> {
        match degree {
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(BackendError::InvalidParameter(format!(
                "rotate degree={other} is not supported"
            ))),
        }
    }
}

/// Flip axis: `h` mirrors left/right, `v` mirrors top/bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipAxis {
    Horizontal,
    Vertical,
}

impl FromStr for FlipAxis {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "h" => Ok(FlipAxis::Horizontal),
            "v" => Ok(FlipAxis::Vertical),
            other => Err(BackendError::InvalidParameter(format!(
                "flip position {other} is not supported"
            ))),
        }
    }
}

/// Parameters shared by every operation.
///
/// Each operation reads the subset it needs: width/height/upscale for the
/// geometric ones, `degree` for rotate, `position` for flip, `sigma` for blur.
/// `degree` and `position` stay raw so that validation happens inside the
/// backend and surfaces as [`BackendError::InvalidParameter`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOptions {
    pub width: u32,
    pub height: u32,
    pub upscale: bool,
    pub format: ImageFormat,
    pub quality: Quality,
    pub degree: u32,
    pub position: String,
    pub sigma: f32,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            upscale: false,
            format: ImageFormat::Jpeg,
            quality: Quality::default(),
            degree: 0,
            position: String::new(),
            sigma: 0.0,
        }
    }
}

impl TransformOptions {
    pub fn sized(width: u32, height: u32, format: ImageFormat) -> Self {
        Self {
            width,
            height,
            format,
            ..Self::default()
        }
    }

    /// Blur radius: `sigma` when positive, otherwise `width`.
    pub fn blur_sigma(&self) -> f32 {
        if self.sigma > 0.0 {
            self.sigma
        } else {
            self.width as f32
        }
    }
}
