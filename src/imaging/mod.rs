//! Image processing backends and the geometry they share.
//!
//! | Operation | [`RustBackend`] | [`ExternalBackend`] |
//! |---|---|---|
//! | **Resize** | Lanczos3 `resize_exact` | `--resize WxH` |
//! | **Thumbnail** | [`compute_crop`] + resize | `--crop l,t+wxh --resize WxH` |
//! | **UploadResize** | [`upload_target`] + resize | [`upload_target`] + `--resize` |
//! | **Fit / Rotate / Flip / Blur / Flat** | `image` crate | NotImplemented |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait, [`RustBackend`], [`ExternalBackend`]

pub mod backend;
mod calculations;
pub mod external_backend;
mod palette;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, ImageBackend, Resized};
pub use calculations::{
    CropBox, complete_dimensions, compute_crop, fit_dimensions, needs_resize, scaling_factor,
    upload_target,
};
pub use external_backend::ExternalBackend;
pub use params::{FlipAxis, Operation, Quality, Rotation, TransformOptions};
pub use rust_backend::RustBackend;
