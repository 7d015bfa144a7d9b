//! # imgfit
//!
//! An on-demand image transform cache. Callers ask for a derived variant of a
//! stored source image (resized, cropped to fit, rotated, blurred...) under a
//! cache key. The first request generates and stores it; later requests are
//! served from storage without touching the pixels again.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────┐   key → path    ┌──────────┐
//!   request ────▶ │  Processor   │ ◀─────────────▶ │ KvStore  │
//!                 │ (cache layer)│                 └──────────┘
//!                 └──────┬───────┘
//!            miss        │         bytes           ┌──────────┐
//!                        ├───────────────────────▶ │ Storage  │ source / destination
//!                        ▼                         └──────────┘
//!                 ┌──────────────┐  by weight and content type
//!                 │    Engine    │ ──────────────▶ native │ external
//!                 └──────────────┘
//! ```
//!
//! The [`engine::Engine`] holds backends ordered by weight. For each request
//! it tries the candidate operations in order against the first backend that
//! accepts the image's content type. A backend answering "not implemented"
//! moves on to the next candidate; any other error stops the request.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`processor`] | Cache layer: conditional requests, lookup, regeneration, persistence, cascade delete |
//! | [`engine`] | Weighted backend registry and candidate fallback |
//! | [`imaging`] | Backend trait, crop geometry, native and external backends |
//! | [`image_file`] | The image value passed between layers |
//! | [`storage`] | Byte storage by logical path (filesystem, memory) |
//! | [`store`] | Key/value store with append-only sets (JSON file, memory) |
//! | [`hash`] | Cache key derivation and sharded destination paths |
//! | [`config`] | `imgfit.toml` loading, merging with defaults, validation |
//!
//! # Design Decisions
//!
//! ## One Crop Geometry for Every Backend
//!
//! Thumbnails crop to the target aspect ratio around the centre, then resize.
//! The crop box is computed once, in [`imaging::compute_crop`], and both
//! backends consume it: the native one crops pixels, the external one passes
//! the same box on the command line. A thumbnail therefore has the same
//! framing whichever backend produced it.
//!
//! ## Keys Are Hashes, Paths Are Derived
//!
//! A cache key is a SHA-256 over the length-prefixed parts of a request, so
//! distinct requests cannot collide by concatenation. The destination path is
//! computed from the key alone ([`hash::shard_path`]) and the store maps key to
//! path. A mapping whose file is gone is treated as a miss and regenerated.
//!
//! ## CPU Work Off the Async Runtime
//!
//! Decoding, resampling and encoding run under
//! [`tokio::task::spawn_blocking`]; animated GIF frames are processed in
//! parallel with rayon. External programs run under a timeout and are killed
//! when it expires.

pub mod config;
pub mod engine;
pub mod hash;
pub mod image_file;
pub mod imaging;
pub mod processor;
pub mod storage;
pub mod store;

#[cfg(test)]
pub(crate) mod test_helpers;
