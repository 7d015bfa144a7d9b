//! Pure calculation functions for image dimensions.
//!
//! All functions here are pure and testable without any I/O or images. Every
//! backend that crops goes through [`compute_crop`] so a thumbnail looks the
//! same whichever backend serves the content type.

/// A crop window inside the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBox {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl CropBox {
    /// Crop argument for external tools: `"<left>,<top>+<w>x<h>"`.
    pub fn to_geometry(self) -> String {
        format!("{},{}+{}x{}", self.left, self.top, self.width, self.height)
    }
}

/// Compute the centered crop window that gives the destination aspect ratio.
///
/// If the source is wider than the destination, the full height is kept and
/// the width narrowed to `round(dst_ratio * src_h)`; otherwise the full width
/// is kept and the height narrowed to `round(src_w / dst_ratio)`. The box is
/// then centered.
///
/// A zero dimension on either side yields the whole source.
///
/// # Examples
/// ```
/// # use imgfit::imaging::{compute_crop, CropBox};
/// // 1600x900 source → 300x200 thumbnail
/// assert_eq!(
///     compute_crop((1600, 900), (300, 200)),
///     CropBox { left: 125, top: 0, width: 1350, height: 900 }
/// );
/// ```
pub fn compute_crop(source: (u32, u32), dest: (u32, u32)) -> CropBox {
    let (src_w, src_h) = source;
    let (dst_w, dst_h) = dest;

    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
        return CropBox {
            left: 0,
            top: 0,
            width: src_w,
            height: src_h,
        };
    }

    let src_ratio = src_w as f64 / src_h as f64;
    let dst_ratio = dst_w as f64 / dst_h as f64;

    let (crop_w, crop_h) = if src_ratio > dst_ratio {
        // Source is wider: keep height, narrow width
        let w = (dst_ratio * src_h as f64).round() as u32;
        (w.clamp(1, src_w), src_h)
    } else {
        // Source is taller (or equal): keep width, narrow height
        let h = (src_w as f64 / dst_ratio).round() as u32;
        (src_w, h.clamp(1, src_h))
    };

    let left = ((src_w - crop_w) as f64 / 2.0).round().max(0.0) as u32;
    let top = ((src_h - crop_h) as f64 / 2.0).round().max(0.0) as u32;

    CropBox {
        left: left.min(src_w - crop_w),
        top: top.min(src_h - crop_h),
        width: crop_w,
        height: crop_h,
    }
}

/// Scale factor needed to cover the destination box.
///
/// `max(dst_w / src_w, dst_h / src_h)`. A factor ≥ 1 means the operation
/// would upscale.
pub fn scaling_factor(source: (u32, u32), dest: (u32, u32)) -> f64 {
    let (src_w, src_h) = source;
    let (dst_w, dst_h) = dest;
    if src_w == 0 || src_h == 0 {
        return 1.0;
    }
    (dst_w as f64 / src_w as f64).max(dst_h as f64 / src_h as f64)
}

/// Whether a transform to `dest` should run, or the source be returned as-is.
pub fn needs_resize(source: (u32, u32), dest: (u32, u32), upscale: bool) -> bool {
    upscale || scaling_factor(source, dest) < 1.0
}

/// Target dimensions for an ingest-time resize.
///
/// The longer source edge is pinned to `max_dimension`; the shorter edge
/// follows the source aspect ratio. Ties count as landscape.
///
/// # Examples
/// ```
/// # use imgfit::imaging::upload_target;
/// assert_eq!(upload_target((3000, 1800), 2000), (2000, 1200));
/// assert_eq!(upload_target((1800, 3000), 2000), (1200, 2000));
/// ```
pub fn upload_target(source: (u32, u32), max_dimension: u32) -> (u32, u32) {
    let (src_w, src_h) = source;
    if src_w >= src_h {
        (max_dimension, derive_height(source, max_dimension))
    } else {
        (derive_width(source, max_dimension), max_dimension)
    }
}

/// Height that keeps the source aspect ratio at the given width (at least 1).
pub fn derive_height(source: (u32, u32), width: u32) -> u32 {
    let (src_w, src_h) = source;
    if src_w == 0 {
        return 1;
    }
    ((width as f64 * src_h as f64 / src_w as f64).round() as u32).max(1)
}

/// Width that keeps the source aspect ratio at the given height (at least 1).
pub fn derive_width(source: (u32, u32), height: u32) -> u32 {
    let (src_w, src_h) = source;
    if src_h == 0 {
        return 1;
    }
    ((height as f64 * src_w as f64 / src_h as f64).round() as u32).max(1)
}

/// Fill in a zero width or height from the source aspect ratio.
pub fn complete_dimensions(source: (u32, u32), dest: (u32, u32)) -> (u32, u32) {
    match dest {
        (0, 0) => source,
        (0, h) => (derive_width(source, h), h),
        (w, 0) => (w, derive_height(source, w)),
        dims => dims,
    }
}

/// Dimensions that fit inside `dest` while preserving the source aspect ratio.
pub fn fit_dimensions(source: (u32, u32), dest: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (dst_w, dst_h) = complete_dimensions(source, dest);
    if src_w == 0 || src_h == 0 {
        return (dst_w, dst_h);
    }
    let ratio = (dst_w as f64 / src_w as f64).min(dst_h as f64 / src_h as f64);
    (
        ((src_w as f64 * ratio).round() as u32).max(1),
        ((src_h as f64 * ratio).round() as u32).max(1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // compute_crop tests
    // =========================================================================

    #[test]
    fn crop_wide_source_keeps_height() {
        // srcRatio 1.778 > dstRatio 1.5
        assert_eq!(
            compute_crop((1600, 900), (300, 200)),
            CropBox {
                left: 125,
                top: 0,
                width: 1350,
                height: 900
            }
        );
    }

    #[test]
    fn crop_tall_source_keeps_width() {
        // 900x1600 into 200x300: height = 900 / (2/3) = 1350
        assert_eq!(
            compute_crop((900, 1600), (200, 300)),
            CropBox {
                left: 0,
                top: 125,
                width: 900,
                height: 1350
            }
        );
    }

    #[test]
    fn crop_same_aspect_is_whole_image() {
        assert_eq!(
            compute_crop((800, 600), (400, 300)),
            CropBox {
                left: 0,
                top: 0,
                width: 800,
                height: 600
            }
        );
    }

    #[test]
    fn crop_zero_destination_returns_source() {
        let crop = compute_crop((640, 480), (0, 100));
        assert_eq!((crop.width, crop.height), (640, 480));
    }

    #[test]
    fn crop_geometry_string() {
        let crop = compute_crop((1600, 900), (300, 200));
        assert_eq!(crop.to_geometry(), "125,0+1350x900");
    }

    #[test]
    fn crop_always_inside_source_and_keeps_ratio() {
        let sizes = [1u32, 2, 3, 7, 16, 99, 300, 1024, 1601, 4000];
        for &src_w in &sizes {
            for &src_h in &sizes {
                for &dst_w in &sizes {
                    for &dst_h in &sizes {
                        let c = compute_crop((src_w, src_h), (dst_w, dst_h));
                        assert!(c.width >= 1 && c.width <= src_w);
                        assert!(c.height >= 1 && c.height <= src_h);
                        assert!(c.left + c.width <= src_w);
                        assert!(c.top + c.height <= src_h);

                        // Ratio preserved within half a unit of rounding on the narrowed side
                        let dst_ratio = dst_w as f64 / dst_h as f64;
                        // (a 1px floor wins over rounding for degenerate ratios)
                        if c.height == src_h && c.width < src_w && c.width > 1 {
                            assert!((c.width as f64 - dst_ratio * src_h as f64).abs() <= 0.5);
                        }
                        if c.width == src_w && c.height < src_h && c.height > 1 {
                            assert!((c.height as f64 - src_w as f64 / dst_ratio).abs() <= 0.5);
                        }
                    }
                }
            }
        }
    }

    // =========================================================================
    // scaling / upload tests
    // =========================================================================

    #[test]
    fn scaling_factor_uses_larger_ratio() {
        assert_eq!(scaling_factor((1000, 500), (500, 500)), 1.0);
        assert_eq!(scaling_factor((1000, 1000), (500, 250)), 0.5);
    }

    #[test]
    fn needs_resize_never_upscales_implicitly() {
        assert!(!needs_resize((100, 100), (200, 200), false));
        assert!(needs_resize((100, 100), (200, 200), true));
        assert!(needs_resize((400, 400), (200, 200), false));
        // Exact size is a no-op
        assert!(!needs_resize((200, 200), (200, 200), false));
    }

    #[test]
    fn upload_target_landscape() {
        assert_eq!(upload_target((3000, 1800), 2000), (2000, 1200));
    }

    #[test]
    fn upload_target_portrait() {
        assert_eq!(upload_target((1800, 3000), 2000), (1200, 2000));
    }

    #[test]
    fn upload_target_square_pins_width() {
        assert_eq!(upload_target((2500, 2500), 2000), (2000, 2000));
    }

    #[test]
    fn complete_dimensions_fills_missing_side() {
        assert_eq!(complete_dimensions((400, 200), (0, 100)), (200, 100));
        assert_eq!(complete_dimensions((400, 200), (100, 0)), (100, 50));
        assert_eq!(complete_dimensions((400, 200), (0, 0)), (400, 200));
        assert_eq!(complete_dimensions((400, 200), (30, 40)), (30, 40));
    }

    #[test]
    fn fit_dimensions_stays_inside_box() {
        assert_eq!(fit_dimensions((1600, 900), (300, 300)), (300, 169));
        assert_eq!(fit_dimensions((900, 1600), (300, 300)), (169, 300));
    }
}
