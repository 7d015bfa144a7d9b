//! Fixed 256-colour palette for re-quantizing animated frames.
//!
//! A 6×6×6 colour cube plus a 40-step gray ramp. Used with
//! [`image::imageops::dither`] (Floyd–Steinberg) so every frame of an
//! animation maps onto the same palette.

use image::Rgba;
use image::imageops::ColorMap;

const CUBE_LEVELS: [u8; 6] = [0, 51, 102, 153, 204, 255];
const GRAY_STEPS: usize = 40;

#[derive(Debug, Clone, Copy, Default)]
pub struct FixedPalette;

impl FixedPalette {
    fn cube_index(value: u8) -> usize {
        ((value as usize * 5 + 127) / 255).min(5)
    }

    fn gray_index(value: u8) -> usize {
        ((value as usize * (GRAY_STEPS - 1) + 127) / 255).min(GRAY_STEPS - 1)
    }

    fn gray_level(index: usize) -> u8 {
        ((index * 255 + (GRAY_STEPS - 1) / 2) / (GRAY_STEPS - 1)) as u8
    }

    /// Nearest palette entry for an opaque colour: `(index, rgb)`.
    fn nearest(rgb: [u8; 3]) -> (usize, [u8; 3]) {
        let [r, g, b] = rgb;
        let (ri, gi, bi) = (
            Self::cube_index(r),
            Self::cube_index(g),
            Self::cube_index(b),
        );
        let cube = [CUBE_LEVELS[ri], CUBE_LEVELS[gi], CUBE_LEVELS[bi]];

        let luma = ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000) as u8;
        let gi_ramp = Self::gray_index(luma);
        let level = Self::gray_level(gi_ramp);
        let gray = [level, level, level];

        if distance(rgb, gray) < distance(rgb, cube) {
            (216 + gi_ramp, gray)
        } else {
            (ri * 36 + gi * 6 + bi, cube)
        }
    }
}

fn distance(a: [u8; 3], b: [u8; 3]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = x as i32 - y as i32;
            (d * d) as u32
        })
        .sum()
}

impl ColorMap for FixedPalette {
    type Color = Rgba<u8>;

    fn index_of(&self, color: &Rgba<u8>) -> usize {
        let [r, g, b, _] = color.0;
        Self::nearest([r, g, b]).0
    }

    fn map_color(&self, color: &mut Rgba<u8>) {
        let [r, g, b, a] = color.0;
        let (_, [nr, ng, nb]) = Self::nearest([r, g, b]);
        // GIF has binary transparency
        let alpha = if a < 128 { 0 } else { 255 };
        *color = Rgba([nr, ng, nb, alpha]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primaries_map_to_themselves() {
        let palette = FixedPalette;
        for rgb in [[255, 0, 0], [0, 255, 0], [0, 0, 255], [0, 0, 0], [255, 255, 255]] {
            let mut px = Rgba([rgb[0], rgb[1], rgb[2], 255]);
            palette.map_color(&mut px);
            assert_eq!([px.0[0], px.0[1], px.0[2]], rgb);
        }
    }

    #[test]
    fn indices_stay_within_256() {
        let palette = FixedPalette;
        for v in (0..=255u8).step_by(5) {
            let idx = palette.index_of(&Rgba([v, 255 - v, v / 2, 255]));
            assert!(idx < 256);
            let gray = palette.index_of(&Rgba([v, v, v, 255]));
            assert!(gray < 256);
        }
    }

    #[test]
    fn mid_gray_prefers_gray_ramp() {
        let mut px = Rgba([128, 128, 128, 255]);
        FixedPalette.map_color(&mut px);
        // 128 is far from both 102 and 153 on the cube; the ramp is closer
        assert!((px.0[0] as i32 - 128).abs() <= 4);
        assert_eq!(px.0[0], px.0[1]);
    }

    #[test]
    fn alpha_is_binarised() {
        let mut px = Rgba([10, 10, 10, 100]);
        FixedPalette.map_color(&mut px);
        assert_eq!(px.0[3], 0);
        let mut px = Rgba([10, 10, 10, 200]);
        FixedPalette.map_color(&mut px);
        assert_eq!(px.0[3], 255);
    }
}
