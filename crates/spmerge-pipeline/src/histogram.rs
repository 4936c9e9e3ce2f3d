//! 3-D color histograms, back-projection and histogram distance.
//!
//! Histograms have `bins` uniform bins per channel over `[0, 256)` and
//! are normalized so the fullest bin holds `1.0`. Back-projecting a
//! histogram therefore maps a region's most common color to exactly
//! 255.

use serde::{Deserialize, Serialize};

use crate::types::SegmentError;

/// Colorspace pixels are converted into before binning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Colorspace {
    /// Use pixel values as-is.
    #[default]
    Rgb,
    /// 8-bit CIE L\*a\*b\* (D65): `L * 255 / 100`, `a + 128`, `b + 128`.
    Lab,
}

impl Colorspace {
    /// Convert one 8-bit RGB pixel.
    #[must_use]
    pub fn convert(self, rgb: [u8; 3]) -> [u8; 3] {
        match self {
            Self::Rgb => rgb,
            Self::Lab => rgb_to_lab8(rgb),
        }
    }
}

/// sRGB to 8-bit L\*a\*b\* matching the usual 8-bit image-library scaling.
fn rgb_to_lab8(rgb: [u8; 3]) -> [u8; 3] {
    fn linear(c: u8) -> f32 {
        let c = f32::from(c) / 255.0;
        if c <= 0.040_45 {
            c / 12.92
        } else {
            ((c + 0.055) / 1.055).powf(2.4)
        }
    }
    fn f(t: f32) -> f32 {
        if t > 0.008_856 {
            t.cbrt()
        } else {
            7.787_f32.mul_add(t, 16.0 / 116.0)
        }
    }

    let [r, g, b] = rgb.map(linear);
    let x = 0.180_423_f32.mul_add(b, 0.412_453_f32.mul_add(r, 0.357_580 * g)) / 0.950_456;
    let y = 0.072_169_f32.mul_add(b, 0.212_671_f32.mul_add(r, 0.715_160 * g));
    let z = 0.950_227_f32.mul_add(b, 0.019_334_f32.mul_add(r, 0.119_193 * g)) / 1.088_754;

    let l = if y > 0.008_856 {
        116.0_f32.mul_add(y.cbrt(), -16.0)
    } else {
        903.3 * y
    };
    let a = 500.0 * (f(x) - f(y));
    let bb = 200.0 * (f(y) - f(z));

    [
        saturate(l * 255.0 / 100.0),
        saturate(a + 128.0),
        saturate(bb + 128.0),
    ]
}

/// Round to nearest and clamp into `0..=255`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn saturate(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// A normalized 3-D color histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorHistogram {
    bins: usize,
    colorspace: Colorspace,
    values: Vec<f32>,
}

impl ColorHistogram {
    /// Build a histogram of `pixels` after converting them into
    /// `colorspace`.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::InvalidConfig`] if `bins` is outside
    /// `1..=256` and [`SegmentError::Internal`] if `pixels` is empty.
    pub fn from_pixels(
        pixels: &[[u8; 3]],
        bins: usize,
        colorspace: Colorspace,
    ) -> Result<Self, SegmentError> {
        if bins == 0 || bins > 256 {
            return Err(SegmentError::InvalidConfig(format!(
                "histogram bins must be in 1..=256, got {bins}"
            )));
        }
        if pixels.is_empty() {
            return Err(SegmentError::Internal(
                "histogram of an empty pixel set".to_string(),
            ));
        }
        let mut hist = Self {
            bins,
            colorspace,
            values: vec![0.0; bins * bins * bins],
        };
        for &px in pixels {
            let i = hist.index(px);
            hist.values[i] += 1.0;
        }
        let max = hist.values.iter().copied().fold(1.0_f32, f32::max);
        for v in &mut hist.values {
            *v /= max;
        }
        Ok(hist)
    }

    /// Bins per channel.
    #[must_use]
    pub const fn bins(&self) -> usize {
        self.bins
    }

    /// Flat bin index of an unconverted pixel.
    fn index(&self, rgb: [u8; 3]) -> usize {
        let [c0, c1, c2] = self
            .colorspace
            .convert(rgb)
            .map(|c| usize::from(c) * self.bins / 256);
        (c0 * self.bins + c1) * self.bins + c2
    }

    /// Normalized value of the bin `rgb` falls into.
    #[must_use]
    pub fn value(&self, rgb: [u8; 3]) -> f32 {
        self.values[self.index(rgb)]
    }

    /// Score each pixel by its bin value scaled to `0..=255`.
    #[must_use]
    pub fn back_project(&self, pixels: &[[u8; 3]]) -> Vec<u8> {
        pixels
            .iter()
            .map(|&px| saturate(self.value(px) * 255.0))
            .collect()
    }

    /// Bhattacharyya distance in `[0, 1]`: `0` for identical
    /// distributions, `1` for disjoint ones.
    ///
    /// Histograms with different bin counts are treated as disjoint.
    #[must_use]
    pub fn bhattacharyya(&self, other: &Self) -> f64 {
        if self.bins != other.bins {
            return 1.0;
        }
        let mut s1 = 0.0_f64;
        let mut s2 = 0.0_f64;
        let mut overlap = 0.0_f64;
        for (&a, &b) in self.values.iter().zip(&other.values) {
            let (a, b) = (f64::from(a), f64::from(b));
            s1 += a;
            s2 += b;
            overlap += (a * b).sqrt();
        }
        let scale = s1 * s2;
        let scale = if scale.abs() > f64::EPSILON {
            1.0 / scale.sqrt()
        } else {
            1.0
        };
        overlap.mul_add(-scale, 1.0).max(0.0).sqrt()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const RED: [u8; 3] = [255, 0, 0];
    const BLUE: [u8; 3] = [0, 0, 255];

    #[test]
    fn peak_bin_is_one() {
        let h = ColorHistogram::from_pixels(&[RED, RED, BLUE], 16, Colorspace::Rgb).unwrap();
        assert!((h.value(RED) - 1.0).abs() < f32::EPSILON);
        assert!((h.value(BLUE) - 0.5).abs() < f32::EPSILON);
        assert!(h.value([0, 255, 0]).abs() < f32::EPSILON);
    }

    #[test]
    fn back_project_maps_peak_to_255() {
        let h = ColorHistogram::from_pixels(&[RED, RED, BLUE], 16, Colorspace::Rgb).unwrap();
        assert_eq!(h.back_project(&[RED, BLUE, [0, 255, 0]]), vec![255, 128, 0]);
    }

    #[test]
    fn nearby_colors_share_a_bin() {
        let h = ColorHistogram::from_pixels(&[[100, 100, 100]], 16, Colorspace::Rgb).unwrap();
        assert!((h.value([101, 102, 103]) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn empty_pixels_is_error() {
        assert!(matches!(
            ColorHistogram::from_pixels(&[], 16, Colorspace::Rgb),
            Err(SegmentError::Internal(_))
        ));
    }

    #[test]
    fn bad_bin_count_is_error() {
        assert!(ColorHistogram::from_pixels(&[RED], 0, Colorspace::Rgb).is_err());
        assert!(ColorHistogram::from_pixels(&[RED], 257, Colorspace::Rgb).is_err());
    }

    #[test]
    fn bhattacharyya_identical_is_zero() {
        let a = ColorHistogram::from_pixels(&[RED, BLUE], 8, Colorspace::Rgb).unwrap();
        let b = ColorHistogram::from_pixels(&[BLUE, RED], 8, Colorspace::Rgb).unwrap();
        assert!(a.bhattacharyya(&b) < 1e-6);
    }

    #[test]
    fn bhattacharyya_disjoint_is_one() {
        let a = ColorHistogram::from_pixels(&[RED], 8, Colorspace::Rgb).unwrap();
        let b = ColorHistogram::from_pixels(&[BLUE], 8, Colorspace::Rgb).unwrap();
        assert!((a.bhattacharyya(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn bhattacharyya_partial_overlap_is_between() {
        let a = ColorHistogram::from_pixels(&[RED, RED, BLUE], 8, Colorspace::Rgb).unwrap();
        let b = ColorHistogram::from_pixels(&[RED, BLUE, BLUE], 8, Colorspace::Rgb).unwrap();
        let d = a.bhattacharyya(&b);
        assert!(d > 0.0 && d < 1.0, "distance {d}");
    }

    #[test]
    fn lab_white_and_black() {
        assert_eq!(Colorspace::Lab.convert([255, 255, 255]), [255, 128, 128]);
        assert_eq!(Colorspace::Lab.convert([0, 0, 0]), [0, 128, 128]);
    }

    #[test]
    fn lab_red_has_positive_a() {
        let [_, a, _] = Colorspace::Lab.convert(RED);
        assert!(a > 200, "a = {a}");
    }
}
