//! Palette reduction of packed RGB pixels.
//!
//! [`MedianCutReducer`] builds a weighted color histogram, repeatedly
//! splits the box with the most weighted spread at its weighted median,
//! and maps every pixel to the nearest box centroid.

use std::collections::HashMap;

use crate::tags::{pack_rgb, unpack_rgb};
use crate::types::RgbImage;

/// Pixels after reduction, with the palette they were mapped onto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReducedColors {
    /// One packed color per input pixel, each present in `colortable`.
    pub pixels: Vec<u32>,
    /// Distinct palette colors, ascending. Its length is the number of
    /// colors actually produced, which may be below the requested count.
    pub colortable: Vec<u32>,
}

/// Reduces a set of packed `0xRRGGBB` pixels to at most `desired` colors.
pub trait ColorReducer {
    /// Map `pixels` onto a palette of at most `desired` colors.
    /// A `desired` of zero is treated as one.
    fn reduce(&self, pixels: &[u32], desired: usize) -> ReducedColors;
}

/// Weighted median cut in RGB.
#[derive(Debug, Clone, Copy, Default)]
pub struct MedianCutReducer;

#[derive(Debug, Clone)]
struct ColorBox {
    entries: Vec<([u8; 3], u64)>,
}

impl ColorBox {
    fn total_weight(&self) -> u64 {
        self.entries.iter().map(|(_, w)| w).sum()
    }

    fn ranges(&self) -> [u8; 3] {
        let mut lo = [u8::MAX; 3];
        let mut hi = [u8::MIN; 3];
        for (rgb, _) in &self.entries {
            for c in 0..3 {
                lo[c] = lo[c].min(rgb[c]);
                hi[c] = hi[c].max(rgb[c]);
            }
        }
        [0, 1, 2].map(|c| hi[c].saturating_sub(lo[c]))
    }

    fn widest_axis(&self) -> (usize, u8) {
        let ranges = self.ranges();
        let mut axis = 0;
        for c in 1..3 {
            if ranges[c] > ranges[axis] {
                axis = c;
            }
        }
        (axis, ranges[axis])
    }

    fn priority(&self) -> u64 {
        self.total_weight() * u64::from(self.widest_axis().1)
    }

    fn centroid(&self) -> [u8; 3] {
        let total = self.total_weight().max(1);
        let mut sums = [0u64; 3];
        for (rgb, w) in &self.entries {
            for c in 0..3 {
                sums[c] += u64::from(rgb[c]) * w;
            }
        }
        sums.map(|s| u8::try_from((s + total / 2) / total).unwrap_or(u8::MAX))
    }

    fn split(mut self) -> (Self, Self) {
        let (axis, _) = self.widest_axis();
        self.entries.sort_unstable_by_key(|(rgb, _)| (rgb[axis], pack_rgb(*rgb)));

        let half = self.total_weight().div_ceil(2);
        let mut accumulated = 0;
        let mut split_at = 1;
        for (i, (_, w)) in self.entries.iter().enumerate() {
            accumulated += w;
            if accumulated >= half {
                split_at = i + 1;
                break;
            }
        }
        split_at = split_at.clamp(1, self.entries.len() - 1);

        let right = self.entries.split_off(split_at);
        (self, Self { entries: right })
    }
}

fn distance_sq(a: [u8; 3], b: [u8; 3]) -> u32 {
    (0..3)
        .map(|c| {
            let d = i32::from(a[c]) - i32::from(b[c]);
            d.unsigned_abs().pow(2)
        })
        .sum()
}

impl ColorReducer for MedianCutReducer {
    fn reduce(&self, pixels: &[u32], desired: usize) -> ReducedColors {
        let desired = desired.max(1);
        let mut histogram: HashMap<u32, u64> = HashMap::new();
        for &p in pixels {
            *histogram.entry(p & 0x00FF_FFFF).or_default() += 1;
        }
        let mut entries: Vec<([u8; 3], u64)> = histogram
            .into_iter()
            .map(|(c, w)| (unpack_rgb(c), w))
            .collect();
        entries.sort_unstable_by_key(|(rgb, _)| pack_rgb(*rgb));

        if entries.len() <= desired {
            let colortable = entries.iter().map(|(rgb, _)| pack_rgb(*rgb)).collect();
            let pixels = pixels.iter().map(|p| p & 0x00FF_FFFF).collect();
            return ReducedColors { pixels, colortable };
        }

        let mut boxes = vec![ColorBox { entries }];
        while boxes.len() < desired {
            let best = boxes
                .iter()
                .enumerate()
                .filter(|(_, b)| b.entries.len() >= 2)
                .max_by_key(|(i, b)| (b.priority(), std::cmp::Reverse(*i)))
                .map(|(i, _)| i);
            let Some(index) = best else {
                break;
            };
            let (left, right) = boxes.swap_remove(index).split();
            boxes.push(left);
            boxes.push(right);
        }

        let mut colortable: Vec<u32> = boxes.iter().map(|b| pack_rgb(b.centroid())).collect();
        colortable.sort_unstable();
        colortable.dedup();
        log::debug!(
            "median cut: {} boxes, {} distinct palette colors",
            boxes.len(),
            colortable.len()
        );

        let mut nearest: HashMap<u32, u32> = HashMap::new();
        let pixels = pixels
            .iter()
            .map(|&p| {
                let p = p & 0x00FF_FFFF;
                *nearest.entry(p).or_insert_with(|| {
                    let rgb = unpack_rgb(p);
                    colortable
                        .iter()
                        .copied()
                        .min_by_key(|&c| (distance_sq(rgb, unpack_rgb(c)), c))
                        .unwrap_or(p)
                })
            })
            .collect();
        ReducedColors { pixels, colortable }
    }
}

/// Reduce an image's palette with `reducer`.
///
/// Returns the reduced image and the number of palette colors used.
#[must_use]
pub fn reduce_image(
    reducer: &dyn ColorReducer,
    image: &RgbImage,
    desired: usize,
) -> (RgbImage, usize) {
    let packed: Vec<u32> = image.pixels().map(|p| pack_rgb(p.0)).collect();
    let reduced = reducer.reduce(&packed, desired);
    let mut out = RgbImage::new(image.width(), image.height());
    for (dst, &c) in out.pixels_mut().zip(&reduced.pixels) {
        *dst = image::Rgb(unpack_rgb(c));
    }
    (out, reduced.colortable.len())
}
