//! Cluster-count estimation for palette reduction.
//!
//! Pixels vote for their color once per 8-connected neighbor of the
//! same color, so dense patches of one color score high and scattered
//! noise scores low. The vote curve over colors (sorted by packed
//! value) is padded with a zero at both ends and run through a
//! peak detector; each emission peak counts as a visually distinct color
//! and is given four palette entries.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::tags::{pack_rgb, unpack_rgb};
use crate::types::{Coord, Dimensions, GrayImage, RgbImage, SegmentError};

/// Most peaks of either kind the detector may report.
pub const PEAK_CAPACITY: usize = 256;

/// Palette entries granted per detected peak.
pub const CLUSTERS_PER_PEAK: usize = 4;

/// Local maxima (emission) and minima (absorption) of a curve, as
/// indices into the input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Peaks {
    /// Indices of local maxima, ascending.
    pub emission: Vec<usize>,
    /// Indices of local minima, ascending.
    pub absorption: Vec<usize>,
}

/// Find peaks that stand out from their surroundings by more than
/// `delta`.
///
/// The scan alternates between looking for a maximum and a minimum,
/// starting with a maximum when `emission_first` is set. After each
/// detection it resumes from the detected index.
///
/// # Errors
///
/// Returns [`SegmentError::PeakCapacity`] when more than `capacity`
/// peaks of one kind are found.
pub fn detect_peaks(
    data: &[f64],
    delta: f64,
    emission_first: bool,
    capacity: usize,
) -> Result<Peaks, SegmentError> {
    let mut peaks = Peaks::default();
    let Some(&first) = data.first() else {
        return Ok(peaks);
    };

    let (mut mx, mut mn) = (first, first);
    let (mut mx_pos, mut mn_pos) = (0, 0);
    let mut looking_for_max = emission_first;

    let mut i = 1;
    while i < data.len() {
        let v = data[i];
        if v > mx {
            mx = v;
            mx_pos = i;
        }
        if v < mn {
            mn = v;
            mn_pos = i;
        }

        if looking_for_max && v < mx - delta {
            if peaks.emission.len() >= capacity {
                return Err(SegmentError::PeakCapacity { capacity });
            }
            peaks.emission.push(mx_pos);
            looking_for_max = false;
            mn = data[mx_pos];
            mn_pos = mx_pos;
            i = mx_pos;
            continue;
        }
        if !looking_for_max && v > mn + delta {
            if peaks.absorption.len() >= capacity {
                return Err(SegmentError::PeakCapacity { capacity });
            }
            peaks.absorption.push(mn_pos);
            looking_for_max = true;
            mx = data[mn_pos];
            mx_pos = mn_pos;
            i = mn_pos;
            continue;
        }
        i += 1;
    }
    Ok(peaks)
}

/// Count, per color, how many same-colored 8-neighbors its pixels have.
///
/// Only pixels where `mask` is non-zero take part, both as voters and
/// as neighbors. Without a mask every pixel takes part. Colors that
/// never touch themselves get no entry.
#[must_use]
pub fn vote_for_identical_neighbors(
    image: &RgbImage,
    mask: Option<&GrayImage>,
) -> HashMap<u32, u32> {
    let dims = Dimensions {
        width: image.width(),
        height: image.height(),
    };
    let on = |c: Coord| mask.is_none_or(|m| m.get_pixel(c.x, c.y).0[0] != 0);

    let mut votes: HashMap<u32, u32> = HashMap::new();
    for (x, y, px) in image.enumerate_pixels() {
        let here = Coord::new(x, y);
        if !on(here) {
            continue;
        }
        let count = here
            .neighbors8(dims)
            .filter(|&n| on(n) && image.get_pixel(n.x, n.y) == px)
            .count();
        if count > 0 {
            *votes.entry(pack_rgb(px.0)).or_default() += u32::try_from(count).unwrap_or(u32::MAX);
        }
    }
    votes
}

/// Result of [`estimate_cluster_count`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterEstimate {
    /// Distinct colors that received votes.
    pub voted_colors: usize,
    /// Colors at the emission peaks, in curve order.
    pub peaks: Vec<[u8; 3]>,
    /// Suggested palette size: [`CLUSTERS_PER_PEAK`] per peak.
    pub clusters: usize,
}

/// Estimate how many palette entries the masked part of `image` needs.
///
/// # Errors
///
/// Returns [`SegmentError::PeakCapacity`] if the vote curve has more
/// than [`PEAK_CAPACITY`] peaks of one kind.
pub fn estimate_cluster_count(
    image: &RgbImage,
    mask: Option<&GrayImage>,
    delta: f64,
) -> Result<ClusterEstimate, SegmentError> {
    let votes = vote_for_identical_neighbors(image, mask);
    let mut colors: Vec<u32> = votes.keys().copied().collect();
    colors.sort_unstable();

    let mut curve = Vec::with_capacity(colors.len() + 2);
    curve.push(0.0);
    curve.extend(colors.iter().map(|c| f64::from(votes[c])));
    curve.push(0.0);

    let found = detect_peaks(&curve, delta, false, PEAK_CAPACITY)?;
    let peaks: Vec<[u8; 3]> = found
        .emission
        .iter()
        .filter_map(|&i| i.checked_sub(1).and_then(|i| colors.get(i)))
        .map(|&c| unpack_rgb(c))
        .collect();
    log::debug!(
        "{} voted colors, {} emission peaks, {} absorption peaks",
        colors.len(),
        found.emission.len(),
        found.absorption.len()
    );

    Ok(ClusterEstimate {
        voted_colors: colors.len(),
        clusters: peaks.len() * CLUSTERS_PER_PEAK,
        peaks,
    })
}

/// Map every channel onto `levels` evenly spaced values, so that nearby
/// colors collapse before voting.
///
/// `levels` below 2 is treated as 2.
#[must_use]
pub fn posterize(image: &RgbImage, levels: u8) -> RgbImage {
    let levels = u16::from(levels.max(2));
    let step = 256 / levels;
    let map = |c: u8| -> u8 {
        let bucket = (u16::from(c) / step).min(levels - 1);
        let center = bucket * step + step / 2;
        u8::try_from(center).unwrap_or(u8::MAX)
    };
    let mut out = image.clone();
    for px in out.pixels_mut() {
        px.0 = px.0.map(map);
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn detects_alternating_peaks() {
        let peaks = detect_peaks(&[0.0, 1.0, 0.0, 2.0, 0.0], 0.5, false, 16).unwrap();
        assert_eq!(peaks.emission, vec![1, 3]);
        assert_eq!(peaks.absorption, vec![0, 2]);
    }

    #[test]
    fn ignores_wiggles_below_delta() {
        let peaks = detect_peaks(&[0.0, 5.0, 4.9, 5.0, 0.0], 0.5, false, 16).unwrap();
        assert_eq!(peaks.emission, vec![1]);
    }

    #[test]
    fn empty_and_flat_curves_have_no_peaks() {
        assert_eq!(detect_peaks(&[], 1e-6, false, 4).unwrap(), Peaks::default());
        let flat = detect_peaks(&[3.0; 8], 1e-6, false, 4).unwrap();
        assert!(flat.emission.is_empty());
    }

    #[test]
    fn capacity_overflow_is_error() {
        let zigzag: Vec<f64> = (0..20).map(|i| f64::from(i % 2)).collect();
        assert!(matches!(
            detect_peaks(&zigzag, 0.5, false, 3),
            Err(SegmentError::PeakCapacity { capacity: 3 })
        ));
    }

    #[test]
    fn votes_count_identical_pairs_twice() {
        // 2x2 solid block: 6 adjacent pairs in the 8-neighborhood.
        let image = RgbImage::from_pixel(2, 2, image::Rgb([1, 2, 3]));
        let votes = vote_for_identical_neighbors(&image, None);
        assert_eq!(votes[&pack_rgb([1, 2, 3])], 12);
    }

    #[test]
    fn mask_excludes_pixels() {
        let image = RgbImage::from_pixel(2, 1, image::Rgb([9, 9, 9]));
        let mut mask = GrayImage::new(2, 1);
        mask.put_pixel(0, 0, image::Luma([255]));
        assert!(vote_for_identical_neighbors(&image, Some(&mask)).is_empty());
    }

    #[test]
    fn two_dense_colors_give_two_peaks() {
        // Blue block, one green column, red block.
        let image = RgbImage::from_fn(7, 2, |x, _| match x {
            0..=2 => image::Rgb([0, 0, 255]),
            3 => image::Rgb([0, 255, 0]),
            _ => image::Rgb([255, 0, 0]),
        });
        let estimate = estimate_cluster_count(&image, None, 1e-6).unwrap();
        assert_eq!(estimate.voted_colors, 3);
        assert_eq!(estimate.peaks, vec![[0, 0, 255], [255, 0, 0]]);
        assert_eq!(estimate.clusters, 8);
    }

    #[test]
    fn posterize_collapses_nearby_values() {
        let image = RgbImage::from_fn(2, 1, |x, _| image::Rgb([100 + u8::try_from(x).unwrap(); 3]));
        let out = posterize(&image, 4);
        assert_eq!(out.get_pixel(0, 0), out.get_pixel(1, 0));
        assert_eq!(out.get_pixel(0, 0).0, [96, 96, 96]);
    }
}
