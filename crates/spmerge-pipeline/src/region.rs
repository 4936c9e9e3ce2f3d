//! A single region of the over-segmentation: its pixels plus the edge
//! weight history that drives adaptive merge decisions.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::stats::{mean_stddev, pos_sample_within_bound};
use crate::types::{Coord, Dimensions, RegionId};

/// Whether every pixel of a region has the same color.
///
/// Computed lazily against the working image and cached on the region.
/// A merge always resets the cache of the surviving region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Uniformity {
    /// Not yet checked.
    #[default]
    Unknown,
    /// Every pixel matches the first pixel.
    AllSame,
    /// At least two pixels differ.
    Mixed,
}

/// A connected-or-not set of pixels sharing one id.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    id: RegionId,
    coords: Vec<Coord>,
    pub(crate) uniformity: Uniformity,
    merged_edge_weights: Vec<f32>,
    unmerged_edge_weights: Vec<f32>,
}

impl Region {
    pub(crate) const fn new(id: RegionId) -> Self {
        Self {
            id,
            coords: Vec::new(),
            uniformity: Uniformity::Unknown,
            merged_edge_weights: Vec::new(),
            unmerged_edge_weights: Vec::new(),
        }
    }

    /// The region id.
    #[must_use]
    pub const fn id(&self) -> RegionId {
        self.id
    }

    /// Pixel coordinates owned by this region, in insertion order.
    #[must_use]
    pub fn coords(&self) -> &[Coord] {
        &self.coords
    }

    /// Number of pixels owned by this region.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.coords.len()
    }

    /// Returns `true` if the region owns no pixels.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// Cached uniformity.
    #[must_use]
    pub const fn uniformity(&self) -> Uniformity {
        self.uniformity
    }

    /// Weights of edges this region has accepted, oldest first.
    #[must_use]
    pub fn merged_edge_weights(&self) -> &[f32] {
        &self.merged_edge_weights
    }

    /// Weights of edges this region has declined, oldest first.
    #[must_use]
    pub fn unmerged_edge_weights(&self) -> &[f32] {
        &self.unmerged_edge_weights
    }

    pub(crate) fn push_coord(&mut self, coord: Coord) {
        self.coords.push(coord);
    }

    /// Move everything from `src` into `self`: pixels are appended and
    /// both weight histories are concatenated.
    pub(crate) fn absorb(&mut self, mut src: Self) {
        self.coords.append(&mut src.coords);
        self.merged_edge_weights
            .append(&mut src.merged_edge_weights);
        self.unmerged_edge_weights
            .append(&mut src.unmerged_edge_weights);
        self.uniformity = Uniformity::Unknown;
    }

    /// Record the weight of an edge this region merged across.
    pub fn add_merged_edge_weight(&mut self, weight: f32) {
        self.merged_edge_weights.push(weight);
    }

    /// Record the weights of edges this region chose not to merge.
    pub fn add_unmerged_edge_weights(&mut self, weights: impl IntoIterator<Item = f32>) {
        self.unmerged_edge_weights.extend(weights);
    }

    /// Decide whether an edge of weight `weight` should be merged.
    ///
    /// Weights at or above `mean - stddev` of the declined history look
    /// like the hard edges already refused and are rejected. Anything
    /// else must also pass [`pos_sample_within_bound`] over the accepted
    /// history.
    #[must_use]
    pub fn should_merge_edge(&self, weight: f32) -> bool {
        if !self.unmerged_edge_weights.is_empty() {
            let (mean, stddev) = mean_stddev(&self.unmerged_edge_weights);
            if weight >= mean - stddev {
                return false;
            }
        }
        pos_sample_within_bound(&self.merged_edge_weights, weight)
    }

    /// Split the pixels of two regions into those along their shared
    /// boundary.
    ///
    /// Returns `(a_edge, b_edge)`: the pixels of `a` with an 8-neighbor
    /// in `b`, and the pixels of `b` with an 8-neighbor in `a`.
    #[must_use]
    pub fn boundary_coords(a: &Self, b: &Self, dimensions: Dimensions) -> (Vec<Coord>, Vec<Coord>) {
        let a_set: HashSet<Coord> = a.coords.iter().copied().collect();
        let b_set: HashSet<Coord> = b.coords.iter().copied().collect();
        let touching = |coords: &[Coord], other: &HashSet<Coord>| -> Vec<Coord> {
            coords
                .iter()
                .copied()
                .filter(|c| c.neighbors8(dimensions).any(|n| other.contains(&n)))
                .collect()
        };
        (touching(&a.coords, &b_set), touching(&b.coords, &a_set))
    }
}
