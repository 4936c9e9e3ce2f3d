//! Similarity engine: rank a region's neighbors by how alike they look.
//!
//! Three measures are provided:
//!
//! - **Histogram distance**: Bhattacharyya distance between whole-region
//!   color histograms (smaller is more similar).
//! - **Back-projection**: the fraction of a neighbor's pixels that score
//!   at least `min_graylevel` when the source region's histogram is
//!   back-projected onto them (larger is more similar).
//! - **Edge weight**: histogram distance restricted to the pixels along
//!   the shared boundary, cached in the graph's edge table.
//!
//! Histograms are rebuilt on every call; nothing is cached across
//! merges except edge weights, which a merge invalidates.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::graph::SuperpixelGraph;
use crate::histogram::{ColorHistogram, Colorspace};
use crate::region::Region;
use crate::types::{RegionId, RgbImage, SegmentError};

// ---------------------------------------------------------------------------
// Locks
// ---------------------------------------------------------------------------

/// Regions a strategy has decided to leave alone for now.
///
/// Dead ids may linger in the table; they are harmless because every
/// strategy looks regions up before using them.
#[derive(Debug, Clone, Default)]
pub struct LockTable(HashSet<RegionId>);

impl LockTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock `id`. Returns `true` if it was not locked before.
    pub fn lock(&mut self, id: RegionId) -> bool {
        self.0.insert(id)
    }

    /// Unlock `id`.
    pub fn unlock(&mut self, id: RegionId) {
        self.0.remove(&id);
    }

    /// Returns `true` if `id` is locked.
    #[must_use]
    pub fn is_locked(&self, id: RegionId) -> bool {
        self.0.contains(&id)
    }

    /// Number of locked ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if nothing is locked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn is_locked(locked: Option<&LockTable>, id: RegionId) -> bool {
    locked.is_some_and(|l| l.is_locked(id))
}

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// One ranked neighbor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborCandidate {
    /// Distance or percentage, depending on the measure.
    pub score: f64,
    /// Pixel count of the neighbor when it was scored.
    pub pixel_count: usize,
    /// The neighbor.
    pub neighbor: RegionId,
}

/// Ascending score, then larger neighbor first, then smaller id.
fn cmp_ascending(a: &NeighborCandidate, b: &NeighborCandidate) -> Ordering {
    a.score
        .total_cmp(&b.score)
        .then(b.pixel_count.cmp(&a.pixel_count))
        .then(a.neighbor.cmp(&b.neighbor))
}

/// Descending score, then larger neighbor first, then smaller id.
fn cmp_descending(a: &NeighborCandidate, b: &NeighborCandidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(b.pixel_count.cmp(&a.pixel_count))
        .then(a.neighbor.cmp(&b.neighbor))
}

// ---------------------------------------------------------------------------
// Back-projection parameters
// ---------------------------------------------------------------------------

/// Parameters for back-projection comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackprojectParams {
    /// Number of equal slices `[0, 1]` is divided into.
    pub num_percent_ranges: u32,
    /// How many of the top slices a neighbor's percentage may fall in.
    pub num_top_percent: u32,
    /// Round each percentage to the nearest slice boundary.
    pub round_percent: bool,
    /// Back-projection score a pixel needs to count as a match.
    pub min_graylevel: u8,
    /// Histogram bins per channel.
    pub num_bins: usize,
}

impl BackprojectParams {
    /// Minimum fraction of matching pixels:
    /// `1 - num_top_percent / num_percent_ranges`.
    #[must_use]
    pub fn threshold(&self) -> f64 {
        if self.num_percent_ranges == 0 {
            return 1.0;
        }
        1.0 - f64::from(self.num_top_percent) / f64::from(self.num_percent_ranges)
    }

    /// Width of one slice.
    #[must_use]
    pub fn slice_width(&self) -> f64 {
        if self.num_percent_ranges == 0 {
            return 1.0;
        }
        1.0 / f64::from(self.num_percent_ranges)
    }
}

/// Named back-projection presets.
///
/// Each keeps neighbors whose match fraction falls in the top
/// `num_top_percent` of `num_percent_ranges` slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackprojectRange {
    /// Top 5% (1 of 20), min gray 200, 16 bins.
    HighFive,
    /// Top 10% (2 of 20), min gray 200, 8 bins.
    HighFive8,
    /// Top 10% (2 of 20), min gray 200, 16 bins.
    HighTen,
    /// Top 15% (3 of 20), min gray 200, 16 bins.
    HighFifteen,
    /// Top 20% (4 of 20), min gray 200, 16 bins.
    HighTwenty,
    /// Top 50% (10 of 20), min gray 128, 8 bins.
    #[default]
    HighFifty,
    /// Top 50% (10 of 20), min gray 128, 16 bins.
    HighFifty16,
}

impl BackprojectRange {
    /// Every preset, in order of increasing permissiveness.
    pub const ALL: [Self; 7] = [
        Self::HighFive,
        Self::HighFive8,
        Self::HighTen,
        Self::HighFifteen,
        Self::HighTwenty,
        Self::HighFifty,
        Self::HighFifty16,
    ];

    /// The parameters this preset stands for.
    #[must_use]
    pub const fn params(self) -> BackprojectParams {
        let (top, min_graylevel, num_bins) = match self {
            Self::HighFive => (1, 200, 16),
            Self::HighFive8 => (2, 200, 8),
            Self::HighTen => (2, 200, 16),
            Self::HighFifteen => (3, 200, 16),
            Self::HighTwenty => (4, 200, 16),
            Self::HighFifty => (10, 128, 8),
            Self::HighFifty16 => (10, 128, 16),
        };
        BackprojectParams {
            num_percent_ranges: 20,
            num_top_percent: top,
            round_percent: false,
            min_graylevel,
            num_bins,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Similarity measures evaluated against one working image.
#[derive(Debug, Clone, Copy)]
pub struct Similarity<'a> {
    image: &'a RgbImage,
    colorspace: Colorspace,
    bins: usize,
}

impl<'a> Similarity<'a> {
    /// Engine over `image`, binning in `colorspace` with `bins` bins per
    /// channel for histogram and edge comparisons.
    #[must_use]
    pub const fn new(image: &'a RgbImage, colorspace: Colorspace, bins: usize) -> Self {
        Self {
            image,
            colorspace,
            bins,
        }
    }

    /// The working image.
    #[must_use]
    pub const fn image(&self) -> &'a RgbImage {
        self.image
    }

    fn pixels_of(&self, region: &Region) -> Vec<[u8; 3]> {
        region
            .coords()
            .iter()
            .map(|c| self.image.get_pixel(c.x, c.y).0)
            .collect()
    }

    /// Colors of every pixel of `id`, or `None` for a dead id.
    #[must_use]
    pub fn region_pixels(&self, graph: &SuperpixelGraph, id: RegionId) -> Option<Vec<[u8; 3]>> {
        graph.region(id).map(|r| self.pixels_of(r))
    }

    /// Histogram of `id` with `bins` bins per channel.
    ///
    /// # Errors
    ///
    /// Propagates [`ColorHistogram::from_pixels`] errors.
    pub fn histogram(
        &self,
        graph: &SuperpixelGraph,
        id: RegionId,
        bins: usize,
    ) -> Result<Option<ColorHistogram>, SegmentError> {
        self.region_pixels(graph, id)
            .map(|px| ColorHistogram::from_pixels(&px, bins, self.colorspace))
            .transpose()
    }

    /// Rank unlocked neighbors of `id` by histogram distance, most
    /// similar first. Ties go to the larger neighbor.
    ///
    /// # Errors
    ///
    /// Propagates histogram construction errors.
    pub fn compare_neighbors_by_histogram(
        &self,
        graph: &SuperpixelGraph,
        id: RegionId,
        locked: Option<&LockTable>,
    ) -> Result<Vec<NeighborCandidate>, SegmentError> {
        let Some(source) = self.histogram(graph, id, self.bins)? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for n in graph.neighbor_list(id) {
            if is_locked(locked, n) {
                continue;
            }
            let Some(hist) = self.histogram(graph, n, self.bins)? else {
                continue;
            };
            out.push(NeighborCandidate {
                score: source.bhattacharyya(&hist),
                pixel_count: graph.pixel_count(n).unwrap_or(0),
                neighbor: n,
            });
        }
        out.sort_by(cmp_ascending);
        Ok(out)
    }

    /// Fraction of `pixels` scoring at least `min_graylevel` (or above it
    /// when `strict`) under `hist`.
    #[allow(clippy::cast_precision_loss)]
    fn match_fraction(hist: &ColorHistogram, pixels: &[[u8; 3]], min: u8, strict: bool) -> f64 {
        if pixels.is_empty() {
            return 0.0;
        }
        let count = hist
            .back_project(pixels)
            .into_iter()
            .filter(|&s| if strict { s > min } else { s >= min })
            .count();
        count as f64 / pixels.len() as f64
    }

    /// Keep unlocked neighbors of `id` whose back-projection match
    /// fraction reaches [`BackprojectParams::threshold`], highest
    /// fraction first. Ties go to the larger neighbor.
    ///
    /// Returns an empty list straight away when every neighbor is
    /// locked.
    ///
    /// # Errors
    ///
    /// Propagates histogram construction errors.
    pub fn compare_neighbors_by_backprojection(
        &self,
        graph: &SuperpixelGraph,
        id: RegionId,
        locked: Option<&LockTable>,
        params: &BackprojectParams,
    ) -> Result<Vec<NeighborCandidate>, SegmentError> {
        let neighbors = graph.neighbor_list(id);
        if neighbors.iter().all(|&n| is_locked(locked, n)) {
            return Ok(Vec::new());
        }
        let Some(source) = self.histogram(graph, id, params.num_bins)? else {
            return Ok(Vec::new());
        };
        let threshold = params.threshold();
        let slice = params.slice_width();

        let mut out = Vec::new();
        for n in neighbors {
            if is_locked(locked, n) {
                continue;
            }
            let Some(pixels) = self.region_pixels(graph, n) else {
                continue;
            };
            let mut fraction =
                Self::match_fraction(&source, &pixels, params.min_graylevel, false);
            if fraction < threshold {
                continue;
            }
            if params.round_percent {
                fraction = (fraction / slice).round() * slice;
            }
            out.push(NeighborCandidate {
                score: fraction,
                pixel_count: pixels.len(),
                neighbor: n,
            });
        }
        out.sort_by(cmp_descending);
        Ok(out)
    }

    /// Grow outward from `seed` through neighbors that the seed's
    /// histogram back-projects onto strongly.
    ///
    /// A region is accepted when more than [`BackprojectParams::threshold`]
    /// of its pixels score above `min_graylevel`; only accepted regions
    /// extend the frontier. Locked regions are never accepted. Every
    /// region is examined at most once. The result is in acceptance
    /// order and never contains the seed.
    ///
    /// # Errors
    ///
    /// Propagates histogram construction errors.
    pub fn backprojection_flood_fill(
        &self,
        graph: &SuperpixelGraph,
        seed: RegionId,
        locked: Option<&LockTable>,
        params: &BackprojectParams,
    ) -> Result<Vec<RegionId>, SegmentError> {
        let Some(source) = self.histogram(graph, seed, params.num_bins)? else {
            return Ok(Vec::new());
        };
        let threshold = params.threshold();

        let mut stack = graph.neighbor_list(seed);
        let mut seen: HashSet<RegionId> = stack.iter().copied().collect();
        seen.insert(seed);

        let mut accepted = Vec::new();
        while let Some(id) = stack.pop() {
            if is_locked(locked, id) {
                continue;
            }
            let Some(pixels) = self.region_pixels(graph, id) else {
                continue;
            };
            let fraction = Self::match_fraction(&source, &pixels, params.min_graylevel, true);
            if fraction <= threshold {
                continue;
            }
            accepted.push(id);
            for n in graph.neighbor_list(id) {
                if seen.insert(n) {
                    stack.push(n);
                }
            }
        }
        Ok(accepted)
    }

    /// Histogram distance between the boundary pixels of `a` facing `b`
    /// and those of `b` facing `a`.
    ///
    /// Returns `None` if either id is dead or the regions do not touch.
    ///
    /// # Errors
    ///
    /// Propagates histogram construction errors.
    pub fn edge_weight(
        &self,
        graph: &SuperpixelGraph,
        a: RegionId,
        b: RegionId,
    ) -> Result<Option<f32>, SegmentError> {
        let (Some(ra), Some(rb)) = (graph.region(a), graph.region(b)) else {
            return Ok(None);
        };
        let (edge_a, edge_b) = Region::boundary_coords(ra, rb, graph.dimensions());
        if edge_a.is_empty() || edge_b.is_empty() {
            return Ok(None);
        }
        let px = |coords: &[crate::types::Coord]| -> Vec<[u8; 3]> {
            coords
                .iter()
                .map(|c| self.image.get_pixel(c.x, c.y).0)
                .collect()
        };
        let ha = ColorHistogram::from_pixels(&px(&edge_a), self.bins, self.colorspace)?;
        let hb = ColorHistogram::from_pixels(&px(&edge_b), self.bins, self.colorspace)?;
        #[allow(clippy::cast_possible_truncation)]
        let weight = ha.bhattacharyya(&hb) as f32;
        Ok(Some(weight))
    }

    /// Cached edge weight between `a` and `b`, computing and caching it
    /// on a miss.
    ///
    /// # Errors
    ///
    /// Propagates histogram construction errors.
    pub fn cached_edge_weight(
        &self,
        graph: &mut SuperpixelGraph,
        a: RegionId,
        b: RegionId,
    ) -> Result<Option<f32>, SegmentError> {
        if let Some(w) = graph.edges().strength(a, b) {
            return Ok(Some(w));
        }
        let weight = self.edge_weight(graph, a, b)?;
        if let Some(w) = weight {
            graph.edges_mut().set_strength(a, b, w);
        }
        Ok(weight)
    }

    /// Fill the edge weight cache for every neighbor of `id`. Returns the
    /// number of weights that had to be computed.
    ///
    /// # Errors
    ///
    /// Propagates histogram construction errors.
    pub fn check_neighbor_edge_weights(
        &self,
        graph: &mut SuperpixelGraph,
        id: RegionId,
    ) -> Result<usize, SegmentError> {
        let mut computed = 0;
        for n in graph.neighbor_list(id) {
            if graph.edges().strength(id, n).is_some() {
                continue;
            }
            if self.cached_edge_weight(graph, id, n)?.is_some() {
                computed += 1;
            }
        }
        Ok(computed)
    }

    /// Rank unlocked neighbors of `id` by edge weight, weakest edge
    /// first. Ties go to the larger neighbor.
    ///
    /// # Errors
    ///
    /// Propagates histogram construction errors.
    pub fn compare_neighbor_edges(
        &self,
        graph: &mut SuperpixelGraph,
        id: RegionId,
        locked: Option<&LockTable>,
    ) -> Result<Vec<NeighborCandidate>, SegmentError> {
        let mut out = Vec::new();
        for n in graph.neighbor_list(id) {
            if is_locked(locked, n) {
                continue;
            }
            let Some(weight) = self.cached_edge_weight(graph, id, n)? else {
                continue;
            };
            out.push(NeighborCandidate {
                score: f64::from(weight),
                pixel_count: graph.pixel_count(n).unwrap_or(0),
                neighbor: n,
            });
        }
        out.sort_by(cmp_ascending);
        Ok(out)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::tags::TagBuffer;
    use crate::types::Dimensions;

    const RED: [u8; 3] = [200, 0, 0];
    const BLUE: [u8; 3] = [0, 0, 200];

    fn id(n: u32) -> RegionId {
        RegionId::new(n)
    }

    /// A 3-column strip image; each column is its own region.
    fn strip(colors: [[u8; 3]; 3], height: u32) -> (RgbImage, SuperpixelGraph) {
        let image = RgbImage::from_fn(3, height, |x, _| image::Rgb(colors[x as usize]));
        let tags: Vec<u32> = (0..height).flat_map(|_| 0..3).collect();
        let buffer = TagBuffer::from_raw(Dimensions { width: 3, height }, tags).unwrap();
        (image, SuperpixelGraph::parse(&buffer).unwrap())
    }

    #[test]
    fn presets_match_table() {
        let p = BackprojectRange::HighFive.params();
        assert_eq!(
            (p.num_percent_ranges, p.num_top_percent, p.min_graylevel, p.num_bins),
            (20, 1, 200, 16)
        );
        let p = BackprojectRange::HighFifty.params();
        assert_eq!((p.num_top_percent, p.min_graylevel, p.num_bins), (10, 128, 8));
        assert!((p.threshold() - 0.5).abs() < 1e-12);
        assert!((BackprojectRange::HighTwenty.params().threshold() - 0.8).abs() < 1e-12);
        assert_eq!(BackprojectRange::ALL.len(), 7);
    }

    #[test]
    fn histogram_compare_prefers_identical_neighbor() {
        // Region 2 sits between a red region and a blue one and is red.
        let (image, graph) = strip([RED, RED, BLUE], 2);
        let engine = Similarity::new(&image, Colorspace::Rgb, 16);
        let ranked = engine
            .compare_neighbors_by_histogram(&graph, id(2), None)
            .unwrap();
        assert_eq!(ranked[0].neighbor, id(1));
        assert!(ranked[0].score < 1e-6);
        assert!((ranked[1].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn histogram_compare_skips_locked() {
        let (image, graph) = strip([RED, RED, BLUE], 2);
        let engine = Similarity::new(&image, Colorspace::Rgb, 16);
        let mut locked = LockTable::new();
        locked.lock(id(1));
        let ranked = engine
            .compare_neighbors_by_histogram(&graph, id(2), Some(&locked))
            .unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].neighbor, id(3));
    }

    #[test]
    fn backprojection_keeps_identical_color_at_full_match() {
        let (image, graph) = strip([RED, RED, BLUE], 2);
        let engine = Similarity::new(&image, Colorspace::Rgb, 16);
        let params = BackprojectParams {
            min_graylevel: 255,
            ..BackprojectRange::HighFive.params()
        };
        let ranked = engine
            .compare_neighbors_by_backprojection(&graph, id(2), None, &params)
            .unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].neighbor, id(1));
        assert!((ranked[0].score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn backprojection_all_locked_is_empty() {
        let (image, graph) = strip([RED, RED, BLUE], 2);
        let engine = Similarity::new(&image, Colorspace::Rgb, 16);
        let mut locked = LockTable::new();
        locked.lock(id(1));
        locked.lock(id(3));
        let ranked = engine
            .compare_neighbors_by_backprojection(
                &graph,
                id(2),
                Some(&locked),
                &BackprojectRange::HighFifty.params(),
            )
            .unwrap();
        assert!(ranked.is_empty());
    }

    #[test]
    fn backprojection_rounds_to_slices() {
        // Neighbor column is 3 of 4 matching pixels (0.75).
        let image = RgbImage::from_fn(2, 4, |x, y| {
            if x == 0 || y < 3 {
                image::Rgb(RED)
            } else {
                image::Rgb(BLUE)
            }
        });
        let tags = vec![0, 1, 0, 1, 0, 1, 0, 1];
        let buffer = TagBuffer::from_raw(
            Dimensions {
                width: 2,
                height: 4,
            },
            tags,
        )
        .unwrap();
        let graph = SuperpixelGraph::parse(&buffer).unwrap();
        let engine = Similarity::new(&image, Colorspace::Rgb, 16);
        let params = BackprojectParams {
            num_percent_ranges: 2,
            num_top_percent: 1,
            round_percent: true,
            min_graylevel: 128,
            num_bins: 16,
        };
        let ranked = engine
            .compare_neighbors_by_backprojection(&graph, id(1), None, &params)
            .unwrap();
        assert_eq!(ranked.len(), 1);
        assert!((ranked[0].score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn flood_fill_stops_at_dissimilar_region() {
        // R R B R: the fill from region 1 must not cross the blue column.
        let image = RgbImage::from_fn(4, 2, |x, _| {
            if x == 2 {
                image::Rgb(BLUE)
            } else {
                image::Rgb(RED)
            }
        });
        let tags: Vec<u32> = (0..2).flat_map(|_| 0..4).collect();
        let buffer = TagBuffer::from_raw(
            Dimensions {
                width: 4,
                height: 2,
            },
            tags,
        )
        .unwrap();
        let graph = SuperpixelGraph::parse(&buffer).unwrap();
        let engine = Similarity::new(&image, Colorspace::Rgb, 16);
        let filled = engine
            .backprojection_flood_fill(
                &graph,
                id(1),
                None,
                &BackprojectRange::HighFifty16.params(),
            )
            .unwrap();
        assert_eq!(filled, vec![id(2)]);
    }

    #[test]
    fn flood_fill_of_dead_seed_is_empty() {
        let (image, graph) = strip([RED, RED, BLUE], 2);
        let engine = Similarity::new(&image, Colorspace::Rgb, 16);
        let filled = engine
            .backprojection_flood_fill(&graph, id(40), None, &BackprojectRange::HighFifty16.params())
            .unwrap();
        assert!(filled.is_empty());
    }

    #[test]
    fn edge_weights_are_cached() {
        let (image, mut graph) = strip([RED, RED, BLUE], 2);
        let engine = Similarity::new(&image, Colorspace::Rgb, 8);
        assert_eq!(engine.check_neighbor_edge_weights(&mut graph, id(2)).unwrap(), 2);
        assert_eq!(engine.check_neighbor_edge_weights(&mut graph, id(2)).unwrap(), 0);
        let ranked = engine.compare_neighbor_edges(&mut graph, id(2), None).unwrap();
        assert_eq!(ranked[0].neighbor, id(1));
        assert!(ranked[0].score < 1e-6);
        assert!((graph.edges().strength(id(3), id(2)).unwrap() - 1.0).abs() < 1e-6);
    }
}
