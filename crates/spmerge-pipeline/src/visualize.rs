//! Renderings of a region graph for inspection.
//!
//! Region colors are derived from the region id with a keyed SipHash, so
//! the same id gets the same color in every snapshot of a run and no
//! shared color table is needed.

use std::collections::{HashMap, HashSet};
use std::hash::Hasher;

use petgraph::graph::NodeIndex;
use siphasher::sip::SipHasher13;

use crate::graph::SuperpixelGraph;
use crate::types::{GrayImage, RegionId, RgbImage};

/// Default SipHash keys for region colors.
const DEFAULT_KEYS: (u64, u64) = (0x7370_6d65_7267_6501, 0x636f_6c6f_7273_0002);

/// Color source for rendering regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisualizationContext {
    keys: (u64, u64),
}

impl Default for VisualizationContext {
    fn default() -> Self {
        Self { keys: DEFAULT_KEYS }
    }
}

impl VisualizationContext {
    /// Context with explicit hash keys. Different keys give a different
    /// but equally stable palette.
    #[must_use]
    pub const fn with_keys(k0: u64, k1: u64) -> Self {
        Self { keys: (k0, k1) }
    }

    fn hash(&self, value: u64) -> [u8; 3] {
        let mut hasher = SipHasher13::new_with_keys(self.keys.0, self.keys.1);
        hasher.write_u64(value);
        let [r, g, b, ..] = hasher.finish().to_le_bytes();
        [r, g, b]
    }

    /// Stable pseudo-random color for `id`.
    #[must_use]
    pub fn color_of(&self, id: RegionId) -> [u8; 3] {
        self.hash(u64::from(id.get()))
    }

    /// Every region filled with [`color_of`](Self::color_of).
    #[must_use]
    pub fn render_region_colors(&self, graph: &SuperpixelGraph) -> RgbImage {
        let dims = graph.dimensions();
        let mut out = RgbImage::new(dims.width, dims.height);
        for (id, coords) in graph.region_coords() {
            let color = image::Rgb(self.color_of(id));
            for c in coords {
                out.put_pixel(c.x, c.y, color);
            }
        }
        out
    }

    /// Every region filled with its mean color in `image`.
    #[must_use]
    #[allow(clippy::unused_self)]
    pub fn render_mean_colors(&self, graph: &SuperpixelGraph, image: &RgbImage) -> RgbImage {
        let dims = graph.dimensions();
        let mut out = RgbImage::new(dims.width, dims.height);
        for (id, coords) in graph.region_coords() {
            let color = image::Rgb(graph.mean_color(image, id).unwrap_or([0, 0, 0]));
            for c in coords {
                out.put_pixel(c.x, c.y, color);
            }
        }
        out
    }

    /// Regions shaded by size rank: the largest is white and each
    /// smaller one a step darker.
    #[must_use]
    #[allow(clippy::unused_self)]
    pub fn render_sizes(&self, graph: &SuperpixelGraph) -> GrayImage {
        let dims = graph.dimensions();
        let mut out = GrayImage::new(dims.width, dims.height);
        let order = graph.sorted_by_size();
        let n = order.len().max(1);
        for (rank, id) in order.into_iter().enumerate() {
            let level = u8::try_from(255 * (n - rank) / n).unwrap_or(u8::MAX);
            let Some(region) = graph.region(id) else {
                continue;
            };
            for c in region.coords() {
                out.put_pixel(c.x, c.y, image::Luma([level]));
            }
        }
        out
    }

    /// White where a pixel belongs to one of `ids`, black elsewhere.
    #[must_use]
    #[allow(clippy::unused_self)]
    pub fn render_merge_mask(&self, graph: &SuperpixelGraph, ids: &[RegionId]) -> GrayImage {
        let dims = graph.dimensions();
        let mut out = GrayImage::new(dims.width, dims.height);
        for &id in ids {
            let Some(region) = graph.region(id) else {
                continue;
            };
            for c in region.coords() {
                out.put_pixel(c.x, c.y, image::Luma([255]));
            }
        }
        out
    }

    /// Regions filled from a small palette such that no two neighbors
    /// share a color. See [`touching_colors`].
    #[must_use]
    pub fn render_touching(&self, graph: &SuperpixelGraph) -> RgbImage {
        let assignment = touching_colors(graph);
        let dims = graph.dimensions();
        let mut out = RgbImage::new(dims.width, dims.height);
        for (id, coords) in graph.region_coords() {
            let index = assignment.get(&id).copied().unwrap_or(0);
            let color = image::Rgb(self.hash(index as u64));
            for c in coords {
                out.put_pixel(c.x, c.y, color);
            }
        }
        out
    }
}

/// Greedy neighbor-distinct coloring.
///
/// Regions are visited largest first and each takes the lowest color
/// index none of its already colored neighbors uses.
#[must_use]
pub fn touching_colors(graph: &SuperpixelGraph) -> HashMap<RegionId, usize> {
    let adjacency = graph.adjacency_graph();
    let nodes: HashMap<RegionId, NodeIndex> = adjacency
        .node_indices()
        .map(|n| (adjacency[n], n))
        .collect();

    let mut colors: HashMap<RegionId, usize> = HashMap::with_capacity(nodes.len());
    for id in graph.sorted_by_size() {
        let Some(&node) = nodes.get(&id) else {
            continue;
        };
        let used: HashSet<usize> = adjacency
            .neighbors(node)
            .filter_map(|n| colors.get(&adjacency[n]).copied())
            .collect();
        let color = (0..=used.len())
            .find(|c| !used.contains(c))
            .unwrap_or(used.len());
        colors.insert(id, color);
    }
    colors
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::tags::TagBuffer;
    use crate::types::Dimensions;

    fn quadrants() -> SuperpixelGraph {
        #[rustfmt::skip]
        let tags = vec![
            0, 0, 1, 1,
            0, 0, 1, 1,
            2, 2, 3, 3,
            2, 2, 3, 4,
        ];
        let buffer = TagBuffer::from_raw(
            Dimensions {
                width: 4,
                height: 4,
            },
            tags,
        )
        .unwrap();
        SuperpixelGraph::parse(&buffer).unwrap()
    }

    #[test]
    fn colors_are_stable_per_id() {
        let ctx = VisualizationContext::default();
        let a = ctx.color_of(RegionId::new(7));
        assert_eq!(a, ctx.color_of(RegionId::new(7)));
        assert_eq!(a, VisualizationContext::default().color_of(RegionId::new(7)));
        assert_ne!(
            VisualizationContext::with_keys(1, 2).color_of(RegionId::new(7)),
            VisualizationContext::with_keys(3, 4).color_of(RegionId::new(7))
        );
    }

    #[test]
    fn region_colors_fill_each_region_uniformly() {
        let graph = quadrants();
        let ctx = VisualizationContext::default();
        let img = ctx.render_region_colors(&graph);
        assert_eq!(img.get_pixel(0, 0), img.get_pixel(1, 1));
        assert_eq!(img.get_pixel(0, 0).0, ctx.color_of(RegionId::new(1)));
    }

    #[test]
    fn sizes_make_largest_white() {
        let graph = quadrants();
        let img = VisualizationContext::default().render_sizes(&graph);
        // Regions 1-3 have four pixels; region 1 wins the tie.
        assert_eq!(img.get_pixel(0, 0).0[0], 255);
        assert!(img.get_pixel(3, 3).0[0] < img.get_pixel(2, 2).0[0]);
    }

    #[test]
    fn merge_mask_marks_only_requested_regions() {
        let graph = quadrants();
        let mask =
            VisualizationContext::default().render_merge_mask(&graph, &[RegionId::new(2)]);
        assert_eq!(mask.get_pixel(3, 0).0[0], 255);
        assert_eq!(mask.get_pixel(0, 0).0[0], 0);
    }

    #[test]
    fn touching_colors_differ_across_every_edge() {
        let graph = quadrants();
        let colors = touching_colors(&graph);
        assert_eq!(colors.len(), graph.len());
        for edge in graph.edge_list() {
            assert_ne!(colors[&edge.a()], colors[&edge.b()], "{edge:?}");
        }
    }
}
