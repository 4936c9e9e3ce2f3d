//! Small-region cleanup: regions below [`SMALL_REGION_FLOOR`] pixels are
//! merged into their most similar neighbor, steering away from
//! neighbors that dwarf the rest.

use super::{MergeContext, PassStats};
use crate::graph::SuperpixelGraph;
use crate::similarity::LockTable;
use crate::stats::mean_stddev;
use crate::types::{RegionId, SegmentError};

/// Regions with fewer pixels than this are considered small.
pub const SMALL_REGION_FLOOR: usize = 10;

/// Size spread below which no neighbor is treated as very large.
const MIN_SIZE_STDDEV: f32 = 10.0;

/// Neighbors of a region that are much larger than its other neighbors.
///
/// `neighbors` is sorted by size, largest first. While more than one
/// remains, the largest is excluded if its size exceeds
/// `mean + 0.5 * stddev` of the remaining sizes. Sizes spread by less
/// than ten pixels never exclude anything. Returns the excluded ids,
/// largest first.
#[must_use]
pub fn filter_out_very_large_neighbors(
    graph: &SuperpixelGraph,
    neighbors: &[RegionId],
) -> Vec<RegionId> {
    let mut sized: Vec<(usize, RegionId)> = neighbors
        .iter()
        .filter_map(|&id| graph.pixel_count(id).map(|n| (n, id)))
        .collect();
    sized.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    let mut excluded = Vec::new();
    let mut start = 0;
    while sized.len() - start > 1 {
        #[allow(clippy::cast_precision_loss)]
        let sizes: Vec<f32> = sized[start..].iter().map(|&(n, _)| n as f32).collect();
        let (mean, stddev) = mean_stddev(&sizes);
        if stddev < MIN_SIZE_STDDEV {
            break;
        }
        let bound = stddev.mul_add(0.5, mean);
        if sizes[0] > bound {
            excluded.push(sized[start].1);
            start += 1;
        } else {
            break;
        }
    }
    excluded
}

pub(super) fn merge_small(
    graph: &mut SuperpixelGraph,
    ctx: &mut MergeContext<'_>,
) -> Result<PassStats, SegmentError> {
    let small: Vec<RegionId> = graph
        .ids()
        .iter()
        .copied()
        .filter(|&id| graph.pixel_count(id).is_some_and(|n| n < SMALL_REGION_FLOOR))
        .collect();
    log::debug!("{} regions below {SMALL_REGION_FLOOR} pixels", small.len());

    let mut stats = PassStats::default();
    for id in small {
        while graph
            .pixel_count(id)
            .is_some_and(|n| n < SMALL_REGION_FLOOR)
        {
            let neighbors = graph.neighbor_list(id);
            let mut locked = LockTable::new();
            for large in filter_out_very_large_neighbors(graph, &neighbors) {
                locked.lock(large);
            }

            let ranked = ctx
                .similarity
                .compare_neighbors_by_histogram(graph, id, Some(&locked))?;
            let Some(best) = ranked.first() else {
                break;
            };
            // Among equally similar neighbors take the smallest, which
            // sorts last.
            #[allow(clippy::float_cmp)]
            let target = ranked
                .iter()
                .take_while(|c| c.score == best.score)
                .last()
                .map_or(best.neighbor, |c| c.neighbor);

            ctx.merge(graph, id, target)?;
            stats.merges += 1;
        }
    }
    Ok(stats)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::merge::MergeStrategyKind;
    use crate::merge::tests::{fixture, run};

    const RED: [u8; 3] = [200, 10, 10];
    const BLUE: [u8; 3] = [10, 10, 200];

    fn id(n: u32) -> RegionId {
        RegionId::new(n)
    }

    #[test]
    fn filter_excludes_dominant_neighbor() {
        // Region 1 is 40 pixels wide; regions 2 and 3 are 1 pixel each,
        // region 4 is 2 pixels.
        let mut tags = vec![0; 40];
        tags.extend([1, 2, 3, 3]);
        let (_, graph) = fixture(44, 1, &tags, &[RED; 4]);
        let excluded = filter_out_very_large_neighbors(&graph, &[id(1), id(2), id(3), id(4)]);
        assert_eq!(excluded, vec![id(1)]);
    }

    #[test]
    fn filter_keeps_similar_sizes() {
        let (_, graph) = fixture(4, 1, &[0, 1, 2, 2], &[RED; 3]);
        assert!(filter_out_very_large_neighbors(&graph, &[id(1), id(2), id(3)]).is_empty());
        assert!(filter_out_very_large_neighbors(&graph, &[id(1)]).is_empty());
    }

    #[test]
    fn small_region_merges_into_similar_neighbor() {
        // A red column between a blue block and a red block.
        #[rustfmt::skip]
        let tags = [
            0, 0, 0, 0, 0, 1, 2, 2, 2, 2, 2,
            0, 0, 0, 0, 0, 1, 2, 2, 2, 2, 2,
        ];
        let (image, mut graph) = fixture(11, 2, &tags, &[BLUE, RED, RED]);
        let report = run(MergeStrategyKind::SmallRegions, &image, &mut graph);
        assert_eq!(report.merges, 1);
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.pixel_count(id(3)), Some(12));
        assert_eq!(graph.pixel_count(id(1)), Some(10));
    }

    #[test]
    fn keeps_merging_until_no_longer_small() {
        // Five two-pixel regions in a row: the first keeps absorbing its
        // neighbor until it reaches ten pixels.
        let tags: Vec<u32> = (0..10).map(|x| x / 2).collect();
        let (image, mut graph) = fixture(10, 1, &tags, &[RED; 5]);
        let report = run(MergeStrategyKind::SmallRegions, &image, &mut graph);
        assert_eq!(graph.len(), 1);
        assert_eq!(report.merges, 4);
    }
}
