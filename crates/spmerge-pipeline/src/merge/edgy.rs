//! Edgy-region consolidation.
//!
//! Thin regions that are almost entirely border usually trace an edge
//! between two smooth areas. They are merged with each other, never with
//! their smooth neighbors, so each such edge ends up as one region.

use std::collections::BTreeSet;

use super::{EDGY_FRACTION, MergeContext, PassStats};
use crate::graph::{LARGE_REGION_MIN_SIZE, SuperpixelGraph, region_border_coords};
use crate::similarity::LockTable;
use crate::types::{RegionId, SegmentError};

/// Regions whose border pixels make up more than [`EDGY_FRACTION`] of
/// their area.
///
/// Unusually large regions and regions with a single neighbor (fully
/// enclosed) are never edgy.
#[must_use]
pub fn find_edgy_regions(graph: &SuperpixelGraph) -> BTreeSet<RegionId> {
    let large: BTreeSet<RegionId> = graph
        .scan_largest(LARGE_REGION_MIN_SIZE)
        .into_iter()
        .collect();
    let owners = graph.owner_map();

    let mut edgy = BTreeSet::new();
    for &id in graph.ids() {
        if large.contains(&id) || graph.neighbors(id).is_none_or(|n| n.len() <= 1) {
            continue;
        }
        let Some(size) = graph.pixel_count(id).filter(|&n| n > 0) else {
            continue;
        };
        let border = region_border_coords(graph, &owners, id).len();
        #[allow(clippy::cast_precision_loss)]
        let fraction = border as f32 / size as f32;
        if fraction > EDGY_FRACTION {
            edgy.insert(id);
        }
    }
    edgy
}

pub(super) fn merge_edgy(
    graph: &mut SuperpixelGraph,
    ctx: &mut MergeContext<'_>,
) -> Result<PassStats, SegmentError> {
    let mut worklist = find_edgy_regions(graph);
    log::debug!("{} edgy regions out of {}", worklist.len(), graph.len());
    let mut stats = PassStats::default();

    while let Some(&id) = worklist.first() {
        let mut locked = LockTable::new();
        for n in graph.neighbor_list(id) {
            if !worklist.contains(&n) {
                locked.lock(n);
            }
        }

        let ranked = ctx
            .similarity
            .compare_neighbor_edges(graph, id, Some(&locked))?;
        let merges_before = stats.merges;

        for (i, candidate) in ranked.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let weight = candidate.score as f32;
            let Some(region) = graph.region(id) else {
                break;
            };
            if !region.should_merge_edge(weight) {
                #[allow(clippy::cast_possible_truncation)]
                let rest = ranked[i..].iter().map(|c| c.score as f32);
                if let Some(region) = graph.region_mut(id) {
                    region.add_unmerged_edge_weights(rest);
                }
                break;
            }
            if !graph.contains(candidate.neighbor) {
                continue;
            }

            let outcome = ctx.merge(graph, id, candidate.neighbor)?;
            stats.merges += 1;
            if let Some(survivor) = graph.region_mut(outcome.dst) {
                survivor.add_merged_edge_weight(weight);
            }
            worklist.remove(&outcome.src);
            if outcome.src == id {
                break;
            }
        }

        if stats.merges == merges_before {
            worklist.remove(&id);
        }
    }
    Ok(stats)
}
