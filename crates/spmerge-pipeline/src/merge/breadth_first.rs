//! Breadth-first expansion guarded by edge weights.
//!
//! Regions are expanded largest first. Each round back-projects the
//! region onto its neighbors, then merges the best-matching group in
//! order of increasing edge weight until an edge looks too strong
//! compared to the edges the region has already declined. A region is
//! locked as soon as it stops growing and is never revisited.
//!
//! Unusually large regions are locked up front so the expansion grows
//! toward them without swallowing what they enclose.

use std::collections::HashSet;

use super::{MergeContext, PassStats};
use crate::graph::{LARGE_REGION_MIN_SIZE, SuperpixelGraph};
use crate::similarity::{BackprojectParams, LockTable};
use crate::types::{RegionId, SegmentError};

/// Back-projection settings: top half of twenty slices, rounded.
const fn params(bins: usize) -> BackprojectParams {
    BackprojectParams {
        num_percent_ranges: 20,
        num_top_percent: 10,
        round_percent: true,
        min_graylevel: 128,
        num_bins: bins,
    }
}

pub(super) fn merge_breadth_first(
    graph: &mut SuperpixelGraph,
    ctx: &mut MergeContext<'_>,
    bins: usize,
) -> Result<PassStats, SegmentError> {
    let params = params(bins);
    let mut locked = LockTable::new();
    for id in graph.scan_largest(LARGE_REGION_MIN_SIZE) {
        locked.lock(id);
    }
    log::debug!("breadth-first: {} large regions locked", locked.len());

    let mut stats = PassStats::default();
    for id in graph.sorted_by_size() {
        if !graph.contains(id) || locked.is_locked(id) {
            continue;
        }
        stats.merges += expand(graph, ctx, &mut locked, id, &params)?;
    }
    Ok(stats)
}

/// Grow `id` until it hits a hard edge or runs out of candidates, then
/// lock it. Returns the number of merges.
fn expand(
    graph: &mut SuperpixelGraph,
    ctx: &mut MergeContext<'_>,
    locked: &mut LockTable,
    id: RegionId,
    params: &BackprojectParams,
) -> Result<usize, SegmentError> {
    let mut merges = 0;
    while graph.contains(id) {
        let ranked = ctx
            .similarity
            .compare_neighbors_by_backprojection(graph, id, Some(locked), params)?;
        ctx.similarity.check_neighbor_edge_weights(graph, id)?;
        let weights: Vec<(RegionId, f32)> = graph
            .neighbor_list(id)
            .into_iter()
            .filter_map(|n| graph.edges().strength(id, n).map(|w| (n, w)))
            .collect();

        let Some(best) = ranked.first() else {
            // Nothing left to grow into. Seed the declined history with
            // the surrounding edges if it is still empty.
            if let Some(region) = graph.region_mut(id) {
                if region.unmerged_edge_weights().is_empty() {
                    region.add_unmerged_edge_weights(weights.iter().map(|&(_, w)| w));
                }
            }
            locked.lock(id);
            break;
        };

        let candidates: HashSet<RegionId> = ranked.iter().map(|c| c.neighbor).collect();
        let declined: Vec<f32> = weights
            .iter()
            .filter(|(n, _)| !candidates.contains(n))
            .map(|&(_, w)| w)
            .collect();
        if let Some(region) = graph.region_mut(id) {
            region.add_unmerged_edge_weights(declined);
        }

        // Only the best percentage group is merged this round; the rest
        // is re-evaluated against the grown region.
        #[allow(clippy::float_cmp)]
        let mut top: Vec<(f32, usize, RegionId)> = ranked
            .iter()
            .take_while(|c| c.score == best.score)
            .filter_map(|c| {
                weights
                    .iter()
                    .find(|(n, _)| *n == c.neighbor)
                    .map(|&(_, w)| (w, c.pixel_count, c.neighbor))
            })
            .collect();
        top.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then(b.1.cmp(&a.1))
                .then(a.2.cmp(&b.2))
        });

        let mut rejected: Vec<f32> = Vec::new();
        let mut merged_this_round = 0;
        for (weight, _, neighbor) in top {
            if !rejected.is_empty() {
                rejected.push(weight);
                continue;
            }
            let Some(region) = graph.region_mut(id) else {
                break;
            };
            if !region.should_merge_edge(weight) {
                rejected.push(weight);
                continue;
            }
            region.add_merged_edge_weight(weight);
            let outcome = ctx.merge(graph, id, neighbor)?;
            merged_this_round += 1;
            if outcome.src == id {
                break;
            }
        }
        merges += merged_this_round;

        if !rejected.is_empty() {
            if let Some(region) = graph.region_mut(id) {
                region.add_unmerged_edge_weights(rejected);
            }
            locked.lock(id);
            break;
        }
        if merged_this_round == 0 {
            locked.lock(id);
            break;
        }
    }
    Ok(merges)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crate::merge::MergeStrategyKind;
    use crate::merge::tests::{fixture, run};
    use crate::types::RegionId;

    const RED: [u8; 3] = [200, 10, 10];
    const BLUE: [u8; 3] = [10, 10, 200];
    const STRATEGY: MergeStrategyKind = MergeStrategyKind::BreadthFirst { bins: 8 };

    fn id(n: u32) -> RegionId {
        RegionId::new(n)
    }

    #[test]
    fn uniform_row_grows_into_one_region() {
        let (image, mut graph) = fixture(4, 1, &[0, 1, 2, 3], &[RED; 4]);
        let report = run(STRATEGY, &image, &mut graph);
        assert_eq!(report.merges, 3);
        assert_eq!(graph.len(), 1);
        let region = graph.region(id(1)).unwrap();
        assert_eq!(region.merged_edge_weights().len(), 3);
        assert_eq!(report.lock_clears, 0);
    }

    #[test]
    fn dissimilar_neighbor_is_declined() {
        let (image, mut graph) = fixture(2, 1, &[0, 1], &[RED, BLUE]);
        let report = run(STRATEGY, &image, &mut graph);
        assert_eq!(report.merges, 0);
        assert_eq!(graph.len(), 2);
        let declined = graph.region(id(1)).unwrap().unmerged_edge_weights();
        assert_eq!(declined.len(), 1);
        assert!((declined[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn hard_edge_history_stops_expansion() {
        let (image, mut graph) = fixture(3, 1, &[0, 1, 2], &[RED; 3]);
        graph
            .region_mut(id(1))
            .unwrap()
            .add_unmerged_edge_weights([0.0]);
        let report = run(STRATEGY, &image, &mut graph);
        assert_eq!(report.merges, 0);
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.region(id(1)).unwrap().unmerged_edge_weights().len(), 2);
        // Region 2 declines the locked region 1 and then refuses region 3.
        assert_eq!(graph.region(id(2)).unwrap().unmerged_edge_weights().len(), 2);
    }
}
