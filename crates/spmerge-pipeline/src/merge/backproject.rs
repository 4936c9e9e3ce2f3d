//! Back-projection driven merging, largest-first and smallest-first.
//!
//! Both variants sweep until no unlocked region is left. If anything
//! merged during the sweep, the regions that grew are unlocked and the
//! sweep starts over; otherwise the pass is done.

use std::collections::BTreeSet;

use super::{MergeContext, PassStats};
use crate::graph::SuperpixelGraph;
use crate::similarity::{BackprojectParams, LockTable};
use crate::types::{RegionId, SegmentError};

/// Unlock every region touched since the last clear. Returns `false`
/// when nothing was touched, meaning the pass is complete.
fn clear_touched(locked: &mut LockTable, touched: &mut BTreeSet<RegionId>) -> bool {
    if touched.is_empty() {
        return false;
    }
    for id in std::mem::take(touched) {
        locked.unlock(id);
    }
    true
}

/// Walk regions from a size-sorted snapshot, largest first. Every
/// neighbor passing `params` is merged into the region under
/// consideration, and the grown region is compared again until no
/// neighbor passes. Only then is it locked for the rest of the sweep;
/// it is unlocked again when the sweep restarts.
pub(super) fn merge_largest_first(
    graph: &mut SuperpixelGraph,
    ctx: &mut MergeContext<'_>,
    params: &BackprojectParams,
) -> Result<PassStats, SegmentError> {
    let mut locked = LockTable::new();
    let mut touched: BTreeSet<RegionId> = BTreeSet::new();
    let mut stats = PassStats::default();
    let mut order = graph.sorted_by_size().into_iter();

    loop {
        let Some(id) = order.next() else {
            if !clear_touched(&mut locked, &mut touched) {
                break;
            }
            stats.lock_clears += 1;
            order = graph.sorted_by_size().into_iter();
            continue;
        };
        if !graph.contains(id) || locked.is_locked(id) {
            continue;
        }

        let mut survivor = id;
        let merges_before = stats.merges;
        loop {
            let ranked = ctx.similarity.compare_neighbors_by_backprojection(
                graph,
                survivor,
                Some(&locked),
                params,
            )?;
            let merges_in_round = stats.merges;
            for candidate in ranked {
                if !graph.contains(candidate.neighbor) || candidate.neighbor == survivor {
                    continue;
                }
                survivor = ctx.merge(graph, survivor, candidate.neighbor)?.dst;
                stats.merges += 1;
            }
            if stats.merges == merges_in_round {
                break;
            }
        }
        locked.lock(survivor);
        if stats.merges > merges_before {
            touched.insert(survivor);
        }
    }
    Ok(stats)
}

/// Repeatedly take the smallest unlocked region and merge it with its
/// best back-projection match. The largest region is locked up front so
/// it can never be consumed.
pub(super) fn merge_smallest_first(
    graph: &mut SuperpixelGraph,
    ctx: &mut MergeContext<'_>,
    params: &BackprojectParams,
) -> Result<PassStats, SegmentError> {
    let mut locked = LockTable::new();
    let mut touched: BTreeSet<RegionId> = BTreeSet::new();
    let mut stats = PassStats::default();

    if let Some(largest) = graph.largest_where(|_| true) {
        locked.lock(largest);
    }

    loop {
        let Some(id) = graph.smallest_where(|r| !locked.is_locked(r)) else {
            if !clear_touched(&mut locked, &mut touched) {
                break;
            }
            stats.lock_clears += 1;
            continue;
        };

        let ranked = ctx
            .similarity
            .compare_neighbors_by_backprojection(graph, id, Some(&locked), params)?;
        let Some(best) = ranked.first() else {
            locked.lock(id);
            continue;
        };

        let outcome = ctx.merge(graph, id, best.neighbor)?;
        stats.merges += 1;
        if outcome.dst != id {
            touched.insert(outcome.dst);
        }
    }
    Ok(stats)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crate::merge::MergeStrategyKind;
    use crate::merge::tests::{fixture, run, run_logged};
    use crate::similarity::BackprojectRange;
    use crate::types::RegionId;

    const RED: [u8; 3] = [200, 10, 10];
    const BLUE: [u8; 3] = [10, 10, 200];

    #[test]
    fn largest_first_merges_similar_chain_only() {
        // R R B laid out as 1x3: the reds merge, blue stays.
        let (image, mut graph) = fixture(3, 1, &[0, 1, 2], &[RED, RED, BLUE]);
        let report = run(
            MergeStrategyKind::BackprojectLargest(BackprojectRange::HighFifty),
            &image,
            &mut graph,
        );
        assert_eq!(report.merges, 1);
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.pixel_count(RegionId::new(1)), Some(2));
        assert_eq!(graph.pixel_count(RegionId::new(3)), Some(1));
    }

    #[test]
    fn largest_first_sweeps_again_after_merges() {
        // Six single-pixel red regions beside a blue column: every red
        // region ends up in one.
        #[rustfmt::skip]
        let tags = [
            0, 1, 2, 6,
            3, 4, 5, 6,
        ];
        let palette = [RED, RED, RED, RED, RED, RED, BLUE];
        let (image, mut graph) = fixture(4, 2, &tags, &palette);
        let (report, merges) = run_logged(
            MergeStrategyKind::BackprojectLargest(BackprojectRange::HighTen),
            &image,
            &mut graph,
        );
        assert_eq!(graph.len(), 2);
        assert_eq!(report.merges, 5);
        // The first red region keeps growing until no red neighbor is
        // left, so nothing else ever absorbs a region.
        assert!(merges.iter().all(|m| m.dst == RegionId::new(1)), "{merges:?}");
        assert_eq!(report.lock_clears, 1);
        assert_eq!(graph.pixel_count(RegionId::new(1)), Some(6));
        assert_eq!(graph.pixel_count(RegionId::new(7)), Some(2));
    }

    #[test]
    fn largest_first_regrows_before_moving_on() {
        // A red chain 1-2-3-4 in a row; region 1 only touches region 2 at
        // first, so the chain is only absorbed by comparing again after
        // each round of merges.
        let (image, mut graph) = fixture(5, 1, &[0, 1, 2, 3, 4], &[RED, RED, RED, RED, BLUE]);
        let (report, merges) = run_logged(
            MergeStrategyKind::BackprojectLargest(BackprojectRange::HighFifty),
            &image,
            &mut graph,
        );
        let pairs: Vec<(u32, u32)> = merges.iter().map(|m| (m.dst.get(), m.src.get())).collect();
        assert_eq!(pairs, vec![(1, 2), (1, 3), (1, 4)]);
        assert_eq!(report.lock_clears, 1);
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn smallest_first_protects_largest_region() {
        // Large red block (tag 0) next to a small red region (tag 1) and
        // a small blue one (tag 2).
        #[rustfmt::skip]
        let tags = [
            0, 0, 1,
            0, 0, 2,
        ];
        let (image, mut graph) = fixture(3, 2, &tags, &[RED, RED, BLUE]);
        let report = run(
            MergeStrategyKind::BackprojectSmallest(BackprojectRange::HighFifty),
            &image,
            &mut graph,
        );
        // With the large region locked the small ones only see each
        // other, and red never matches blue.
        assert_eq!(report.merges, 0);
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn smallest_first_merges_small_pairs() {
        #[rustfmt::skip]
        let tags = [
            0, 0, 0, 1, 2,
            0, 0, 0, 3, 3,
        ];
        let (image, mut graph) = fixture(5, 2, &tags, &[BLUE, RED, RED, RED]);
        let report = run(
            MergeStrategyKind::BackprojectSmallest(BackprojectRange::HighFifty),
            &image,
            &mut graph,
        );
        assert_eq!(report.merges, 2);
        assert_eq!(graph.len(), 2);
    }
}
