//! Flood-fill merging: every region a back-projection flood fill from
//! the largest unlocked region reaches is merged into it in one go.

use super::{MergeContext, PassStats};
use crate::graph::SuperpixelGraph;
use crate::similarity::{BackprojectRange, LockTable};
use crate::types::SegmentError;

pub(super) fn merge_flood_fill(
    graph: &mut SuperpixelGraph,
    ctx: &mut MergeContext<'_>,
) -> Result<PassStats, SegmentError> {
    let params = BackprojectRange::HighFifty16.params();
    let mut locked = LockTable::new();
    let mut stats = PassStats::default();

    while let Some(seed) = graph.largest_where(|r| !locked.is_locked(r)) {
        let filled = ctx
            .similarity
            .backprojection_flood_fill(graph, seed, Some(&locked), &params)?;

        let mut survivor = seed;
        for id in filled {
            if !graph.contains(id) || id == survivor {
                continue;
            }
            survivor = ctx.merge(graph, survivor, id)?.dst;
            stats.merges += 1;
        }
        locked.lock(seed);
        locked.lock(survivor);
    }
    Ok(stats)
}
