//! Alike-sweep: grow the largest unlocked region into its most similar
//! neighbor for as long as the histogram distance keeps rising smoothly.

use std::collections::HashMap;

use super::{MergeContext, PassStats};
use crate::graph::SuperpixelGraph;
use crate::similarity::LockTable;
use crate::stats::pos_sample_within_bound;
use crate::types::{RegionId, SegmentError};

pub(super) fn merge_alike(
    graph: &mut SuperpixelGraph,
    ctx: &mut MergeContext<'_>,
) -> Result<PassStats, SegmentError> {
    let mut locked = LockTable::new();
    let mut accepted: HashMap<RegionId, Vec<f32>> = HashMap::new();
    let mut stats = PassStats::default();

    while let Some(id) = graph.largest_where(|r| !locked.is_locked(r)) {
        let ranked = ctx
            .similarity
            .compare_neighbors_by_histogram(graph, id, Some(&locked))?;
        let Some(best) = ranked.first().copied() else {
            locked.lock(id);
            continue;
        };

        #[allow(clippy::cast_possible_truncation)]
        let weight = best.score as f32;
        let history = accepted.remove(&id).unwrap_or_default();
        if !pos_sample_within_bound(&history, weight) {
            accepted.insert(id, history);
            locked.lock(id);
            continue;
        }

        let mut history = history;
        if weight != 0.0 {
            history.push(weight);
        }
        let outcome = ctx.merge(graph, id, best.neighbor)?;
        accepted.remove(&outcome.src);
        accepted.insert(outcome.dst, history);
        stats.merges += 1;
    }
    Ok(stats)
}
