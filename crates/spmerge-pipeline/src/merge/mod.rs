//! Merge strategies: loops that repeatedly pick a region, rank its
//! neighbors and contract edges until a terminal condition holds.
//!
//! This module defines the [`MergeStrategy`] trait and the
//! [`MergeStrategyKind`] enum for selecting strategies at runtime.
//!
//! # Locking
//!
//! Every strategy keeps a per-pass [`LockTable`](crate::LockTable). A
//! region is locked once the strategy finds nothing more to do with it;
//! locked regions are neither selected nor offered as candidates. Some
//! strategies unlock the regions they touched after a full sweep and
//! sweep again.
//!
//! # Stale ids
//!
//! Strategies hold id lists taken before they start merging. Any of
//! those ids may be absorbed along the way, so every lookup is
//! `Option`-based and a missing region is skipped.

mod alike;
mod backproject;
mod breadth_first;
mod edgy;
mod flood_fill;
mod small;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::graph::{MergeOutcome, SuperpixelGraph};
use crate::observer::MergeObserver;
use crate::similarity::{BackprojectRange, Similarity};
use crate::types::{RegionId, SegmentError};

pub use edgy::find_edgy_regions;
pub use small::{SMALL_REGION_FLOOR, filter_out_very_large_neighbors};

/// Fraction of border pixels above which a region counts as edgy.
pub const EDGY_FRACTION: f32 = 0.90;

/// Selects which merge strategy to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeStrategyKind {
    /// Merge uniform regions into uniform neighbors of the same color.
    Identical,
    /// Largest region first; accept the most similar neighbor while its
    /// histogram distance stays inside the adaptive window.
    AlikeSweep,
    /// Largest region first; merge every neighbor passing the
    /// back-projection preset.
    BackprojectLargest(BackprojectRange),
    /// Smallest region first; merge the best neighbor passing the
    /// back-projection preset. The largest region is never touched.
    BackprojectSmallest(BackprojectRange),
    /// Largest region first; merge everything a back-projection flood
    /// fill reaches.
    FloodFill,
    /// Absorb regions below [`SMALL_REGION_FLOOR`] pixels into their
    /// most similar neighbor.
    SmallRegions,
    /// Merge thin regions that are almost all border with each other
    /// while the edge weight stays acceptable.
    EdgyRegions,
    /// Largest region first; merge the top back-projection bin in edge
    /// weight order while the adaptive edge test accepts.
    BreadthFirst {
        /// Histogram bins per channel for back-projection.
        bins: usize,
    },
}

impl MergeStrategyKind {
    /// The order [`SegmentConfig::default`](crate::SegmentConfig) runs.
    #[must_use]
    pub fn default_sequence() -> Vec<Self> {
        vec![
            Self::Identical,
            Self::BackprojectLargest(BackprojectRange::HighFifty),
            Self::BreadthFirst { bins: 8 },
            Self::EdgyRegions,
            Self::SmallRegions,
        ]
    }
}

impl fmt::Display for MergeStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identical => write!(f, "identical"),
            Self::AlikeSweep => write!(f, "alike-sweep"),
            Self::BackprojectLargest(range) => write!(f, "backproject-largest({range:?})"),
            Self::BackprojectSmallest(range) => write!(f, "backproject-smallest({range:?})"),
            Self::FloodFill => write!(f, "flood-fill"),
            Self::SmallRegions => write!(f, "small-regions"),
            Self::EdgyRegions => write!(f, "edgy-regions"),
            Self::BreadthFirst { bins } => write!(f, "breadth-first({bins})"),
        }
    }
}

/// Outcome of one strategy pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    /// Which strategy ran.
    pub strategy: String,
    /// Edges contracted.
    pub merges: usize,
    /// Times touched regions were unlocked for another sweep.
    pub lock_clears: usize,
    /// Live regions before the pass.
    pub regions_before: usize,
    /// Live regions after the pass.
    pub regions_after: usize,
}

/// Counters a strategy accumulates while it runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PassStats {
    pub merges: usize,
    pub lock_clears: usize,
}

/// Everything a strategy needs besides the graph.
pub struct MergeContext<'a> {
    /// Similarity measures over the working image.
    pub similarity: Similarity<'a>,
    /// Hook invoked on every merge and at the end of every pass.
    pub observer: &'a mut dyn MergeObserver,
}

impl<'a> MergeContext<'a> {
    /// Bundle a similarity engine and an observer.
    pub fn new(similarity: Similarity<'a>, observer: &'a mut dyn MergeObserver) -> Self {
        Self {
            similarity,
            observer,
        }
    }

    /// Contract `a`-`b` and notify the observer.
    pub(crate) fn merge(
        &mut self,
        graph: &mut SuperpixelGraph,
        a: RegionId,
        b: RegionId,
    ) -> Result<MergeOutcome, SegmentError> {
        let outcome = graph.merge_edge(a, b)?;
        self.observer.on_merge(graph, outcome);
        Ok(outcome)
    }
}

/// Trait for merge strategies.
pub trait MergeStrategy {
    /// Run the strategy to completion on `graph`.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::Internal`] if a graph invariant breaks,
    /// or a histogram error if a similarity measure cannot be built.
    fn run(
        &self,
        graph: &mut SuperpixelGraph,
        ctx: &mut MergeContext<'_>,
    ) -> Result<MergeReport, SegmentError>;
}

impl MergeStrategy for MergeStrategyKind {
    fn run(
        &self,
        graph: &mut SuperpixelGraph,
        ctx: &mut MergeContext<'_>,
    ) -> Result<MergeReport, SegmentError> {
        let regions_before = graph.len();
        let stats = match *self {
            Self::Identical => identical(graph, ctx)?,
            Self::AlikeSweep => alike::merge_alike(graph, ctx)?,
            Self::BackprojectLargest(range) => {
                backproject::merge_largest_first(graph, ctx, &range.params())?
            }
            Self::BackprojectSmallest(range) => {
                backproject::merge_smallest_first(graph, ctx, &range.params())?
            }
            Self::FloodFill => flood_fill::merge_flood_fill(graph, ctx)?,
            Self::SmallRegions => small::merge_small(graph, ctx)?,
            Self::EdgyRegions => edgy::merge_edgy(graph, ctx)?,
            Self::BreadthFirst { bins } => breadth_first::merge_breadth_first(graph, ctx, bins)?,
        };
        let report = MergeReport {
            strategy: self.to_string(),
            merges: stats.merges,
            lock_clears: stats.lock_clears,
            regions_before,
            regions_after: graph.len(),
        };
        log::debug!(
            "{}: {} merges, {} lock clears, {} -> {} regions",
            report.strategy,
            report.merges,
            report.lock_clears,
            report.regions_before,
            report.regions_after
        );
        ctx.observer.on_pass_complete(graph, &report);
        Ok(report)
    }
}

/// Identical-color merging, counted as a strategy pass.
fn identical(
    graph: &mut SuperpixelGraph,
    ctx: &mut MergeContext<'_>,
) -> Result<PassStats, SegmentError> {
    let image = ctx.similarity.image();
    let observer = &mut *ctx.observer;
    let merges = graph.merge_identical_with(image, |g, outcome| observer.on_merge(g, outcome))?;
    Ok(PassStats {
        merges,
        lock_clears: 0,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use crate::histogram::Colorspace;
    use crate::observer::NoopObserver;
    use crate::tags::TagBuffer;
    use crate::types::{Dimensions, RgbImage};

    /// Parse a tag layout and paint each tag with `palette[tag]`.
    pub(crate) fn fixture(
        width: u32,
        height: u32,
        tags: &[u32],
        palette: &[[u8; 3]],
    ) -> (RgbImage, SuperpixelGraph) {
        let image = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb(palette[tags[(y * width + x) as usize] as usize])
        });
        let buffer = TagBuffer::from_raw(Dimensions { width, height }, tags.to_vec()).unwrap();
        (image, SuperpixelGraph::parse(&buffer).unwrap())
    }

    pub(crate) fn run(
        kind: MergeStrategyKind,
        image: &RgbImage,
        graph: &mut SuperpixelGraph,
    ) -> MergeReport {
        let mut observer = NoopObserver;
        let mut ctx = MergeContext::new(Similarity::new(image, Colorspace::Rgb, 8), &mut observer);
        let report = kind.run(graph, &mut ctx).unwrap();
        graph.check_invariants().unwrap();
        report
    }

    /// Collects every contraction in order.
    #[derive(Default)]
    struct MergeLog(Vec<MergeOutcome>);

    impl MergeObserver for MergeLog {
        fn on_merge(&mut self, _graph: &SuperpixelGraph, outcome: MergeOutcome) {
            self.0.push(outcome);
        }
    }

    /// Like [`run`], also returning each merge in the order it happened.
    pub(crate) fn run_logged(
        kind: MergeStrategyKind,
        image: &RgbImage,
        graph: &mut SuperpixelGraph,
    ) -> (MergeReport, Vec<MergeOutcome>) {
        let mut log = MergeLog::default();
        let report = {
            let mut ctx = MergeContext::new(Similarity::new(image, Colorspace::Rgb, 8), &mut log);
            kind.run(graph, &mut ctx).unwrap()
        };
        graph.check_invariants().unwrap();
        (report, log.0)
    }

    #[test]
    fn display_names() {
        assert_eq!(MergeStrategyKind::Identical.to_string(), "identical");
        assert_eq!(
            MergeStrategyKind::BackprojectLargest(BackprojectRange::HighTen).to_string(),
            "backproject-largest(HighTen)"
        );
        assert_eq!(
            MergeStrategyKind::BreadthFirst { bins: 8 }.to_string(),
            "breadth-first(8)"
        );
    }

    #[test]
    fn default_sequence_starts_with_identical() {
        let seq = MergeStrategyKind::default_sequence();
        assert_eq!(seq[0], MergeStrategyKind::Identical);
        assert_eq!(seq.len(), 5);
    }

    #[test]
    fn identical_pass_reports_counts() {
        let (image, mut graph) = fixture(2, 2, &[0, 1, 2, 3], &[[9, 9, 9]; 4]);
        let report = run(MergeStrategyKind::Identical, &image, &mut graph);
        assert_eq!(report.merges, 3);
        assert_eq!(report.regions_before, 4);
        assert_eq!(report.regions_after, 1);
    }

    #[test]
    fn kind_serde_round_trip() {
        let kinds = vec![
            MergeStrategyKind::BackprojectSmallest(BackprojectRange::HighFive8),
            MergeStrategyKind::BreadthFirst { bins: 16 },
            MergeStrategyKind::EdgyRegions,
        ];
        let json = serde_json::to_string(&kinds).unwrap();
        let back: Vec<MergeStrategyKind> = serde_json::from_str(&json).unwrap();
        assert_eq!(kinds, back);
    }
}
