//! Hooks for watching a merge run without changing it.
//!
//! Strategies report every contracted edge and every finished pass to a
//! [`MergeObserver`]. The default observer does nothing;
//! [`ArtifactRecorder`] keeps a rendered snapshot per pass.

use crate::graph::{MergeOutcome, SuperpixelGraph};
use crate::merge::MergeReport;
use crate::types::{GrayImage, RgbImage};
use crate::visualize::VisualizationContext;

/// Receives merge events. Both hooks default to doing nothing.
pub trait MergeObserver {
    /// Called after each edge contraction.
    fn on_merge(&mut self, _graph: &SuperpixelGraph, _outcome: MergeOutcome) {}

    /// Called once a strategy pass has finished.
    fn on_pass_complete(&mut self, _graph: &SuperpixelGraph, _report: &MergeReport) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl MergeObserver for NoopObserver {}

/// Image captured during a merge run.
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactImage {
    /// Region colors or mean colors.
    Rgb(RgbImage),
    /// Masks and size maps.
    Gray(GrayImage),
}

/// A labeled snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    /// Short file-name friendly label, e.g. `"03-breadth-first(8)"`.
    pub label: String,
    /// The rendered image.
    pub image: ArtifactImage,
}

/// Records region snapshots after every pass, plus a mask of the
/// regions that grew during the pass.
#[derive(Debug, Default)]
pub struct ArtifactRecorder {
    context: VisualizationContext,
    grown: Vec<crate::types::RegionId>,
    artifacts: Vec<Artifact>,
}

impl ArtifactRecorder {
    /// Empty recorder using the default color keys.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a snapshot outside of a merge pass, such as the graph
    /// right after parsing.
    pub fn snapshot(&mut self, label: impl Into<String>, graph: &SuperpixelGraph) {
        let image = self.context.render_region_colors(graph);
        self.artifacts.push(Artifact {
            label: label.into(),
            image: ArtifactImage::Rgb(image),
        });
    }

    /// Everything recorded so far, in order.
    #[must_use]
    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    /// Consume the recorder.
    #[must_use]
    pub fn into_artifacts(self) -> Vec<Artifact> {
        self.artifacts
    }
}

impl MergeObserver for ArtifactRecorder {
    fn on_merge(&mut self, _graph: &SuperpixelGraph, outcome: MergeOutcome) {
        if !self.grown.contains(&outcome.dst) {
            self.grown.push(outcome.dst);
        }
        self.grown.retain(|&id| id != outcome.src);
    }

    fn on_pass_complete(&mut self, graph: &SuperpixelGraph, report: &MergeReport) {
        let index = self.artifacts.len();
        self.snapshot(format!("{index:02}-{}", report.strategy), graph);
        if !self.grown.is_empty() {
            let mask = self.context.render_merge_mask(graph, &self.grown);
            self.artifacts.push(Artifact {
                label: format!("{index:02}-{}-merged", report.strategy),
                image: ArtifactImage::Gray(mask),
            });
        }
        self.grown.clear();
    }
}
