//! Incremental pipeline: advance stage by stage, inspecting each
//! intermediate result before continuing.
//!
//! Unlike [`crate::process`] which runs the entire pipeline in one call,
//! [`Pipeline`] lets the caller drive execution one step at a time:
//!
//! ```rust
//! # use spmerge_pipeline::{Pipeline, SegmentConfig, SegmentError};
//! # fn run(png: Vec<u8>) -> Result<(), SegmentError> {
//! let merged = Pipeline::new(png, SegmentConfig::default())
//!     .decode()?
//!     .quantize()?
//!     .propose()?
//!     .parse()?
//!     .merge()?;
//!
//! println!("{} regions", merged.graph().len());
//! let result = merged.into_result()?;
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next stage, carrying
//! the working image and everything needed downstream. The caller can
//! inspect the current stage's output through accessors at any point.
//!
//! # Memory
//!
//! Every stage from [`Quantized`] onward keeps both the decoded image
//! and the working image. Callers that only need the final tags should
//! prefer [`crate::process`].

use crate::diagnostics::StageMetrics;
use crate::graph::SuperpixelGraph;
use crate::merge::{MergeContext, MergeReport, MergeStrategy};
use crate::observer::{Artifact, ArtifactRecorder, MergeObserver, NoopObserver};
use crate::peaks::{ClusterEstimate, estimate_cluster_count, posterize};
use crate::propose::RegionProposer;
use crate::quantize::{MedianCutReducer, reduce_image};
use crate::rescan::rescan_largest;
use crate::similarity::Similarity;
use crate::tags::TagBuffer;
use crate::types::{
    Dimensions, GrayImage, RegionSummary, RgbImage, SegmentConfig, SegmentError, SegmentResult,
};

/// Channel levels the image is collapsed to before cluster estimation.
pub const ESTIMATE_POSTERIZE_LEVELS: u8 = 8;

/// Entry point for the staged pipeline.
pub struct Pipeline;

impl Pipeline {
    /// Start a pipeline over encoded image bytes.
    pub fn new(source: Vec<u8>, config: SegmentConfig) -> Pending {
        Pending { config, source }
    }
}

fn dimensions_of(image: &RgbImage) -> Dimensions {
    Dimensions {
        width: image.width(),
        height: image.height(),
    }
}

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing has occurred.
#[must_use = "pipeline stages are consumed by advancing, call .decode() to continue"]
pub struct Pending {
    config: SegmentConfig,
    source: Vec<u8>,
}

impl Pending {
    /// The raw source image bytes.
    #[must_use]
    pub fn source(&self) -> &[u8] {
        &self.source
    }

    /// Validate the config, decode the source image and advance to
    /// [`Decoded`].
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::InvalidConfig`] for a bad config,
    /// [`SegmentError::EmptyInput`] if the source bytes are empty or the
    /// image has no pixels, and [`SegmentError::ImageDecode`] if the
    /// image format is unrecognized or the data is corrupt.
    pub fn decode(self) -> Result<Decoded, SegmentError> {
        self.config.validate()?;
        if self.source.is_empty() {
            return Err(SegmentError::EmptyInput);
        }
        let original = image::load_from_memory(&self.source)?.to_rgb8();
        if original.width() == 0 || original.height() == 0 {
            return Err(SegmentError::EmptyInput);
        }
        log::debug!(
            "decoded {}x{} image from {} bytes",
            original.width(),
            original.height(),
            self.source.len()
        );
        Ok(Decoded {
            config: self.config,
            original,
            source_len: self.source.len(),
            estimate_mask: None,
        })
    }
}

// ───────────────────────── Stage 1: Decoded ──────────────────────────

/// Pipeline state after decoding the source image.
#[must_use = "pipeline stages are consumed by advancing, call .quantize() to continue"]
pub struct Decoded {
    config: SegmentConfig,
    original: RgbImage,
    source_len: usize,
    estimate_mask: Option<GrayImage>,
}

impl Decoded {
    /// Start a pipeline from an already decoded image.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::InvalidConfig`] for a bad config and
    /// [`SegmentError::EmptyInput`] for an image without pixels.
    pub fn from_image(image: RgbImage, config: SegmentConfig) -> Result<Self, SegmentError> {
        config.validate()?;
        if image.width() == 0 || image.height() == 0 {
            return Err(SegmentError::EmptyInput);
        }
        Ok(Self {
            config,
            original: image,
            source_len: 0,
            estimate_mask: None,
        })
    }

    /// Restrict the cluster estimate to the pixels where `mask` is
    /// non-zero. Palette reduction still covers the whole image.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::InvalidConfig`] when `mask` and the image
    /// differ in size.
    pub fn with_estimate_mask(mut self, mask: GrayImage) -> Result<Self, SegmentError> {
        if mask.dimensions() != self.original.dimensions() {
            return Err(SegmentError::InvalidConfig(format!(
                "estimate mask is {}x{} but the image is {}x{}",
                mask.width(),
                mask.height(),
                self.original.width(),
                self.original.height()
            )));
        }
        self.estimate_mask = Some(mask);
        Ok(self)
    }

    /// The decoded image.
    #[must_use]
    pub const fn original(&self) -> &RgbImage {
        &self.original
    }

    /// Metrics for the decode step.
    #[must_use]
    pub fn metrics(&self) -> StageMetrics {
        StageMetrics::Decode {
            input_bytes: self.source_len,
            width: self.original.width(),
            height: self.original.height(),
            pixel_count: u64::from(self.original.width()) * u64::from(self.original.height()),
        }
    }

    /// Estimate a palette size and reduce the image to it, advancing to
    /// [`Quantized`]. With `config.quantize` off the decoded image is
    /// used as is.
    ///
    /// The estimate looks at the whole image unless a mask was set with
    /// [`with_estimate_mask`](Self::with_estimate_mask). When the
    /// estimator overflows or finds no peaks the palette size falls back
    /// to `config.default_cluster_count`.
    ///
    /// # Errors
    ///
    /// Only internal errors of the estimator are propagated.
    pub fn quantize(self) -> Result<Quantized, SegmentError> {
        if !self.config.quantize {
            return Ok(Quantized {
                working: self.original.clone(),
                config: self.config,
                original: self.original,
                estimate: None,
                desired: None,
                colors: None,
                fallback: false,
            });
        }

        let sample = posterize(&self.original, ESTIMATE_POSTERIZE_LEVELS);
        let (estimate, fallback) =
            match estimate_cluster_count(
                &sample,
                self.estimate_mask.as_ref(),
                self.config.peak_delta,
            ) {
                Ok(estimate) if estimate.clusters > 0 => (Some(estimate), false),
                Ok(estimate) => {
                    log::warn!(
                        "cluster estimate found no peaks, using {} clusters",
                        self.config.default_cluster_count
                    );
                    (Some(estimate), true)
                }
                Err(e @ SegmentError::PeakCapacity { .. }) => {
                    log::warn!(
                        "{e}, using {} clusters",
                        self.config.default_cluster_count
                    );
                    (None, true)
                }
                Err(e) => return Err(e),
            };
        let desired = match &estimate {
            Some(e) if !fallback => e.clusters,
            _ => self.config.default_cluster_count,
        };

        let (working, colors) = reduce_image(&MedianCutReducer, &self.original, desired);
        log::debug!("quantized to {colors} colors (asked for {desired})");
        Ok(Quantized {
            config: self.config,
            original: self.original,
            working,
            estimate,
            desired: Some(desired),
            colors: Some(colors),
            fallback,
        })
    }
}

// ───────────────────────── Stage 2: Quantized ────────────────────────

/// Pipeline state after optional palette reduction.
#[must_use = "pipeline stages are consumed by advancing, call .propose() to continue"]
pub struct Quantized {
    config: SegmentConfig,
    original: RgbImage,
    working: RgbImage,
    estimate: Option<ClusterEstimate>,
    desired: Option<usize>,
    colors: Option<usize>,
    fallback: bool,
}

impl Quantized {
    /// The image every later stage works on.
    #[must_use]
    pub const fn working(&self) -> &RgbImage {
        &self.working
    }

    /// The cluster estimate, if one was produced.
    #[must_use]
    pub const fn estimate(&self) -> Option<&ClusterEstimate> {
        self.estimate.as_ref()
    }

    /// Metrics for the quantize step.
    #[must_use]
    pub fn metrics(&self) -> StageMetrics {
        StageMetrics::Quantize {
            enabled: self.config.quantize,
            estimated_clusters: self.estimate.as_ref().map(|e| e.clusters),
            fallback: self.fallback,
            requested_colors: self.desired,
            palette_colors: self.colors,
        }
    }

    /// Run the configured proposer and advance to [`Proposed`].
    ///
    /// # Errors
    ///
    /// Propagates [`RegionProposer::propose`] errors.
    pub fn propose(self) -> Result<Proposed, SegmentError> {
        let tags = self.config.proposer.propose(&self.working)?;
        Ok(Proposed {
            config: self.config,
            original: self.original,
            working: self.working,
            estimate: self.estimate,
            tags,
        })
    }
}

// ───────────────────────── Stage 3: Proposed ─────────────────────────

/// Pipeline state after the initial over-segmentation.
#[must_use = "pipeline stages are consumed by advancing, call .parse() to continue"]
pub struct Proposed {
    config: SegmentConfig,
    original: RgbImage,
    working: RgbImage,
    estimate: Option<ClusterEstimate>,
    tags: TagBuffer,
}

impl Proposed {
    /// The proposed tags.
    #[must_use]
    pub const fn tags(&self) -> &TagBuffer {
        &self.tags
    }

    /// Metrics for the propose step.
    #[must_use]
    pub fn metrics(&self) -> StageMetrics {
        StageMetrics::Propose {
            proposer: format!("{:?}", self.config.proposer),
            regions: self.tags.distinct_count(),
        }
    }

    /// Build the region graph and advance to [`Parsed`].
    ///
    /// # Errors
    ///
    /// Propagates [`SuperpixelGraph::parse`] errors.
    pub fn parse(self) -> Result<Parsed, SegmentError> {
        let graph = SuperpixelGraph::parse(&self.tags)?;
        Ok(Parsed {
            config: self.config,
            original: self.original,
            working: self.working,
            estimate: self.estimate,
            graph,
        })
    }
}

// ───────────────────────── Stage 4: Parsed ───────────────────────────

/// Pipeline state with a freshly parsed region graph.
#[must_use = "pipeline stages are consumed by advancing, call .merge() to continue"]
pub struct Parsed {
    config: SegmentConfig,
    original: RgbImage,
    working: RgbImage,
    estimate: Option<ClusterEstimate>,
    graph: SuperpixelGraph,
}

impl Parsed {
    /// The region graph before merging.
    #[must_use]
    pub const fn graph(&self) -> &SuperpixelGraph {
        &self.graph
    }

    /// Metrics for the parse step.
    #[must_use]
    pub fn metrics(&self) -> StageMetrics {
        StageMetrics::Parse {
            regions: self.graph.len(),
            edges: self.graph.edge_list().len(),
        }
    }

    /// Run the configured strategies and advance to [`Merged`].
    ///
    /// With `config.emit_intermediate_artifacts` set, a snapshot of the
    /// parsed graph and of every pass is kept on the result.
    ///
    /// # Errors
    ///
    /// Propagates strategy errors.
    pub fn merge(self) -> Result<Merged, SegmentError> {
        if !self.config.emit_intermediate_artifacts {
            return self.merge_with(&mut NoopObserver);
        }
        let mut recorder = ArtifactRecorder::new();
        recorder.snapshot("parsed", &self.graph);
        let merged = self.merge_with(&mut recorder)?;
        Ok(merged.with_artifacts(recorder.into_artifacts()))
    }

    /// Run the configured strategies, reporting to `observer`.
    ///
    /// # Errors
    ///
    /// Propagates strategy errors.
    pub fn merge_with(mut self, observer: &mut dyn MergeObserver) -> Result<Merged, SegmentError> {
        let similarity = Similarity::new(
            &self.working,
            self.config.colorspace,
            self.config.histogram_bins,
        );
        let mut ctx = MergeContext::new(similarity, observer);
        let mut reports = Vec::with_capacity(self.config.strategies.len());
        for strategy in &self.config.strategies {
            reports.push(strategy.run(&mut self.graph, &mut ctx)?);
        }
        Ok(Merged {
            config: self.config,
            original: self.original,
            working: self.working,
            estimate: self.estimate,
            graph: self.graph,
            reports,
            artifacts: Vec::new(),
        })
    }
}

// ───────────────────────── Stage 5: Merged ───────────────────────────

/// Pipeline state after all merge strategies ran. This is the final
/// stage.
#[must_use = "call .into_result() to extract the SegmentResult"]
pub struct Merged {
    config: SegmentConfig,
    original: RgbImage,
    working: RgbImage,
    estimate: Option<ClusterEstimate>,
    graph: SuperpixelGraph,
    reports: Vec<MergeReport>,
    artifacts: Vec<Artifact>,
}

impl Merged {
    pub(crate) fn with_artifacts(mut self, artifacts: Vec<Artifact>) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// The decoded image.
    #[must_use]
    pub const fn original(&self) -> &RgbImage {
        &self.original
    }

    /// The image the strategies compared colors in.
    #[must_use]
    pub const fn working(&self) -> &RgbImage {
        &self.working
    }

    /// The merged region graph.
    #[must_use]
    pub const fn graph(&self) -> &SuperpixelGraph {
        &self.graph
    }

    /// One report per strategy pass, in run order.
    #[must_use]
    pub fn reports(&self) -> &[MergeReport] {
        &self.reports
    }

    /// Snapshots recorded while merging. Empty unless
    /// `config.emit_intermediate_artifacts` was set.
    #[must_use]
    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    /// Back-project the unusually large regions onto their border bands.
    ///
    /// # Errors
    ///
    /// Propagates histogram errors.
    pub fn rescan_largest(&self) -> Result<GrayImage, SegmentError> {
        let similarity = Similarity::new(
            &self.working,
            self.config.colorspace,
            self.config.histogram_bins,
        );
        let ids = self.graph.scan_largest(crate::graph::LARGE_REGION_MIN_SIZE);
        rescan_largest(&similarity, &self.graph, &ids)
    }

    /// Region summaries, largest first.
    #[must_use]
    pub fn summaries(&self) -> Vec<RegionSummary> {
        self.graph
            .sorted_by_size()
            .into_iter()
            .filter_map(|id| {
                Some(RegionSummary {
                    id,
                    pixel_count: self.graph.pixel_count(id)?,
                    mean_color: self.graph.mean_color(&self.working, id)?,
                })
            })
            .collect()
    }

    /// Extract the final [`SegmentResult`].
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::Internal`] if the graph no longer covers
    /// every pixel.
    pub fn into_result(self) -> Result<SegmentResult, SegmentError> {
        let regions = self.summaries();
        Ok(SegmentResult {
            tags: self.graph.to_tag_buffer()?,
            regions,
            reports: self.reports,
            estimate: self.estimate,
            dimensions: dimensions_of(&self.original),
        })
    }
}
