//! Pipeline diagnostics: timing, counts, and other metrics for each stage.
//!
//! [`process_with_diagnostics`] runs the staged pipeline and collects one
//! [`StageDiagnostics`] per stage plus one per merge strategy pass.
//!
//! Timestamps come from a caller-supplied [`Clock`], keeping this crate
//! free of platform timer dependencies. Durations are serialized as
//! fractional seconds (`f64`) for JSON compatibility, since
//! `std::time::Duration` does not implement serde traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::graph::SuperpixelGraph;
use crate::merge::MergeReport;
use crate::observer::{ArtifactRecorder, MergeObserver};
use crate::pipeline::{Merged, Pipeline};
use crate::types::{SegmentConfig, SegmentError};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Source of timestamps for diagnostics.
pub trait Clock {
    /// Opaque point in time.
    type Instant;

    /// The current time.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Diagnostics collected from a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Stage 0: image decoding.
    pub decode: StageDiagnostics,
    /// Stage 1: cluster estimation and palette reduction.
    pub quantize: StageDiagnostics,
    /// Stage 2: initial over-segmentation.
    pub propose: StageDiagnostics,
    /// Stage 3: region graph construction.
    pub parse: StageDiagnostics,
    /// Stage 4: one entry per merge strategy pass, in run order.
    pub merge_passes: Vec<StageDiagnostics>,
    /// Total wall-clock duration of the entire pipeline (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts across all stages.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics (counts, sizes, etc.).
    pub metrics: StageMetrics,
}

/// Stage-specific metrics that vary by pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Image decoding metrics.
    Decode {
        /// Size of the input image bytes.
        input_bytes: usize,
        /// Decoded image width in pixels.
        width: u32,
        /// Decoded image height in pixels.
        height: u32,
        /// Total pixel count (`width * height`).
        pixel_count: u64,
    },
    /// Cluster estimation and palette reduction metrics.
    Quantize {
        /// Whether palette reduction ran at all.
        enabled: bool,
        /// Palette size suggested by the estimator, if it produced one.
        estimated_clusters: Option<usize>,
        /// Whether the default cluster count was used instead.
        fallback: bool,
        /// Palette size asked of the reducer.
        requested_colors: Option<usize>,
        /// Distinct colors the reducer produced.
        palette_colors: Option<usize>,
    },
    /// Over-segmentation metrics.
    Propose {
        /// Which proposer ran.
        proposer: String,
        /// Distinct tags produced.
        regions: usize,
    },
    /// Region graph metrics.
    Parse {
        /// Regions in the graph.
        regions: usize,
        /// Adjacent region pairs.
        edges: usize,
    },
    /// One merge strategy pass.
    Merge {
        /// Which strategy ran.
        strategy: String,
        /// Edges contracted.
        merges: usize,
        /// Times touched regions were unlocked for another sweep.
        lock_clears: usize,
        /// Live regions before the pass.
        regions_before: usize,
        /// Live regions after the pass.
        regions_after: usize,
    },
}

impl From<&MergeReport> for StageMetrics {
    fn from(report: &MergeReport) -> Self {
        Self::Merge {
            strategy: report.strategy.clone(),
            merges: report.merges,
            lock_clears: report.lock_clears,
            regions_before: report.regions_before,
            regions_after: report.regions_after,
        }
    }
}

/// High-level summary counts for the entire pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Source image width in pixels.
    pub image_width: u32,
    /// Source image height in pixels.
    pub image_height: u32,
    /// Total pixel count.
    pub pixel_count: u64,
    /// Regions right after parsing.
    pub initial_regions: usize,
    /// Regions after the last strategy.
    pub final_regions: usize,
    /// Edges contracted across all passes.
    pub total_merges: usize,
}

impl PipelineDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {}x{} ({} pixels)",
            self.summary.image_width, self.summary.image_height, self.summary.pixel_count,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        let mut stages: Vec<(String, &StageDiagnostics)> = vec![
            ("Decode".to_string(), &self.decode),
            ("Quantize".to_string(), &self.quantize),
            ("Propose".to_string(), &self.propose),
            ("Parse".to_string(), &self.parse),
        ];
        for (i, pass) in self.merge_passes.iter().enumerate() {
            stages.push((format!("Merge {}", i + 1), pass));
        }

        for (name, diag) in &stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!(
            "Regions: {} -> {}  |  Merges: {}",
            self.summary.initial_regions, self.summary.final_regions, self.summary.total_merges,
        ));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Decode {
            input_bytes,
            width,
            height,
            ..
        } => format!("{input_bytes} bytes -> {width}x{height}"),
        StageMetrics::Quantize { enabled: false, .. } => "disabled".to_string(),
        StageMetrics::Quantize {
            estimated_clusters,
            fallback,
            requested_colors,
            palette_colors,
            ..
        } => {
            let estimate = estimated_clusters.map_or_else(|| "none".to_string(), |c| c.to_string());
            let fallback = if *fallback { " (fallback)" } else { "" };
            format!(
                "estimate={estimate}{fallback} requested={} palette={}",
                requested_colors.unwrap_or(0),
                palette_colors.unwrap_or(0),
            )
        }
        StageMetrics::Propose { proposer, regions } => format!("{proposer} -> {regions} regions"),
        StageMetrics::Parse { regions, edges } => format!("{regions} regions, {edges} edges"),
        StageMetrics::Merge {
            strategy,
            merges,
            lock_clears,
            regions_before,
            regions_after,
        } => format!(
            "{strategy} {merges} merges, {lock_clears} clears, {regions_before}->{regions_after} regions",
        ),
    }
}

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

/// Observer that times each strategy pass and forwards every event to
/// an optional inner observer.
struct PassTimer<'a, C: Clock> {
    clock: &'a C,
    inner: Option<&'a mut dyn MergeObserver>,
    last: C::Instant,
    passes: Vec<StageDiagnostics>,
}

impl<'a, C: Clock> PassTimer<'a, C> {
    fn new(clock: &'a C, inner: Option<&'a mut dyn MergeObserver>) -> Self {
        Self {
            clock,
            inner,
            last: clock.now(),
            passes: Vec::new(),
        }
    }
}

impl<C: Clock> MergeObserver for PassTimer<'_, C> {
    fn on_merge(&mut self, graph: &SuperpixelGraph, outcome: crate::graph::MergeOutcome) {
        if let Some(inner) = self.inner.as_deref_mut() {
            inner.on_merge(graph, outcome);
        }
    }

    fn on_pass_complete(&mut self, graph: &SuperpixelGraph, report: &MergeReport) {
        let duration = self.clock.elapsed(&self.last);
        if let Some(inner) = self.inner.as_deref_mut() {
            inner.on_pass_complete(graph, report);
        }
        self.passes.push(StageDiagnostics {
            duration,
            metrics: report.into(),
        });
        self.last = self.clock.now();
    }
}

/// Time a fallible stage transition.
fn timed<C: Clock, T>(
    clock: &C,
    step: impl FnOnce() -> Result<T, SegmentError>,
) -> Result<(T, Duration), SegmentError> {
    let start = clock.now();
    let value = step()?;
    Ok((value, clock.elapsed(&start)))
}

/// Run the full pipeline, collecting per-stage diagnostics.
///
/// Returns the final [`Merged`] stage so the caller can still render the
/// graph, read artifacts or extract a
/// [`SegmentResult`](crate::SegmentResult).
///
/// # Errors
///
/// Returns the same errors as [`crate::process`].
pub fn process_with_diagnostics<C: Clock>(
    image_bytes: &[u8],
    config: &SegmentConfig,
    clock: &C,
) -> Result<(Merged, PipelineDiagnostics), SegmentError> {
    let total_start = clock.now();

    let pending = Pipeline::new(image_bytes.to_vec(), config.clone());
    let (decoded, decode_time) = timed(clock, || pending.decode())?;
    let decode = StageDiagnostics {
        duration: decode_time,
        metrics: decoded.metrics(),
    };
    let (image_width, image_height) = decoded.original().dimensions();

    let (quantized, quantize_time) = timed(clock, || decoded.quantize())?;
    let quantize = StageDiagnostics {
        duration: quantize_time,
        metrics: quantized.metrics(),
    };

    let (proposed, propose_time) = timed(clock, || quantized.propose())?;
    let propose = StageDiagnostics {
        duration: propose_time,
        metrics: proposed.metrics(),
    };

    let (parsed, parse_time) = timed(clock, || proposed.parse())?;
    let parse = StageDiagnostics {
        duration: parse_time,
        metrics: parsed.metrics(),
    };
    let initial_regions = parsed.graph().len();

    let mut recorder = config.emit_intermediate_artifacts.then(ArtifactRecorder::new);
    if let Some(recorder) = recorder.as_mut() {
        recorder.snapshot("parsed", parsed.graph());
    }
    let mut timer = PassTimer::new(
        clock,
        recorder.as_mut().map(|r| r as &mut dyn MergeObserver),
    );
    let merged = parsed.merge_with(&mut timer)?;
    let merge_passes = timer.passes;
    let merged = match recorder {
        Some(recorder) => merged.with_artifacts(recorder.into_artifacts()),
        None => merged,
    };

    let summary = PipelineSummary {
        image_width,
        image_height,
        pixel_count: u64::from(image_width) * u64::from(image_height),
        initial_regions,
        final_regions: merged.graph().len(),
        total_merges: merged.reports().iter().map(|r| r.merges).sum(),
    };
    let diagnostics = PipelineDiagnostics {
        decode,
        quantize,
        propose,
        parse,
        merge_passes,
        total_duration: clock.elapsed(&total_start),
        summary,
    };
    Ok((merged, diagnostics))
}
