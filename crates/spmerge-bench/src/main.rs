//! spmerge-bench: CLI tool for region merging experiments and diagnostics.
//!
//! Runs the region merging pipeline on a given image file with
//! configurable parameters, printing detailed per-stage diagnostics.
//! Useful for:
//!
//! - Comparing merge strategy sequences
//! - Tuning histogram bins, colorspace and palette reduction
//! - Measuring per-pass durations to identify bottlenecks
//! - Dumping per-pass snapshots of the region graph
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin spmerge-bench -- [OPTIONS] <IMAGE_PATH>
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use spmerge_pipeline::diagnostics::{Clock, PipelineDiagnostics};
use spmerge_pipeline::pipeline::Merged;
use spmerge_pipeline::{
    ArtifactImage, BackprojectRange, Colorspace, MergeStrategyKind, ProposerKind, SegmentConfig,
    VisualizationContext,
};

/// Region merging experiments and diagnostics for spmerge.
///
/// Runs the pipeline on a given image with configurable parameters and
/// prints per-stage timing and region count diagnostics.
#[derive(Parser)]
#[command(name = "spmerge-bench", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, BMP, WebP).
    image_path: PathBuf,

    /// Initial over-segmentation.
    #[arg(long, value_enum, default_value_t = Proposer::BlockGrid)]
    proposer: Proposer,

    /// Tile side in pixels for the block-grid proposer.
    #[arg(long, default_value_t = ProposerKind::DEFAULT_BLOCK_SIZE, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    block_size: u32,

    /// Skip palette reduction and work on the decoded image directly.
    #[arg(long)]
    no_quantize: bool,

    /// Palette size used when cluster estimation fails.
    #[arg(long, default_value_t = SegmentConfig::DEFAULT_CLUSTER_COUNT)]
    default_cluster_count: usize,

    /// Peak detector sensitivity for cluster estimation.
    #[arg(long, default_value_t = SegmentConfig::DEFAULT_PEAK_DELTA)]
    peak_delta: f64,

    /// Colorspace histograms are computed in.
    #[arg(long, value_enum, default_value_t = Space::Rgb)]
    colorspace: Space,

    /// Histogram bins per channel.
    #[arg(long, default_value_t = SegmentConfig::DEFAULT_HISTOGRAM_BINS)]
    histogram_bins: usize,

    /// Merge strategy to run; repeat to build a sequence. Defaults to
    /// the library's default sequence.
    #[arg(long = "strategy", value_enum)]
    strategies: Vec<Strategy>,

    /// Back-projection preset for the backproject strategies.
    #[arg(long, value_enum, default_value_t = Preset::HighFifty)]
    backproject_range: Preset,

    /// Histogram bins for the breadth-first strategy.
    #[arg(long, default_value_t = 8, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    breadth_first_bins: usize,

    /// Write the merged regions, one random color per region, as PNG.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Write the merged tags packed into RGB (`id` as `0xRRGGBB`) as PNG.
    #[arg(long)]
    tags_output: Option<PathBuf>,

    /// Write per-pass snapshots and the large-region rescan into this
    /// directory.
    #[arg(long)]
    artifacts_dir: Option<PathBuf>,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics as JSON instead of human-readable report.
    #[arg(long)]
    json: bool,

    /// Log filter, e.g. `info` or `spmerge_pipeline=debug`.
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Full pipeline config as a JSON string.
    ///
    /// When provided, all other pipeline parameter flags are ignored.
    /// The JSON must be a valid `SegmentConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,
}

/// Proposer selection.
#[derive(Clone, Copy, ValueEnum)]
enum Proposer {
    /// Square tiles.
    BlockGrid,
    /// One region per distinct color.
    Palette,
}

/// Colorspace selection.
#[derive(Clone, Copy, ValueEnum)]
enum Space {
    /// Pixel values as-is.
    Rgb,
    /// 8-bit CIE L*a*b*.
    Lab,
}

/// Merge strategy selection.
#[derive(Clone, Copy, ValueEnum)]
enum Strategy {
    /// Merge uniform regions of identical color.
    Identical,
    /// Largest first, adaptive histogram-distance window.
    AlikeSweep,
    /// Largest first, back-projection preset.
    BackprojectLargest,
    /// Smallest first, back-projection preset.
    BackprojectSmallest,
    /// Back-projection flood fill from the largest region.
    FloodFill,
    /// Absorb very small regions.
    SmallRegions,
    /// Merge thin, mostly-border regions.
    EdgyRegions,
    /// Breadth-first expansion guarded by edge weights.
    BreadthFirst,
}

/// Back-projection preset selection.
#[derive(Clone, Copy, ValueEnum)]
enum Preset {
    /// Top 5%, min gray 200, 16 bins.
    HighFive,
    /// Top 10%, min gray 200, 8 bins.
    HighFive8,
    /// Top 10%, min gray 200, 16 bins.
    HighTen,
    /// Top 15%, min gray 200, 16 bins.
    HighFifteen,
    /// Top 20%, min gray 200, 16 bins.
    HighTwenty,
    /// Top 50%, min gray 128, 8 bins.
    HighFifty,
    /// Top 50%, min gray 128, 16 bins.
    HighFifty16,
}

const fn range_to_pipeline(range: Preset) -> BackprojectRange {
    match range {
        Preset::HighFive => BackprojectRange::HighFive,
        Preset::HighFive8 => BackprojectRange::HighFive8,
        Preset::HighTen => BackprojectRange::HighTen,
        Preset::HighFifteen => BackprojectRange::HighFifteen,
        Preset::HighTwenty => BackprojectRange::HighTwenty,
        Preset::HighFifty => BackprojectRange::HighFifty,
        Preset::HighFifty16 => BackprojectRange::HighFifty16,
    }
}

/// Build a [`SegmentConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored. Otherwise, a config is
/// assembled from the individual flags.
fn config_from_cli(cli: &Cli) -> Result<SegmentConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    let range = range_to_pipeline(cli.backproject_range);
    let strategies = if cli.strategies.is_empty() {
        MergeStrategyKind::default_sequence()
    } else {
        cli.strategies
            .iter()
            .map(|s| match s {
                Strategy::Identical => MergeStrategyKind::Identical,
                Strategy::AlikeSweep => MergeStrategyKind::AlikeSweep,
                Strategy::BackprojectLargest => MergeStrategyKind::BackprojectLargest(range),
                Strategy::BackprojectSmallest => MergeStrategyKind::BackprojectSmallest(range),
                Strategy::FloodFill => MergeStrategyKind::FloodFill,
                Strategy::SmallRegions => MergeStrategyKind::SmallRegions,
                Strategy::EdgyRegions => MergeStrategyKind::EdgyRegions,
                Strategy::BreadthFirst => MergeStrategyKind::BreadthFirst {
                    bins: cli.breadth_first_bins,
                },
            })
            .collect()
    };

    Ok(SegmentConfig {
        proposer: match cli.proposer {
            Proposer::BlockGrid => ProposerKind::BlockGrid {
                block_size: cli.block_size,
            },
            Proposer::Palette => ProposerKind::Palette,
        },
        quantize: !cli.no_quantize,
        default_cluster_count: cli.default_cluster_count,
        peak_delta: cli.peak_delta,
        colorspace: match cli.colorspace {
            Space::Rgb => Colorspace::Rgb,
            Space::Lab => Colorspace::Lab,
        },
        histogram_bins: cli.histogram_bins,
        strategies,
        emit_intermediate_artifacts: cli.artifacts_dir.is_some(),
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Keep the handle alive for the whole run; dropping it stops logging.
    let _logger = match flexi_logger::Logger::try_with_str(&cli.log_level)
        .and_then(|logger| logger.log_to_stderr().start())
    {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Error initializing logger: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };
    if cli.artifacts_dir.is_some() {
        config.emit_intermediate_artifacts = true;
    }

    let image_bytes = match std::fs::read(&cli.image_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error reading {}: {e}", cli.image_path.display());
            return ExitCode::FAILURE;
        }
    };

    eprintln!(
        "Image: {} ({} bytes)",
        cli.image_path.display(),
        image_bytes.len(),
    );
    eprintln!("Config: {config:#?}");
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let mut all_diagnostics = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        match spmerge_pipeline::diagnostics::process_with_diagnostics(
            &image_bytes,
            &config,
            &StdClock,
        ) {
            Ok((merged, diagnostics)) => {
                if cli.json {
                    match serde_json::to_string_pretty(&diagnostics) {
                        Ok(json) => println!("{json}"),
                        Err(e) => {
                            eprintln!("Error serializing diagnostics: {e}");
                            return ExitCode::FAILURE;
                        }
                    }
                } else {
                    println!("{}", diagnostics.report());
                }

                // Write outputs on the first run only.
                if run == 0 && !write_outputs(&cli, &merged) {
                    return ExitCode::FAILURE;
                }

                all_diagnostics.push(diagnostics);
            }
            Err(e) => {
                eprintln!("Pipeline error: {e}");
                return ExitCode::FAILURE;
            }
        }

        if cli.runs > 1 {
            eprintln!();
        }
    }

    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    ExitCode::SUCCESS
}

/// Write every requested output file. Returns `false` after printing an
/// error if any write failed.
fn write_outputs(cli: &Cli, merged: &Merged) -> bool {
    let context = VisualizationContext::default();

    if let Some(ref path) = cli.output {
        let image = context.render_region_colors(merged.graph());
        if !report_write(path, image.save(path)) {
            return false;
        }
    }

    if let Some(ref path) = cli.tags_output {
        let tags = match merged.graph().to_tag_buffer() {
            Ok(tags) => tags,
            Err(e) => {
                eprintln!("Error building tags: {e}");
                return false;
            }
        };
        if !report_write(path, tags.to_rgb().save(path)) {
            return false;
        }
    }

    if let Some(ref dir) = cli.artifacts_dir {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("Error creating {}: {e}", dir.display());
            return false;
        }
        for artifact in merged.artifacts() {
            let path = dir.join(format!("{}.png", sanitize(&artifact.label)));
            let saved = match &artifact.image {
                ArtifactImage::Rgb(image) => image.save(&path),
                ArtifactImage::Gray(image) => image.save(&path),
            };
            if !report_write(&path, saved) {
                return false;
            }
        }

        let path = dir.join("mean-colors.png");
        let means = context.render_mean_colors(merged.graph(), merged.working());
        if !report_write(&path, means.save(&path)) {
            return false;
        }

        let path = dir.join("rescan-largest.png");
        match merged.rescan_largest() {
            Ok(image) => {
                if !report_write(&path, image.save(&path)) {
                    return false;
                }
            }
            Err(e) => {
                eprintln!("Error rescanning large regions: {e}");
                return false;
            }
        }
    }

    true
}

/// Print the outcome of an image write.
fn report_write(path: &Path, result: image::ImageResult<()>) -> bool {
    match result {
        Ok(()) => {
            eprintln!("Written {}", path.display());
            true
        }
        Err(e) => {
            eprintln!("Error writing {}: {e}", path.display());
            false
        }
    }
}

/// Replace characters that are awkward in file names.
fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

/// Function pointer type for extracting a stage duration from diagnostics.
type StageExtractor = fn(&PipelineDiagnostics) -> Option<Duration>;

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[PipelineDiagnostics]) {
    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    if all_diagnostics.is_empty() {
        println!("Warning: no diagnostics to summarize");
        return;
    }

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    let stage_extractors: &[(&str, StageExtractor)] = &[
        ("Decode", |d| Some(d.decode.duration)),
        ("Quantize", |d| Some(d.quantize.duration)),
        ("Propose", |d| Some(d.propose.duration)),
        ("Parse", |d| Some(d.parse.duration)),
    ];
    let mut rows: Vec<(String, Vec<f64>)> = stage_extractors
        .iter()
        .map(|(name, extractor)| {
            let values = all_diagnostics
                .iter()
                .filter_map(extractor)
                .map(|dur| dur.as_secs_f64() * 1000.0)
                .collect();
            ((*name).to_string(), values)
        })
        .collect();

    let passes = all_diagnostics
        .iter()
        .map(|d| d.merge_passes.len())
        .max()
        .unwrap_or(0);
    for i in 0..passes {
        let values = all_diagnostics
            .iter()
            .filter_map(|d| d.merge_passes.get(i))
            .map(|p| p.duration.as_secs_f64() * 1000.0)
            .collect();
        rows.push((format!("Merge {}", i + 1), values));
    }

    for (name, stage_durations) in rows {
        if stage_durations.is_empty() {
            continue;
        }
        let stage_mean = stage_durations.iter().sum::<f64>() / stage_durations.len() as f64;
        println!("{name:<24} {stage_mean:>10.3}ms");
    }
}
