//! spmerge-pipeline: superpixel region merging (sans-IO).
//!
//! Turns an over-segmented image into object-level regions:
//! decode -> palette reduction -> region proposal -> region graph ->
//! merge strategies.
//!
//! The core data structure is [`SuperpixelGraph`], a map of regions plus
//! their adjacency. Merge strategies ([`MergeStrategyKind`]) repeatedly
//! pick a region, rank its neighbors with the [`Similarity`] engine and
//! contract edges. Callers can watch a run through a [`MergeObserver`].
//!
//! This crate has **no I/O dependencies**: it operates on in-memory
//! byte slices and images and returns structured data. File handling
//! lives in `spmerge-bench`.

pub mod diagnostics;
pub mod edge_table;
pub mod graph;
pub mod histogram;
pub mod merge;
pub mod observer;
pub mod peaks;
pub mod pipeline;
pub mod propose;
pub mod quantize;
pub mod region;
pub mod rescan;
pub mod similarity;
pub mod stats;
pub mod tags;
pub mod types;
pub mod visualize;

pub use graph::{MergeOutcome, SuperpixelGraph};
pub use histogram::{ColorHistogram, Colorspace};
pub use merge::{MergeContext, MergeReport, MergeStrategy, MergeStrategyKind};
pub use observer::{Artifact, ArtifactImage, ArtifactRecorder, MergeObserver, NoopObserver};
pub use peaks::ClusterEstimate;
pub use pipeline::Pipeline;
pub use propose::{ProposerKind, RegionProposer};
pub use quantize::{ColorReducer, MedianCutReducer, ReducedColors};
pub use region::{Region, Uniformity};
pub use similarity::{BackprojectParams, BackprojectRange, LockTable, NeighborCandidate, Similarity};
pub use tags::TagBuffer;
pub use types::{
    Coord, Dimensions, GrayImage, RegionId, RegionSummary, RgbImage, SegmentConfig, SegmentError,
    SegmentResult,
};
pub use visualize::VisualizationContext;

/// Run the full region merging pipeline on encoded image bytes.
///
/// Takes raw image bytes (PNG, JPEG, BMP, WebP) and a configuration and
/// returns the merged tags, a summary of every surviving region and a
/// report per strategy pass.
///
/// # Pipeline steps
///
/// 1. Decode the image to RGB
/// 2. Estimate a palette size and reduce the image to it (optional)
/// 3. Propose an initial over-segmentation
/// 4. Build the region graph
/// 5. Run each configured merge strategy in order
///
/// # Errors
///
/// Returns [`SegmentError::InvalidConfig`] if the config fails
/// validation, [`SegmentError::EmptyInput`] if `image_bytes` is empty,
/// and [`SegmentError::ImageDecode`] if the image format is
/// unrecognized.
pub fn process(image_bytes: &[u8], config: &SegmentConfig) -> Result<SegmentResult, SegmentError> {
    Pipeline::new(image_bytes.to_vec(), config.clone())
        .decode()?
        .quantize()?
        .propose()?
        .parse()?
        .merge()?
        .into_result()
}

/// Run the pipeline on an already decoded image.
///
/// # Errors
///
/// Returns [`SegmentError::InvalidConfig`] if the config fails
/// validation and [`SegmentError::EmptyInput`] for an image without
/// pixels.
pub fn process_image(image: RgbImage, config: &SegmentConfig) -> Result<SegmentResult, SegmentError> {
    pipeline::Decoded::from_image(image, config.clone())?
        .quantize()?
        .propose()?
        .parse()?
        .merge()?
        .into_result()
}

/// Merge an existing tag buffer over `image` without palette reduction
/// or proposal.
///
/// This is the entry point for callers that bring their own
/// over-segmentation.
///
/// # Errors
///
/// Returns [`SegmentError::InvalidConfig`] when `tags` and `image`
/// differ in size or the config fails validation, plus the errors of
/// [`SuperpixelGraph::parse`] and of the strategies.
pub fn merge_tags(
    image: &RgbImage,
    tags: &TagBuffer,
    config: &SegmentConfig,
) -> Result<(SuperpixelGraph, Vec<MergeReport>), SegmentError> {
    config.validate()?;
    let dims = tags.dimensions();
    if (dims.width, dims.height) != image.dimensions() {
        return Err(SegmentError::InvalidConfig(format!(
            "tags are {}x{} but the image is {}x{}",
            dims.width,
            dims.height,
            image.width(),
            image.height()
        )));
    }
    let mut graph = SuperpixelGraph::parse(tags)?;
    let mut observer = NoopObserver;
    let mut ctx = MergeContext::new(
        Similarity::new(image, config.colorspace, config.histogram_bins),
        &mut observer,
    );
    let reports = config
        .strategies
        .iter()
        .map(|strategy| strategy.run(&mut graph, &mut ctx))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((graph, reports))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Encode an RGB image as PNG.
    fn encode_png(img: &RgbImage) -> Vec<u8> {
        let mut buf = Vec::new();
        let encoder = image::codecs::png::PngEncoder::new(&mut buf);
        image::ImageEncoder::write_image(
            encoder,
            img.as_raw(),
            img.width(),
            img.height(),
            image::ExtendedColorType::Rgb8,
        )
        .unwrap();
        buf
    }

    fn quadrants(size: u32) -> RgbImage {
        RgbImage::from_fn(size, size, |x, y| match (x < size / 2, y < size / 2) {
            (true, true) => image::Rgb([200, 20, 20]),
            (false, true) => image::Rgb([20, 200, 20]),
            (true, false) => image::Rgb([20, 20, 200]),
            (false, false) => image::Rgb([200, 200, 20]),
        })
    }

    #[test]
    fn process_empty_input() {
        let result = process(&[], &SegmentConfig::default());
        assert!(matches!(result, Err(SegmentError::EmptyInput)));
    }

    #[test]
    fn process_corrupt_input() {
        let result = process(&[0xFF, 0x00], &SegmentConfig::default());
        assert!(matches!(result, Err(SegmentError::ImageDecode(_))));
    }

    #[test]
    fn process_quadrants_yields_four_regions() {
        let png = encode_png(&quadrants(16));
        let result = process(&png, &SegmentConfig::default()).unwrap();
        assert_eq!(result.regions.len(), 4);
        assert!(result.regions.iter().all(|r| r.pixel_count == 64));
        assert_eq!(result.reports.len(), 5);
        assert_eq!(
            result.dimensions,
            Dimensions {
                width: 16,
                height: 16
            }
        );
    }

    #[test]
    fn process_image_matches_process() {
        let image = quadrants(8);
        let from_bytes = process(&encode_png(&image), &SegmentConfig::default()).unwrap();
        let from_image = process_image(image, &SegmentConfig::default()).unwrap();
        assert_eq!(from_bytes.tags, from_image.tags);
    }

    #[test]
    fn merge_tags_rejects_size_mismatch() {
        let image = RgbImage::new(4, 4);
        let tags = TagBuffer::from_raw(
            Dimensions {
                width: 2,
                height: 2,
            },
            vec![0, 1, 2, 3],
        )
        .unwrap();
        let result = merge_tags(&image, &tags, &SegmentConfig::default());
        assert!(matches!(result, Err(SegmentError::InvalidConfig(_))));
    }

    #[test]
    fn merge_tags_runs_configured_strategies() {
        let image = RgbImage::from_pixel(4, 1, image::Rgb([7, 7, 7]));
        let tags = TagBuffer::from_raw(
            Dimensions {
                width: 4,
                height: 1,
            },
            vec![0, 1, 2, 3],
        )
        .unwrap();
        let config = SegmentConfig {
            strategies: vec![MergeStrategyKind::Identical],
            ..SegmentConfig::default()
        };
        let (graph, reports) = merge_tags(&image, &tags, &config).unwrap();
        assert_eq!(graph.len(), 1);
        assert_eq!(reports[0].merges, 3);
    }
}
