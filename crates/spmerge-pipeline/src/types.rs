//! Shared types for the spmerge region merging pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::histogram::Colorspace;
use crate::merge::{MergeReport, MergeStrategyKind};
use crate::peaks::ClusterEstimate;
use crate::propose::ProposerKind;
use crate::tags::TagBuffer;

/// Re-export `GrayImage` so downstream crates can reference
/// single-channel raster data without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbImage` so downstream crates can reference the
/// working color image without depending on `image` directly.
pub use image::RgbImage;

/// Identifier of a region in a [`SuperpixelGraph`](crate::SuperpixelGraph).
///
/// Ids are created from input tags as `tag + 1`, so they are always
/// positive. Ids are never reused: once a region is merged away its id
/// stays dead for the lifetime of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(u32);

impl RegionId {
    /// Wrap a raw id value.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw id value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An integer pixel position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Coord {
    /// Column (pixels from left edge).
    pub x: u32,
    /// Row (pixels from top edge).
    pub y: u32,
}

impl Coord {
    /// Create a new coordinate.
    #[must_use]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// The 8-connected neighbors of this coordinate that fall inside
    /// `dimensions`, in row-major order.
    pub fn neighbors8(self, dimensions: Dimensions) -> impl Iterator<Item = Self> {
        let (x, y) = (i64::from(self.x), i64::from(self.y));
        let (w, h) = (i64::from(dimensions.width), i64::from(dimensions.height));
        (-1_i64..=1)
            .flat_map(move |dy| (-1_i64..=1).map(move |dx| (dx, dy)))
            .filter(|&(dx, dy)| dx != 0 || dy != 0)
            .filter_map(move |(dx, dy)| {
                let (nx, ny) = (x + dx, y + dy);
                if nx < 0 || ny < 0 || nx >= w || ny >= h {
                    return None;
                }
                Some(Self::new(u32::try_from(nx).ok()?, u32::try_from(ny).ok()?))
            })
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Total number of pixels.
    #[must_use]
    pub const fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Row-major index of `coord`.
    #[must_use]
    pub const fn index(self, coord: Coord) -> usize {
        coord.y as usize * self.width as usize + coord.x as usize
    }
}

/// Configuration for the region merging pipeline.
///
/// All parameters have defaults; `#[serde(default)]` lets a JSON config
/// override only the fields it names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// How the initial over-segmentation is produced.
    pub proposer: ProposerKind,

    /// Whether to reduce the image palette before proposing regions.
    /// The reduced image becomes the working image for every later stage.
    pub quantize: bool,

    /// Palette size used when the cluster estimator cannot produce one.
    pub default_cluster_count: usize,

    /// Peak detector sensitivity for the cluster estimator.
    pub peak_delta: f64,

    /// Colorspace histograms are computed in.
    pub colorspace: Colorspace,

    /// Bins per channel for histogram comparisons.
    pub histogram_bins: usize,

    /// Merge strategies to run, in order.
    pub strategies: Vec<MergeStrategyKind>,

    /// Record a rendered snapshot of the region graph after each
    /// strategy pass.
    pub emit_intermediate_artifacts: bool,
}

impl SegmentConfig {
    /// Default palette size when cluster estimation fails.
    pub const DEFAULT_CLUSTER_COUNT: usize = 32;

    /// Default peak detector delta.
    pub const DEFAULT_PEAK_DELTA: f64 = 1e-6;

    /// Default histogram bins per channel.
    pub const DEFAULT_HISTOGRAM_BINS: usize = 16;

    /// Check field ranges that the type system cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<(), SegmentError> {
        if self.histogram_bins == 0 || self.histogram_bins > 256 {
            return Err(SegmentError::InvalidConfig(format!(
                "histogram_bins must be in 1..=256, got {}",
                self.histogram_bins
            )));
        }
        if self.default_cluster_count == 0 {
            return Err(SegmentError::InvalidConfig(
                "default_cluster_count must be positive".to_string(),
            ));
        }
        if !self.peak_delta.is_finite() || self.peak_delta < 0.0 {
            return Err(SegmentError::InvalidConfig(format!(
                "peak_delta must be finite and non-negative, got {}",
                self.peak_delta
            )));
        }
        if let ProposerKind::BlockGrid { block_size: 0 } = self.proposer {
            return Err(SegmentError::InvalidConfig(
                "block_size must be positive".to_string(),
            ));
        }
        for strategy in &self.strategies {
            if let MergeStrategyKind::BreadthFirst { bins: 0 } = strategy {
                return Err(SegmentError::InvalidConfig(
                    "breadth-first bins must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            proposer: ProposerKind::default(),
            quantize: true,
            default_cluster_count: Self::DEFAULT_CLUSTER_COUNT,
            peak_delta: Self::DEFAULT_PEAK_DELTA,
            colorspace: Colorspace::default(),
            histogram_bins: Self::DEFAULT_HISTOGRAM_BINS,
            strategies: MergeStrategyKind::default_sequence(),
            emit_intermediate_artifacts: false,
        }
    }
}

/// Summary of one surviving region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionSummary {
    /// Region id.
    pub id: RegionId,
    /// Number of pixels owned by the region.
    pub pixel_count: usize,
    /// Mean working-image color of the region's pixels.
    pub mean_color: [u8; 3],
}

/// Result of running the full pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentResult {
    /// Per-pixel id of the owning region.
    pub tags: TagBuffer,
    /// Surviving regions, largest first.
    pub regions: Vec<RegionSummary>,
    /// Per-strategy merge reports, in run order.
    pub reports: Vec<MergeReport>,
    /// Cluster estimate used for palette reduction, if quantization ran.
    pub estimate: Option<ClusterEstimate>,
    /// Dimensions of the source image in pixels.
    pub dimensions: Dimensions,
}

/// Errors that can occur during region merging.
#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input image bytes were empty, or the image has no pixels.
    #[error("input image data is empty")]
    EmptyInput,

    /// A tag buffer was built from pixels that are not 3-channel.
    #[error("expected 3 channels per pixel, got {0}")]
    InvalidChannels(u8),

    /// The tag `0x00FFFFFF` is reserved and may not appear in input.
    #[error("reserved tag 0x00FFFFFF at ({x}, {y})")]
    ReservedTag {
        /// Column of the offending pixel.
        x: u32,
        /// Row of the offending pixel.
        y: u32,
    },

    /// Pipeline configuration is invalid.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// The peak detector found more peaks than it can hold.
    #[error("peak detector capacity of {capacity} exceeded")]
    PeakCapacity {
        /// Maximum peaks per kind.
        capacity: usize,
    },

    /// A region graph invariant was violated.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn region_id_orders_by_raw_value() {
        assert!(RegionId::new(2) < RegionId::new(10));
        assert_eq!(RegionId::new(7).get(), 7);
        assert_eq!(RegionId::new(7).to_string(), "7");
    }

    #[test]
    fn neighbors8_interior_has_eight() {
        let dims = Dimensions {
            width: 3,
            height: 3,
        };
        let n: Vec<Coord> = Coord::new(1, 1).neighbors8(dims).collect();
        assert_eq!(n.len(), 8);
        assert_eq!(n[0], Coord::new(0, 0));
        assert_eq!(n[7], Coord::new(2, 2));
    }

    #[test]
    fn neighbors8_corner_is_clipped() {
        let dims = Dimensions {
            width: 3,
            height: 3,
        };
        let n: Vec<Coord> = Coord::new(0, 0).neighbors8(dims).collect();
        assert_eq!(n, vec![Coord::new(1, 0), Coord::new(0, 1), Coord::new(1, 1)]);
    }

    #[test]
    fn dimensions_index_is_row_major() {
        let dims = Dimensions {
            width: 4,
            height: 2,
        };
        assert_eq!(dims.pixel_count(), 8);
        assert_eq!(dims.index(Coord::new(1, 1)), 5);
    }

    #[test]
    fn default_config_is_valid() {
        SegmentConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_bins_rejected() {
        let config = SegmentConfig {
            histogram_bins: 0,
            ..SegmentConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SegmentError::InvalidConfig(_))
        ));
    }

    #[test]
    fn zero_block_size_rejected() {
        let config = SegmentConfig {
            proposer: ProposerKind::BlockGrid { block_size: 0 },
            ..SegmentConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_serde_round_trip() {
        let config = SegmentConfig {
            quantize: false,
            colorspace: Colorspace::Lab,
            histogram_bins: 8,
            strategies: vec![MergeStrategyKind::Identical, MergeStrategyKind::SmallRegions],
            ..SegmentConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: SegmentConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn partial_config_json_fills_defaults() {
        let config: SegmentConfig = serde_json::from_str(r#"{"quantize": false}"#).unwrap();
        assert!(!config.quantize);
        assert_eq!(config.histogram_bins, SegmentConfig::DEFAULT_HISTOGRAM_BINS);
    }

    #[test]
    fn error_display_messages() {
        assert_eq!(
            SegmentError::ReservedTag { x: 3, y: 4 }.to_string(),
            "reserved tag 0x00FFFFFF at (3, 4)"
        );
        assert_eq!(
            SegmentError::InvalidChannels(4).to_string(),
            "expected 3 channels per pixel, got 4"
        );
    }
}
