//! Initial over-segmentation.
//!
//! A [`RegionProposer`] turns the working image into a tag buffer that
//! the region graph is parsed from. The merge strategies only ever make
//! regions larger, so proposals should err on the side of too many
//! regions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::tags::{MAX_TAG, TagBuffer, pack_rgb};
use crate::types::{Dimensions, RgbImage, SegmentError};

/// Produces the initial tag buffer for an image.
pub trait RegionProposer {
    /// Label every pixel of `image`.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::EmptyInput`] for a zero-sized image and
    /// [`SegmentError::InvalidConfig`] if the proposal would need the
    /// reserved tag.
    fn propose(&self, image: &RgbImage) -> Result<TagBuffer, SegmentError>;
}

/// Selects which proposer to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposerKind {
    /// Square tiles of `block_size` pixels; edge tiles are clipped.
    BlockGrid {
        /// Tile side in pixels.
        block_size: u32,
    },
    /// One region per distinct color. Pixels of the same color share a
    /// tag even when they are not connected.
    Palette,
}

impl ProposerKind {
    /// Default tile side for [`ProposerKind::BlockGrid`].
    pub const DEFAULT_BLOCK_SIZE: u32 = 4;
}

impl Default for ProposerKind {
    fn default() -> Self {
        Self::BlockGrid {
            block_size: Self::DEFAULT_BLOCK_SIZE,
        }
    }
}

fn check_tag(tag: u32) -> Result<u32, SegmentError> {
    if tag > MAX_TAG {
        return Err(SegmentError::InvalidConfig(format!(
            "proposal needs {tag} tags, more than a 24-bit tag can hold"
        )));
    }
    Ok(tag)
}

fn block_grid(image: &RgbImage, block_size: u32) -> Result<TagBuffer, SegmentError> {
    let dims = Dimensions {
        width: image.width(),
        height: image.height(),
    };
    let block = block_size.max(1);
    let per_row = dims.width.div_ceil(block);
    check_tag(per_row.saturating_mul(dims.height.div_ceil(block)))?;

    let mut tags = Vec::with_capacity(dims.pixel_count());
    for y in 0..dims.height {
        for x in 0..dims.width {
            tags.push((y / block) * per_row + x / block);
        }
    }
    TagBuffer::from_raw(dims, tags)
}

fn palette(image: &RgbImage) -> Result<TagBuffer, SegmentError> {
    let dims = Dimensions {
        width: image.width(),
        height: image.height(),
    };
    let mut colors: Vec<u32> = image.pixels().map(|p| pack_rgb(p.0)).collect();
    colors.sort_unstable();
    colors.dedup();
    let index: HashMap<u32, u32> = colors
        .iter()
        .enumerate()
        .map(|(i, &c)| Ok((c, check_tag(u32::try_from(i).unwrap_or(u32::MAX))?)))
        .collect::<Result<_, SegmentError>>()?;

    let tags = image
        .pixels()
        .map(|p| index.get(&pack_rgb(p.0)).copied().unwrap_or_default())
        .collect();
    TagBuffer::from_raw(dims, tags)
}

impl RegionProposer for ProposerKind {
    fn propose(&self, image: &RgbImage) -> Result<TagBuffer, SegmentError> {
        let tags = match *self {
            Self::BlockGrid { block_size } => block_grid(image, block_size)?,
            Self::Palette => palette(image)?,
        };
        log::debug!("proposer {self:?}: {} initial regions", tags.distinct_count());
        Ok(tags)
    }
}
