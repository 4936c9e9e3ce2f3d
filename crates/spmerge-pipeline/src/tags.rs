//! Tag buffers: one integer label per pixel.
//!
//! Input tags arrive packed in 3-channel 8-bit pixels. The packing is
//! `(R << 16) | (G << 8) | B`, so any 24-bit label can be stored in a
//! plain RGB image.

use serde::{Deserialize, Serialize};

use crate::types::{Coord, Dimensions, RgbImage, SegmentError};

/// The tag value that may never appear in input.
pub const RESERVED_TAG: u32 = 0x00FF_FFFF;

/// Largest tag a region may carry. Its region id, `tag + 1`, is then
/// still below [`RESERVED_TAG`], so emitted tags always parse again.
pub const MAX_TAG: u32 = RESERVED_TAG - 2;

/// A width × height buffer of integer labels in row-major order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagBuffer {
    dimensions: Dimensions,
    tags: Vec<u32>,
}

/// Pack an RGB triple into a 24-bit tag.
#[must_use]
pub const fn pack_rgb(rgb: [u8; 3]) -> u32 {
    ((rgb[0] as u32) << 16) | ((rgb[1] as u32) << 8) | rgb[2] as u32
}

/// Unpack the low 24 bits of a tag into an RGB triple.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn unpack_rgb(tag: u32) -> [u8; 3] {
    [(tag >> 16) as u8, (tag >> 8) as u8, tag as u8]
}

impl TagBuffer {
    /// Wrap a row-major tag vector.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::EmptyInput`] when the dimensions contain
    /// no pixels, and [`SegmentError::InvalidConfig`] when `tags` does
    /// not hold exactly `width * height` entries.
    pub fn from_raw(dimensions: Dimensions, tags: Vec<u32>) -> Result<Self, SegmentError> {
        if dimensions.pixel_count() == 0 {
            return Err(SegmentError::EmptyInput);
        }
        if tags.len() != dimensions.pixel_count() {
            return Err(SegmentError::InvalidConfig(format!(
                "tag buffer holds {} entries for a {}x{} image",
                tags.len(),
                dimensions.width,
                dimensions.height
            )));
        }
        Ok(Self { dimensions, tags })
    }

    /// Unpack tags from interleaved 8-bit pixels.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::InvalidChannels`] unless `channels == 3`,
    /// plus the errors of [`from_raw`](Self::from_raw).
    pub fn from_pixels(
        dimensions: Dimensions,
        channels: u8,
        bytes: &[u8],
    ) -> Result<Self, SegmentError> {
        if channels != 3 {
            return Err(SegmentError::InvalidChannels(channels));
        }
        let tags = bytes
            .chunks_exact(3)
            .map(|px| pack_rgb([px[0], px[1], px[2]]))
            .collect();
        Self::from_raw(dimensions, tags)
    }

    /// Unpack tags from an RGB image.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::EmptyInput`] for a zero-sized image.
    pub fn from_rgb(image: &RgbImage) -> Result<Self, SegmentError> {
        let dimensions = Dimensions {
            width: image.width(),
            height: image.height(),
        };
        Self::from_pixels(dimensions, 3, image.as_raw())
    }

    /// Pack the low 24 bits of every tag into an RGB image.
    #[must_use]
    pub fn to_rgb(&self) -> RgbImage {
        RgbImage::from_fn(self.dimensions.width, self.dimensions.height, |x, y| {
            image::Rgb(unpack_rgb(self.get(Coord::new(x, y))))
        })
    }

    /// Buffer dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Tag at `coord`. Coordinates must lie inside the buffer.
    #[must_use]
    pub fn get(&self, coord: Coord) -> u32 {
        self.tags[self.dimensions.index(coord)]
    }

    /// All tags in row-major order.
    #[must_use]
    pub fn as_slice(&self) -> &[u32] {
        &self.tags
    }

    /// Iterate `(coord, tag)` in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (Coord, u32)> + '_ {
        let width = self.dimensions.width as usize;
        self.tags.iter().enumerate().map(move |(i, &tag)| {
            #[allow(clippy::cast_possible_truncation)]
            let coord = Coord::new((i % width) as u32, (i / width) as u32);
            (coord, tag)
        })
    }

    /// Number of distinct tags.
    #[must_use]
    pub fn distinct_count(&self) -> usize {
        let mut tags = self.tags.clone();
        tags.sort_unstable();
        tags.dedup();
        tags.len()
    }
}
