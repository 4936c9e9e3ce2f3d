//! Boundary rescan around large regions.
//!
//! For each region, the band just inside and just outside its border
//! (dilation minus erosion of its mask) is scored against the region's
//! own histogram. Bright pixels in the result sit next to a large region
//! and look like it; they are where a large region is likely to have
//! leaked into, or stopped short of, its true boundary.

use imageproc::distance_transform::Norm;
use imageproc::morphology::{dilate, erode};

use crate::graph::SuperpixelGraph;
use crate::similarity::Similarity;
use crate::types::{GrayImage, RegionId, SegmentError};

/// Histogram bins per channel used for the rescan.
pub const RESCAN_BINS: usize = 16;

/// Back-project each of `ids` onto its own border band.
///
/// Where bands of several regions overlap, the highest score wins. Dead
/// ids are skipped.
///
/// # Errors
///
/// Propagates histogram construction errors.
pub fn rescan_largest(
    similarity: &Similarity<'_>,
    graph: &SuperpixelGraph,
    ids: &[RegionId],
) -> Result<GrayImage, SegmentError> {
    let dims = graph.dimensions();
    let image = similarity.image();
    let mut out = GrayImage::new(dims.width, dims.height);

    for &id in ids {
        let Some(region) = graph.region(id) else {
            continue;
        };
        let Some(hist) = similarity.histogram(graph, id, RESCAN_BINS)? else {
            continue;
        };

        let mut mask = GrayImage::new(dims.width, dims.height);
        for c in region.coords() {
            mask.put_pixel(c.x, c.y, image::Luma([255]));
        }
        let outer = dilate(&mask, Norm::LInf, 1);
        let inner = erode(&mask, Norm::LInf, 1);

        let mut band = 0usize;
        for (x, y, px) in out.enumerate_pixels_mut() {
            if outer.get_pixel(x, y).0[0] <= inner.get_pixel(x, y).0[0] {
                continue;
            }
            band += 1;
            let score = hist.back_project(&[image.get_pixel(x, y).0])[0];
            px.0[0] = px.0[0].max(score);
        }
        log::trace!("rescan {id}: {band} band pixels");
    }
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::histogram::Colorspace;
    use crate::tags::TagBuffer;
    use crate::types::{Dimensions, RgbImage};

    #[test]
    fn band_scores_similar_neighbors_high() {
        // Left half red region 1, right half red region 2 except a blue
        // column at the far right.
        let image = RgbImage::from_fn(6, 3, |x, _| {
            if x == 5 {
                image::Rgb([0, 0, 255])
            } else {
                image::Rgb([255, 0, 0])
            }
        });
        let tags = TagBuffer::from_raw(
            Dimensions {
                width: 6,
                height: 3,
            },
            (0..18).map(|i| u32::from(i % 6 >= 3)).collect(),
        )
        .unwrap();
        let graph = SuperpixelGraph::parse(&tags).unwrap();
        let similarity = Similarity::new(&image, Colorspace::Rgb, 8);
        let out = rescan_largest(&similarity, &graph, &[RegionId::new(1)]).unwrap();

        // Just outside region 1, same color.
        assert_eq!(out.get_pixel(3, 1).0[0], 255);
        // Inside the border of region 1.
        assert_eq!(out.get_pixel(2, 1).0[0], 255);
        // Far from the band.
        assert_eq!(out.get_pixel(5, 1).0[0], 0);
    }

    #[test]
    fn dead_ids_are_skipped() {
        let image = RgbImage::new(2, 1);
        let tags = TagBuffer::from_raw(
            Dimensions {
                width: 2,
                height: 1,
            },
            vec![0, 1],
        )
        .unwrap();
        let graph = SuperpixelGraph::parse(&tags).unwrap();
        let similarity = Similarity::new(&image, Colorspace::Rgb, 8);
        let out = rescan_largest(&similarity, &graph, &[RegionId::new(40)]).unwrap();
        assert!(out.pixels().all(|p| p.0[0] == 0));
    }
}
