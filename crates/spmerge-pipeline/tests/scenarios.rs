//! End-to-end scenarios for the region graph, the similarity engine and
//! the full pipeline.

#![allow(clippy::unwrap_used)]

use spmerge_pipeline::similarity::BackprojectParams;
use spmerge_pipeline::stats::pos_sample_within_bound;
use spmerge_pipeline::{
    BackprojectRange, ColorHistogram, Colorspace, Dimensions, MergeContext, MergeObserver,
    MergeOutcome, MergeStrategy, MergeStrategyKind, RegionId, RgbImage, SegmentConfig,
    SegmentError, Similarity, SuperpixelGraph, TagBuffer,
};

const RED: [u8; 3] = [210, 40, 40];
const BLUE: [u8; 3] = [30, 60, 220];

fn tags(width: u32, height: u32, tags: Vec<u32>) -> TagBuffer {
    TagBuffer::from_raw(Dimensions { width, height }, tags).unwrap()
}

/// Records every contraction in order.
#[derive(Default)]
struct MergeLog(Vec<MergeOutcome>);

impl MergeObserver for MergeLog {
    fn on_merge(&mut self, _graph: &SuperpixelGraph, outcome: MergeOutcome) {
        self.0.push(outcome);
    }
}

#[test]
fn uniform_square_collapses_to_one_region() {
    let image = RgbImage::from_pixel(2, 2, image::Rgb([77, 77, 77]));
    let mut graph = SuperpixelGraph::parse(&tags(2, 2, vec![0, 1, 2, 3])).unwrap();
    for &id in graph.ids() {
        assert_eq!(graph.neighbors(id).unwrap().len(), 3);
    }

    let merges = graph.merge_identical(&image).unwrap();
    assert_eq!(merges, 3);
    assert_eq!(graph.len(), 1);
    let id = graph.ids()[0];
    assert_eq!(graph.region(id).unwrap().coords().len(), 4);
    assert!(graph.neighbors(id).unwrap().is_empty());
    graph.check_invariants().unwrap();
}

#[test]
fn similar_pair_merges_before_dissimilar_neighbor() {
    // A | B | C, two columns each; A and B share a color.
    let image = RgbImage::from_fn(6, 2, |x, _| image::Rgb(if x < 4 { RED } else { BLUE }));
    let layout = (0..12).map(|i| (i % 6) / 2).collect();
    let mut graph = SuperpixelGraph::parse(&tags(6, 2, layout)).unwrap();
    let (a, b, c) = (RegionId::new(1), RegionId::new(2), RegionId::new(3));
    assert!(!graph.neighbors(a).unwrap().contains(&c));

    let mut log = MergeLog::default();
    {
        let mut ctx = MergeContext::new(Similarity::new(&image, Colorspace::Rgb, 8), &mut log);
        MergeStrategyKind::BackprojectLargest(BackprojectRange::HighFifty)
            .run(&mut graph, &mut ctx)
            .unwrap();
    }

    assert_eq!(graph.len(), 2);
    let first = log.0.first().unwrap();
    assert_eq!((first.dst, first.src), (a, b));
    assert!(log.0.iter().all(|m| m.src != c && m.dst != c));
    graph.check_invariants().unwrap();
}

#[test]
fn decreasing_history_uses_absolute_steps_and_accepts() {
    // Steps 0.4 and 0.2, none positive; the new weight is a further
    // decrease, so it can never be an upward outlier.
    assert!(pos_sample_within_bound(&[0.9, 0.5, 0.3], 0.1));
}

#[test]
fn backprojection_of_own_color_is_full_scale() {
    let pixels = vec![RED; 9];
    let hist = ColorHistogram::from_pixels(&pixels, 16, Colorspace::Rgb).unwrap();
    let projected = hist.back_project(&[RED; 5]);
    // The peak bin normalizes to exactly 1.0, so even a threshold of 255
    // keeps every pixel.
    assert!(projected.iter().all(|&v| v == 255));

    let image = RgbImage::from_fn(4, 1, |_, _| image::Rgb(RED));
    let graph = SuperpixelGraph::parse(&tags(4, 1, vec![0, 0, 1, 1])).unwrap();
    let similarity = Similarity::new(&image, Colorspace::Rgb, 16);
    for min_graylevel in [1, 128, 254, 255] {
        let params = BackprojectParams {
            num_percent_ranges: 20,
            num_top_percent: 1,
            round_percent: false,
            min_graylevel,
            num_bins: 16,
        };
        let ranked = similarity
            .compare_neighbors_by_backprojection(&graph, RegionId::new(1), None, &params)
            .unwrap();
        assert_eq!(ranked.len(), 1, "min_graylevel {min_graylevel}");
        assert!((ranked[0].score - 1.0).abs() < 1e-12);
    }
}

#[test]
fn single_region_has_no_neighbors() {
    let mut graph = SuperpixelGraph::parse(&tags(3, 3, vec![5; 9])).unwrap();
    assert_eq!(graph.len(), 1);
    let id = RegionId::new(6);
    assert!(graph.neighbors(id).unwrap().is_empty());
    graph.check_invariants().unwrap();

    let image = RgbImage::new(3, 3);
    let mut log = MergeLog::default();
    let mut ctx = MergeContext::new(Similarity::new(&image, Colorspace::Rgb, 8), &mut log);
    for kind in MergeStrategyKind::default_sequence() {
        let report = kind.run(&mut graph, &mut ctx).unwrap();
        assert_eq!(report.merges, 0);
    }
    assert!(log.0.is_empty());
}

#[test]
fn reserved_tag_is_rejected() {
    let result = SuperpixelGraph::parse(&tags(2, 1, vec![0, 0x00FF_FFFF]));
    assert!(matches!(
        result,
        Err(SegmentError::ReservedTag { x: 1, y: 0 })
    ));
}

#[test]
fn four_channel_tags_are_rejected() {
    let result = TagBuffer::from_pixels(
        Dimensions {
            width: 1,
            height: 1,
        },
        4,
        &[0, 0, 0, 0],
    );
    assert!(matches!(result, Err(SegmentError::InvalidChannels(4))));
}

#[test]
fn png_round_trip_through_full_pipeline() {
    // Two flat halves with a thin stripe of a third color between them.
    let image = RgbImage::from_fn(24, 16, |x, _| {
        image::Rgb(match x {
            0..=10 => RED,
            11 => [120, 200, 90],
            _ => BLUE,
        })
    });
    let mut png = Vec::new();
    image::ImageEncoder::write_image(
        image::codecs::png::PngEncoder::new(&mut png),
        image.as_raw(),
        image.width(),
        image.height(),
        image::ExtendedColorType::Rgb8,
    )
    .unwrap();

    let result = spmerge_pipeline::process(&png, &SegmentConfig::default()).unwrap();
    assert_eq!(
        result.dimensions,
        Dimensions {
            width: 24,
            height: 16
        }
    );
    assert_eq!(result.reports.len(), 5);
    assert!(result.regions.len() >= 2);
    assert!(result.regions.len() < 24);
    let total: usize = result.regions.iter().map(|r| r.pixel_count).sum();
    assert_eq!(total, 24 * 16);
    assert!(result.regions.windows(2).all(|w| w[0].pixel_count >= w[1].pixel_count));

    // The output tags reparse into the same partition.
    let reparsed = SuperpixelGraph::parse(&result.tags).unwrap();
    assert_eq!(reparsed.len(), result.regions.len());
}
