//! Image accessor integration tests.
//!
//! Tests verify:
//! - Tiled TIFF pyramids open with their levels and downsamples
//! - Thumbnails pick a pyramid level and shrink it to the requested size
//! - JPEG tiles, including Aperio abbreviated tiles with shared JPEGTables, decode
//! - Plain rasters open as single-level slides

use std::sync::Arc;

use wsi_qc::format::jpeg::is_abbreviated_stream;
use wsi_qc::{MemoryRangeReader, OpenOptions, SlideError, SlideFormat, SlideHandle, WorkSize};

use super::test_utils::{
    aperio_description, build_tiled_tiff, close, downsample, encode_png, quadrant_image,
    sharp_slide, ScratchDir, TiffLevel,
};

async fn open_bytes(data: Vec<u8>, name: &str) -> Result<SlideHandle, SlideError> {
    SlideHandle::from_reader(
        Box::new(MemoryRangeReader::new(data, name)),
        OpenOptions::default(),
    )
    .await
}

// =============================================================================
// Tiled TIFF
// =============================================================================

#[tokio::test]
async fn test_uncompressed_pyramid_levels() {
    let base = quadrant_image(512, 384);
    let half = downsample(&base, 2);
    let data = build_tiled_tiff(
        &[
            TiffLevel::uncompressed(&base, 128),
            TiffLevel::uncompressed(&half, 128),
        ],
        None,
    );

    let slide = open_bytes(data, "pyramid.tif").await.unwrap();
    assert_eq!(slide.format(), SlideFormat::GenericTiff);
    assert_eq!(slide.level_count(), 2);
    assert_eq!(slide.dimensions(), (512, 384));

    let level1 = slide.level_info(1).unwrap();
    assert_eq!((level1.width, level1.height), (256, 192));
    assert!((level1.downsample - 2.0).abs() < 1e-9);
    assert!(slide.base_magnification().is_none());
}

#[tokio::test]
async fn test_level_work_size_reads_stored_pixels() {
    let base = quadrant_image(512, 384);
    let half = downsample(&base, 2);
    let data = build_tiled_tiff(
        &[
            TiffLevel::uncompressed(&base, 128),
            TiffLevel::uncompressed(&half, 128),
        ],
        None,
    );
    let slide = open_bytes(data, "pyramid.tif").await.unwrap();

    let level1 = slide.thumbnail(&WorkSize::Level(1)).await.unwrap();
    assert_eq!(level1.dimensions(), (256, 192));
    assert_eq!(level1.as_ref(), &half);

    // Out-of-range levels clamp to the last one
    let clamped = slide.thumbnail(&WorkSize::Level(7)).await.unwrap();
    assert_eq!(clamped.dimensions(), (256, 192));
}

#[tokio::test]
async fn test_max_dimension_thumbnail_is_shrunk() {
    let base = quadrant_image(512, 384);
    let half = downsample(&base, 2);
    let data = build_tiled_tiff(
        &[
            TiffLevel::uncompressed(&base, 128),
            TiffLevel::uncompressed(&half, 128),
        ],
        None,
    );
    let slide = open_bytes(data, "pyramid.tif").await.unwrap();

    let thumb = slide.thumbnail(&WorkSize::MaxDimension(128)).await.unwrap();
    assert_eq!(thumb.dimensions(), (128, 96));
    // Quadrant colors survive the resample
    assert!(close(thumb.get_pixel(10, 10), &image::Rgb([220, 40, 40]), 8));
    assert!(close(thumb.get_pixel(118, 86), &image::Rgb([230, 230, 230]), 8));
}

#[tokio::test]
async fn test_thumbnail_is_memoized() {
    let data = build_tiled_tiff(&[TiffLevel::uncompressed(&quadrant_image(256, 256), 128)], None);
    let slide = open_bytes(data, "memo.tif").await.unwrap();

    let a = slide.thumbnail(&WorkSize::Downscale(0.5)).await.unwrap();
    let b = slide.thumbnail(&WorkSize::Downscale(0.5)).await.unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    let c = slide.thumbnail(&WorkSize::Downscale(0.25)).await.unwrap();
    assert_eq!(c.dimensions(), (64, 64));
}

#[tokio::test]
async fn test_jpeg_tiles_decode() {
    let base = quadrant_image(256, 256);
    let data = build_tiled_tiff(&[TiffLevel::jpeg(&base, 128)], None);
    let slide = open_bytes(data, "jpeg.tif").await.unwrap();

    let raster = slide.thumbnail(&WorkSize::Level(0)).await.unwrap();
    assert_eq!(raster.dimensions(), (256, 256));
    assert!(close(raster.get_pixel(32, 32), &image::Rgb([220, 40, 40]), 12));
    assert!(close(raster.get_pixel(200, 32), &image::Rgb([40, 220, 40]), 12));
    assert!(close(raster.get_pixel(32, 200), &image::Rgb([40, 40, 220]), 12));
}

#[tokio::test]
async fn test_edge_tiles_are_cropped() {
    // 200x150 with 128px tiles leaves partial tiles on both edges
    let base = quadrant_image(200, 150);
    let data = build_tiled_tiff(&[TiffLevel::uncompressed(&base, 128)], None);
    let slide = open_bytes(data, "edges.tif").await.unwrap();

    let raster = slide.thumbnail(&WorkSize::Level(0)).await.unwrap();
    assert_eq!(raster.dimensions(), (200, 150));
    assert_eq!(raster.as_ref(), &base);
}

// =============================================================================
// Aperio SVS
// =============================================================================

#[tokio::test]
async fn test_svs_with_shared_tables() {
    let base = quadrant_image(512, 512);
    let half = downsample(&base, 2);
    let level0 = TiffLevel::jpeg_with_shared_tables(&base, 256);
    assert!(level0.jpeg_tables.is_some());
    assert!(is_abbreviated_stream(&level0.tiles[0]));

    let data = build_tiled_tiff(
        &[level0, TiffLevel::jpeg_with_shared_tables(&half, 256)],
        Some(&aperio_description(512, 512, 20.0)),
    );
    let slide = open_bytes(data, "case.svs").await.unwrap();

    assert_eq!(slide.format(), SlideFormat::AperioSvs);
    assert_eq!(slide.base_magnification(), Some(20.0));
    let metadata = slide.metadata().unwrap();
    assert_eq!(metadata.mpp, Some(0.499));

    // 10x of a 20x scan reads level 1 as stored
    let raster = slide.thumbnail(&WorkSize::Magnification(10.0)).await.unwrap();
    assert_eq!(raster.dimensions(), (256, 256));
    assert!(close(raster.get_pixel(64, 64), &image::Rgb([220, 40, 40]), 12));
    assert!(close(raster.get_pixel(192, 192), &image::Rgb([230, 230, 230]), 12));

    // 1.25x needs a 16x downsample; level 1 is shrunk
    let small = slide.thumbnail(&WorkSize::Magnification(1.25)).await.unwrap();
    assert_eq!(small.dimensions(), (32, 32));
}

#[tokio::test]
async fn test_base_magnification_fallback() {
    let data = build_tiled_tiff(&[TiffLevel::uncompressed(&quadrant_image(256, 256), 128)], None);

    let without = open_bytes(data.clone(), "plain.tif").await.unwrap();
    let err = without
        .thumbnail(&WorkSize::Magnification(1.25))
        .await
        .unwrap_err();
    match err {
        SlideError::UnknownMagnification { slide, spec } => {
            assert_eq!(slide, "plain.tif");
            assert_eq!(spec, "1.25x");
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let options = OpenOptions {
        base_magnification: Some(20.0),
        ..OpenOptions::default()
    };
    let with = SlideHandle::from_reader(
        Box::new(MemoryRangeReader::new(data, "plain.tif")),
        options,
    )
    .await
    .unwrap();
    let raster = with.thumbnail(&WorkSize::Magnification(5.0)).await.unwrap();
    assert_eq!(raster.dimensions(), (64, 64));
}

// =============================================================================
// Rasters and Failures
// =============================================================================

#[tokio::test]
async fn test_png_opens_from_disk() {
    let dir = ScratchDir::new("accessor");
    let image = sharp_slide();
    let path = dir.write("slide.png", &encode_png(&image));

    let slide = SlideHandle::open(&path, OpenOptions::default()).await.unwrap();
    assert_eq!(slide.format(), SlideFormat::Raster);
    assert_eq!(slide.level_count(), 1);

    let raster = slide.thumbnail(&WorkSize::Level(0)).await.unwrap();
    assert_eq!(raster.as_ref(), &image);
}

#[tokio::test]
async fn test_corrupt_file_is_rejected() {
    let err = open_bytes(b"definitely not an image".to_vec(), "junk.svs")
        .await
        .unwrap_err();
    assert!(matches!(err, SlideError::UnsupportedFormat { .. }));
}

#[tokio::test]
async fn test_truncated_tiff_is_rejected() {
    let data = build_tiled_tiff(&[TiffLevel::uncompressed(&quadrant_image(256, 256), 128)], None);
    let truncated = data[..data.len() / 2].to_vec();
    assert!(open_bytes(truncated, "cut.tif").await.is_err());
}

#[tokio::test]
async fn test_missing_file() {
    let err = SlideHandle::open("/no/such/slide.svs", OpenOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SlideError::Io(_)));
}
