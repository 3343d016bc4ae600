//! Stitching tiled pyramid levels into RGB rasters.
//!
//! ```text
//! TileOffsets[i] ──► range read ──► JPEGTables merge ──► decode ──► copy into level
//! ```
//!
//! Only JPEG and uncompressed 8-bit tiles are decoded. Other compressions
//! (LZW, Deflate, JPEG 2000) are reported as unsupported.

use image::{GrayImage, ImageFormat, RgbImage};
use tracing::debug;

use crate::error::{SlideError, TiffError};
use crate::io::RangeReader;

use super::jpeg::prepare_tile_jpeg;
use super::tiff::{Compression, PyramidLevel};

/// Largest level, in pixels, that will be materialized in memory.
pub const MAX_LEVEL_PIXELS: u64 = 1 << 28;

/// Read and stitch every tile of `level` into one RGB image.
pub async fn read_level<R: RangeReader + ?Sized>(
    reader: &R,
    level: &PyramidLevel,
) -> Result<RgbImage, SlideError> {
    if level.pixel_count() > MAX_LEVEL_PIXELS {
        return Err(SlideError::LevelTooLarge {
            level: level.level_index,
            width: level.width,
            height: level.height,
        });
    }
    check_decodable(level)?;

    let mut canvas = RgbImage::new(level.width, level.height);
    for tile_y in 0..level.tiles_y {
        for tile_x in 0..level.tiles_x {
            let tile = read_tile(reader, level, tile_x, tile_y).await?;
            let (valid_w, valid_h) = level
                .tile_dimensions(tile_x, tile_y)
                .ok_or(SlideError::NoLevels)?;
            let x0 = tile_x * level.tile_width;
            let y0 = tile_y * level.tile_height;

            for y in 0..valid_h.min(tile.height()) {
                for x in 0..valid_w.min(tile.width()) {
                    canvas.put_pixel(x0 + x, y0 + y, *tile.get_pixel(x, y));
                }
            }
        }
    }

    debug!(
        level = level.level_index,
        width = level.width,
        height = level.height,
        tiles = level.tiles_x * level.tiles_y,
        "Stitched pyramid level"
    );
    Ok(canvas)
}

fn check_decodable(level: &PyramidLevel) -> Result<(), SlideError> {
    if !level.compression.is_decodable() {
        return Err(TiffError::UnsupportedCompression(level.compression.name()).into());
    }
    if level.compression == Compression::None {
        if level.bits_per_sample != 8 {
            return Err(TiffError::InvalidTagValue {
                tag: "BitsPerSample",
                message: format!("expected 8, got {}", level.bits_per_sample),
            }
            .into());
        }
        if !matches!(level.samples_per_pixel, 1 | 3) {
            return Err(TiffError::InvalidTagValue {
                tag: "SamplesPerPixel",
                message: format!("expected 1 or 3, got {}", level.samples_per_pixel),
            }
            .into());
        }
    }
    Ok(())
}

/// Decode a single tile; the result is a full tile, edge padding included.
async fn read_tile<R: RangeReader + ?Sized>(
    reader: &R,
    level: &PyramidLevel,
    tile_x: u32,
    tile_y: u32,
) -> Result<RgbImage, SlideError> {
    let index = level
        .tile_index(tile_x, tile_y)
        .ok_or(SlideError::NoLevels)?;
    let (offset, length) = level
        .tiles
        .location(index)
        .ok_or(TiffError::MissingTag("TileOffsets"))?;

    let raw = reader.read_exact_at(offset, length as usize).await?;

    match level.compression {
        Compression::Jpeg => {
            let stream = prepare_tile_jpeg(level.tiles.jpeg_tables.as_deref(), raw);
            let decoded = image::load_from_memory_with_format(&stream, ImageFormat::Jpeg)
                .map_err(|e| SlideError::Decode {
                    message: format!(
                        "tile ({}, {}) of level {}: {}",
                        tile_x, tile_y, level.level_index, e
                    ),
                })?;
            Ok(decoded.to_rgb8())
        }
        _ => decode_uncompressed(level, raw.to_vec(), tile_x, tile_y),
    }
}

fn decode_uncompressed(
    level: &PyramidLevel,
    data: Vec<u8>,
    tile_x: u32,
    tile_y: u32,
) -> Result<RgbImage, SlideError> {
    let (w, h) = (level.tile_width, level.tile_height);
    let actual = data.len();
    let short = || SlideError::Decode {
        message: format!(
            "uncompressed tile ({}, {}) of level {}: expected {} bytes, got {}",
            tile_x,
            tile_y,
            level.level_index,
            level.samples_per_pixel as usize * w as usize * h as usize,
            actual
        ),
    };

    if level.samples_per_pixel == 1 {
        let gray = GrayImage::from_raw(w, h, data).ok_or_else(short)?;
        Ok(image::DynamicImage::ImageLuma8(gray).to_rgb8())
    } else {
        RgbImage::from_raw(w, h, data).ok_or_else(short)
    }
}
