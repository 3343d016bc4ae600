//! TIFF pyramid level identification.
//!
//! Slide files hold several IFDs, and only some of them are pyramid levels.
//! The rest are label, macro or thumbnail images that must not be mistaken
//! for a resolution level.
//!
//! # Identification
//!
//! ```text
//! IFD chain ──► tiled IFDs ──► sort by area ──► keep aspect ratio of level 0
//!                                               │
//!                                               ▼
//!                                 level 0, level 1 (~2^k), level 2, ...
//! ```
//!
//! Macro and label images are usually tiled as well in SVS files, but their
//! aspect ratio differs from the scanned region, which is what filters them out.

use std::collections::HashSet;

use bytes::Bytes;
use tracing::debug;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{Ifd, TiffHeader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE};
use super::tags::{Compression, TiffTag};
use super::values::ValueReader;

// =============================================================================
// Constants
// =============================================================================

/// Maximum number of IFDs to follow in the chain
const MAX_IFDS: usize = 100;

/// Relative aspect-ratio difference tolerated between a level and level 0
const ASPECT_TOLERANCE: f64 = 0.05;

/// Relative slack when comparing a level's downsample with a requested one
const DOWNSAMPLE_TOLERANCE: f64 = 0.01;

// =============================================================================
// TileData
// =============================================================================

/// Tile locations and shared JPEG tables of one level.
#[derive(Debug, Clone, Default)]
pub struct TileData {
    /// Byte offset of each tile, row-major
    pub offsets: Vec<u64>,

    /// Byte count of each tile
    pub byte_counts: Vec<u64>,

    /// JPEGTables shared by abbreviated tile streams
    pub jpeg_tables: Option<Bytes>,
}

impl TileData {
    /// Offset and length of a tile.
    pub fn location(&self, tile_index: u32) -> Option<(u64, u64)> {
        let idx = tile_index as usize;
        Some((*self.offsets.get(idx)?, *self.byte_counts.get(idx)?))
    }
}

// =============================================================================
// PyramidLevel
// =============================================================================

/// A single resolution level of a tiled TIFF.
#[derive(Debug, Clone)]
pub struct PyramidLevel {
    /// Position in the pyramid (0 = full resolution)
    pub level_index: usize,

    /// Position of the IFD in the file's chain
    pub ifd_index: usize,

    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tiles_x: u32,
    pub tiles_y: u32,

    /// Downsample relative to level 0
    pub downsample: f64,

    pub compression: Compression,

    /// Channels per pixel (1 = gray, 3 = RGB/YCbCr)
    pub samples_per_pixel: u16,

    /// Bits per channel
    pub bits_per_sample: u16,

    pub tiles: TileData,
}

impl PyramidLevel {
    /// Row-major tile index, `None` outside the grid.
    pub fn tile_index(&self, tile_x: u32, tile_y: u32) -> Option<u32> {
        if tile_x >= self.tiles_x || tile_y >= self.tiles_y {
            return None;
        }
        Some(tile_y * self.tiles_x + tile_x)
    }

    /// Number of valid pixels of a tile; edge tiles may be partial.
    pub fn tile_dimensions(&self, tile_x: u32, tile_y: u32) -> Option<(u32, u32)> {
        if tile_x >= self.tiles_x || tile_y >= self.tiles_y {
            return None;
        }
        let w = (self.width - tile_x * self.tile_width).min(self.tile_width);
        let h = (self.height - tile_y * self.tile_height).min(self.tile_height);
        Some((w, h))
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

// =============================================================================
// TiffPyramid
// =============================================================================

/// The pyramid levels of a tiled TIFF, sorted from full resolution down.
#[derive(Debug, Clone)]
pub struct TiffPyramid {
    pub header: TiffHeader,

    pub levels: Vec<PyramidLevel>,

    /// ImageDescription of the first IFD (vendor metadata in SVS files)
    pub description: Option<String>,

    /// Number of IFDs read from the chain
    pub ifd_count: usize,
}

impl TiffPyramid {
    /// Parse the header, walk the IFD chain and load tile tables for every
    /// pyramid level.
    pub async fn parse<R: RangeReader + ?Sized>(reader: &R) -> Result<Self, TiffError> {
        let header_len = (BIGTIFF_HEADER_SIZE as u64).min(reader.size()) as usize;
        if header_len < TIFF_HEADER_SIZE {
            return Err(TiffError::FileTooSmall {
                required: TIFF_HEADER_SIZE as u64,
                actual: reader.size(),
            });
        }
        let header_bytes = reader.read_exact_at(0, header_len).await?;
        let header = TiffHeader::parse(&header_bytes, reader.size())?;

        let ifds = read_ifd_chain(reader, &header).await?;
        let ifd_count = ifds.len();

        let values = ValueReader::new(reader, &header);
        let description = match ifds.first().and_then(|ifd| ifd.entry(TiffTag::ImageDescription)) {
            Some(entry) => Some(values.read_string(entry).await?),
            None => None,
        };

        let mut candidates = Vec::new();
        for (ifd_index, ifd) in ifds.iter().enumerate() {
            if let Some(level) = load_level(&values, &header, ifd, ifd_index).await? {
                candidates.push(level);
            }
        }

        let levels = arrange_levels(candidates);
        debug!(
            ifds = ifd_count,
            levels = levels.len(),
            bigtiff = header.is_bigtiff,
            "Parsed TIFF pyramid"
        );

        Ok(TiffPyramid {
            header,
            levels,
            description,
            ifd_count,
        })
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, index: usize) -> Option<&PyramidLevel> {
        self.levels.get(index)
    }

    /// Dimensions of level 0.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.levels.first().map(|l| (l.width, l.height))
    }

    /// The coarsest level whose downsample does not exceed `downsample`.
    ///
    /// Reading that level and shrinking it never upsamples; requests finer
    /// than level 0 get level 0.
    pub fn best_level_for_downsample(&self, downsample: f64) -> Option<&PyramidLevel> {
        let limit = downsample * (1.0 + DOWNSAMPLE_TOLERANCE);
        self.levels
            .iter()
            .filter(|l| l.downsample <= limit)
            .last()
            .or_else(|| self.levels.first())
    }
}

async fn read_ifd_chain<R: RangeReader + ?Sized>(
    reader: &R,
    header: &TiffHeader,
) -> Result<Vec<Ifd>, TiffError> {
    let mut ifds = Vec::new();
    let mut seen = HashSet::new();
    let mut offset = header.first_ifd_offset;

    while offset != 0 && ifds.len() < MAX_IFDS {
        if !seen.insert(offset) {
            debug!(offset, "IFD chain loops back; stopping");
            break;
        }
        if offset >= reader.size() {
            return Err(TiffError::InvalidIfdOffset(offset));
        }

        let count_bytes = reader.read_exact_at(offset, header.ifd_count_size()).await?;
        let entry_count = header.read_entry_count(&count_bytes);
        let ifd_size = Ifd::byte_size(entry_count, header);
        let ifd_bytes = reader.read_exact_at(offset, ifd_size).await?;
        let ifd = Ifd::parse(&ifd_bytes, header)?;

        offset = ifd.next_ifd_offset;
        ifds.push(ifd);
    }

    Ok(ifds)
}

/// Build a level from a tiled IFD; strip-based IFDs yield `None`.
async fn load_level<R: RangeReader + ?Sized>(
    values: &ValueReader<'_, R>,
    header: &TiffHeader,
    ifd: &Ifd,
    ifd_index: usize,
) -> Result<Option<PyramidLevel>, TiffError> {
    if !ifd.is_tiled() {
        return Ok(None);
    }

    let order = header.byte_order;
    let required = |tag: TiffTag| -> Result<u32, TiffError> {
        let value = ifd.scalar(tag, order).ok_or(TiffError::MissingTag(tag.name()))?;
        u32::try_from(value)
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| TiffError::InvalidTagValue {
                tag: tag.name(),
                message: format!("expected a positive 32-bit value, got {}", value),
            })
    };

    let width = required(TiffTag::ImageWidth)?;
    let height = required(TiffTag::ImageLength)?;
    let tile_width = required(TiffTag::TileWidth)?;
    let tile_height = required(TiffTag::TileLength)?;

    let compression = Compression::from_u16(
        ifd.scalar(TiffTag::Compression, order).unwrap_or(1) as u16,
    );
    let samples_per_pixel = ifd.scalar(TiffTag::SamplesPerPixel, order).unwrap_or(1) as u16;
    let bits_per_sample = match ifd.entry(TiffTag::BitsPerSample) {
        Some(entry) => values
            .read_u64_array(entry)
            .await?
            .first()
            .copied()
            .unwrap_or(8) as u16,
        None => 1,
    };

    let tiles_x = width.div_ceil(tile_width);
    let tiles_y = height.div_ceil(tile_height);
    let expected = tiles_x as usize * tiles_y as usize;

    let offsets = read_tile_array(values, ifd, TiffTag::TileOffsets, expected).await?;
    let byte_counts = read_tile_array(values, ifd, TiffTag::TileByteCounts, expected).await?;

    let jpeg_tables = match ifd.entry(TiffTag::JpegTables) {
        Some(entry) => Some(values.read_bytes(entry).await?),
        None => None,
    };

    Ok(Some(PyramidLevel {
        level_index: 0,
        ifd_index,
        width,
        height,
        tile_width,
        tile_height,
        tiles_x,
        tiles_y,
        downsample: 1.0,
        compression,
        samples_per_pixel,
        bits_per_sample,
        tiles: TileData {
            offsets,
            byte_counts,
            jpeg_tables,
        },
    }))
}

async fn read_tile_array<R: RangeReader + ?Sized>(
    values: &ValueReader<'_, R>,
    ifd: &Ifd,
    tag: TiffTag,
    expected: usize,
) -> Result<Vec<u64>, TiffError> {
    let entry = ifd.entry(tag).ok_or(TiffError::MissingTag(tag.name()))?;
    let array = values.read_u64_array(entry).await?;
    if array.len() < expected {
        return Err(TiffError::InvalidTagValue {
            tag: tag.name(),
            message: format!("expected {} tiles, found {}", expected, array.len()),
        });
    }
    Ok(array)
}

/// Order candidates by area and keep those sharing level 0's aspect ratio.
fn arrange_levels(mut candidates: Vec<PyramidLevel>) -> Vec<PyramidLevel> {
    candidates.sort_by_key(|l| std::cmp::Reverse(l.pixel_count()));

    let Some(base) = candidates.first() else {
        return candidates;
    };
    let base_aspect = base.aspect_ratio();
    let (base_width, base_height) = (base.width as f64, base.height as f64);

    let mut levels: Vec<PyramidLevel> = Vec::new();
    for mut level in candidates {
        let relative = (level.aspect_ratio() - base_aspect).abs() / base_aspect;
        if relative > ASPECT_TOLERANCE {
            debug!(
                ifd = level.ifd_index,
                width = level.width,
                height = level.height,
                "Skipping non-pyramid IFD"
            );
            continue;
        }
        if levels
            .last()
            .is_some_and(|prev| prev.width == level.width && prev.height == level.height)
        {
            continue;
        }

        let downsample_x = base_width / level.width as f64;
        let downsample_y = base_height / level.height as f64;
        level.downsample = (downsample_x + downsample_y) / 2.0;
        level.level_index = levels.len();
        levels.push(level);
    }

    levels
}

// =============================================================================
// Tests
// =============================================================================
