//! Test utilities for integration tests.
//!
//! Builders for synthetic slides: tiled TIFFs (uncompressed or JPEG tiles,
//! optionally with shared JPEGTables and an Aperio description), plain PNG
//! rasters, and scratch directories under the system temp dir.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, Rgb, RgbImage};

use wsi_qc::{RunConfig, WorkSize};

// =============================================================================
// Scratch Directories
// =============================================================================

static SCRATCH_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// A fresh, empty directory removed on drop.
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub fn new(label: &str) -> Self {
        let n = SCRATCH_COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "wsi-qc-it-{}-{}-{}",
            label,
            std::process::id(),
            n
        ));
        let _ = std::fs::remove_dir_all(&path);
        std::fs::create_dir_all(&path).unwrap();
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Write `data` to `name` inside the directory.
    pub fn write(&self, name: &str, data: &[u8]) -> PathBuf {
        let path = self.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

/// Run configuration for PNG test slides: level 0 as the working raster.
pub fn png_config(input: &Path, output: &Path) -> RunConfig {
    let mut config = RunConfig::new(input, output);
    config.extensions = "png".to_string();
    config.work_size = WorkSize::Level(0);
    config
}

// =============================================================================
// Synthetic Rasters
// =============================================================================

pub const SLIDE_SIZE: u32 = 300;
pub const TISSUE_ORIGIN: u32 = 50;
pub const TISSUE_SIZE: u32 = 200;

fn in_tissue(x: u32, y: u32) -> bool {
    let range = TISSUE_ORIGIN..TISSUE_ORIGIN + TISSUE_SIZE;
    range.contains(&x) && range.contains(&y)
}

/// White background with a square of high-contrast checkerboard "tissue".
pub fn sharp_slide() -> RgbImage {
    RgbImage::from_fn(SLIDE_SIZE, SLIDE_SIZE, |x, y| {
        if !in_tissue(x, y) {
            Rgb([255, 255, 255])
        } else if (x + y) % 2 == 0 {
            Rgb([50, 40, 60])
        } else {
            Rgb([200, 190, 210])
        }
    })
}

/// White background with a square of flat, featureless "tissue".
pub fn blurry_slide() -> RgbImage {
    RgbImage::from_fn(SLIDE_SIZE, SLIDE_SIZE, |x, y| {
        if in_tissue(x, y) {
            Rgb([120, 110, 130])
        } else {
            Rgb([255, 255, 255])
        }
    })
}

pub fn encode_png(image: &RgbImage) -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    encoder.encode_image(image).unwrap();
    buf
}

// =============================================================================
// Tiled TIFF Builder
// =============================================================================

const TIFF_SHORT: u16 = 3;
const TIFF_LONG: u16 = 4;
const TIFF_ASCII: u16 = 2;
const TIFF_UNDEFINED: u16 = 7;

/// One pyramid level of a synthetic tiled TIFF.
pub struct TiffLevel {
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    /// 1 = none, 7 = JPEG
    pub compression: u16,
    /// Encoded tiles in row-major order
    pub tiles: Vec<Vec<u8>>,
    pub jpeg_tables: Option<Vec<u8>>,
}

impl TiffLevel {
    /// Cut `image` into uncompressed RGB tiles, padding edge tiles with black.
    pub fn uncompressed(image: &RgbImage, tile_size: u32) -> Self {
        let tiles = cut_tiles(image, tile_size)
            .into_iter()
            .map(|tile| tile.into_raw())
            .collect();
        Self {
            width: image.width(),
            height: image.height(),
            tile_size,
            compression: 1,
            tiles,
            jpeg_tables: None,
        }
    }

    /// Cut `image` into self-contained JPEG tiles.
    pub fn jpeg(image: &RgbImage, tile_size: u32) -> Self {
        let tiles = cut_tiles(image, tile_size)
            .iter()
            .map(|tile| encode_jpeg(tile, 95))
            .collect();
        Self {
            width: image.width(),
            height: image.height(),
            tile_size,
            compression: 7,
            tiles,
            jpeg_tables: None,
        }
    }

    /// Cut `image` into abbreviated JPEG tiles sharing one JPEGTables blob,
    /// the way Aperio scanners store them.
    pub fn jpeg_with_shared_tables(image: &RgbImage, tile_size: u32) -> Self {
        let mut tables = None;
        let tiles = cut_tiles(image, tile_size)
            .iter()
            .map(|tile| {
                let (tile_tables, abbreviated) = split_jpeg_stream(&encode_jpeg(tile, 95));
                tables.get_or_insert(tile_tables);
                abbreviated
            })
            .collect();
        Self {
            width: image.width(),
            height: image.height(),
            tile_size,
            compression: 7,
            tiles,
            jpeg_tables: tables,
        }
    }
}

fn cut_tiles(image: &RgbImage, tile_size: u32) -> Vec<RgbImage> {
    let tiles_x = image.width().div_ceil(tile_size);
    let tiles_y = image.height().div_ceil(tile_size);
    let mut tiles = Vec::new();
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            tiles.push(RgbImage::from_fn(tile_size, tile_size, |x, y| {
                let (gx, gy) = (tx * tile_size + x, ty * tile_size + y);
                if gx < image.width() && gy < image.height() {
                    *image.get_pixel(gx, gy)
                } else {
                    Rgb([0, 0, 0])
                }
            }));
        }
    }
    tiles
}

/// Split a baseline JPEG into a tables-only stream and an abbreviated stream.
///
/// Every segment before SOS goes to the tables (DQT, DHT and friends) except
/// SOF, which stays with the scan.
fn split_jpeg_stream(jpeg: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut tables = vec![0xFF, 0xD8];
    let mut scan = vec![0xFF, 0xD8];
    let mut i = 2;
    while i + 4 <= jpeg.len() {
        assert_eq!(jpeg[i], 0xFF, "expected a marker at {}", i);
        let marker = jpeg[i + 1];
        if marker == 0xDA {
            scan.extend_from_slice(&jpeg[i..]);
            break;
        }
        let len = u16::from_be_bytes([jpeg[i + 2], jpeg[i + 3]]) as usize;
        let segment = &jpeg[i..i + 2 + len];
        match marker {
            0xC0..=0xC3 => scan.extend_from_slice(segment),
            0xE0..=0xEF => {}
            _ => tables.extend_from_slice(segment),
        }
        i += 2 + len;
    }
    tables.extend_from_slice(&[0xFF, 0xD9]);
    (tables, scan)
}

struct Entry {
    tag: u16,
    field_type: u16,
    count: u32,
    payload: Vec<u8>,
}

impl Entry {
    fn short(tag: u16, value: u16) -> Self {
        Self {
            tag,
            field_type: TIFF_SHORT,
            count: 1,
            payload: value.to_le_bytes().to_vec(),
        }
    }

    fn shorts(tag: u16, values: &[u16]) -> Self {
        Self {
            tag,
            field_type: TIFF_SHORT,
            count: values.len() as u32,
            payload: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    fn long(tag: u16, value: u32) -> Self {
        Self::longs(tag, &[value])
    }

    fn longs(tag: u16, values: &[u32]) -> Self {
        Self {
            tag,
            field_type: TIFF_LONG,
            count: values.len() as u32,
            payload: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    fn ascii(tag: u16, text: &str) -> Self {
        let mut payload = text.as_bytes().to_vec();
        payload.push(0);
        Self {
            tag,
            field_type: TIFF_ASCII,
            count: payload.len() as u32,
            payload,
        }
    }

    fn undefined(tag: u16, data: &[u8]) -> Self {
        Self {
            tag,
            field_type: TIFF_UNDEFINED,
            count: data.len() as u32,
            payload: data.to_vec(),
        }
    }
}

/// Build a little-endian classic TIFF with one tiled RGB IFD per level.
///
/// `description` becomes the first IFD's ImageDescription.
pub fn build_tiled_tiff(levels: &[TiffLevel], description: Option<&str>) -> Vec<u8> {
    let mut data = b"II".to_vec();
    data.extend_from_slice(&42u16.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());

    // Tile payloads first, so their offsets are known when writing IFDs
    let mut tile_locations = Vec::with_capacity(levels.len());
    for level in levels {
        let mut offsets = Vec::with_capacity(level.tiles.len());
        let mut counts = Vec::with_capacity(level.tiles.len());
        for tile in &level.tiles {
            offsets.push(data.len() as u32);
            counts.push(tile.len() as u32);
            data.extend_from_slice(tile);
        }
        tile_locations.push((offsets, counts));
    }

    let mut previous_next_pointer = 4usize;
    for (index, (level, (offsets, counts))) in levels.iter().zip(tile_locations).enumerate() {
        let mut entries = vec![
            Entry::long(256, level.width),
            Entry::long(257, level.height),
            Entry::shorts(258, &[8, 8, 8]),
            Entry::short(259, level.compression),
            Entry::short(262, if level.compression == 7 { 6 } else { 2 }),
            Entry::short(277, 3),
            Entry::long(322, level.tile_size),
            Entry::long(323, level.tile_size),
            Entry::longs(324, &offsets),
            Entry::longs(325, &counts),
        ];
        if let (0, Some(text)) = (index, description) {
            entries.push(Entry::ascii(270, text));
        }
        if let Some(tables) = &level.jpeg_tables {
            entries.push(Entry::undefined(347, tables));
        }
        entries.sort_by_key(|e| e.tag);

        if data.len() % 2 == 1 {
            data.push(0);
        }
        let ifd_offset = data.len();
        data[previous_next_pointer..previous_next_pointer + 4]
            .copy_from_slice(&(ifd_offset as u32).to_le_bytes());

        let ifd_size = 2 + entries.len() * 12 + 4;
        let mut external = Vec::new();
        let mut ifd = Vec::with_capacity(ifd_size);
        ifd.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        for entry in &entries {
            ifd.extend_from_slice(&entry.tag.to_le_bytes());
            ifd.extend_from_slice(&entry.field_type.to_le_bytes());
            ifd.extend_from_slice(&entry.count.to_le_bytes());
            if entry.payload.len() <= 4 {
                let mut inline = entry.payload.clone();
                inline.resize(4, 0);
                ifd.extend_from_slice(&inline);
            } else {
                if external.len() % 2 == 1 {
                    external.push(0);
                }
                let offset = ifd_offset + ifd_size + external.len();
                ifd.extend_from_slice(&(offset as u32).to_le_bytes());
                external.extend_from_slice(&entry.payload);
            }
        }
        previous_next_pointer = ifd_offset + ifd.len();
        ifd.extend_from_slice(&0u32.to_le_bytes());

        data.extend_from_slice(&ifd);
        data.extend_from_slice(&external);
    }

    data
}

/// Aperio-style ImageDescription.
pub fn aperio_description(width: u32, height: u32, app_mag: f64) -> String {
    format!(
        "Aperio Image Library v12.0.15\r\n{w}x{h} [0,0 {w}x{h}] (256x256) JPEG/RGB Q=95|AppMag = {mag}|MPP = 0.499",
        w = width,
        h = height,
        mag = app_mag
    )
}

/// Box-average `image` by an integer factor.
pub fn downsample(image: &RgbImage, factor: u32) -> RgbImage {
    let (w, h) = (image.width() / factor, image.height() / factor);
    RgbImage::from_fn(w, h, |x, y| {
        let mut sum = [0u32; 3];
        for dy in 0..factor {
            for dx in 0..factor {
                let p = image.get_pixel(x * factor + dx, y * factor + dy);
                for c in 0..3 {
                    sum[c] += p[c] as u32;
                }
            }
        }
        let n = factor * factor;
        Rgb([(sum[0] / n) as u8, (sum[1] / n) as u8, (sum[2] / n) as u8])
    })
}

/// A 4-quadrant color pattern that survives JPEG compression recognizably.
pub fn quadrant_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        match (x < width / 2, y < height / 2) {
            (true, true) => Rgb([220, 40, 40]),
            (false, true) => Rgb([40, 220, 40]),
            (true, false) => Rgb([40, 40, 220]),
            (false, false) => Rgb([230, 230, 230]),
        }
    })
}

/// Whether two pixels differ by at most `tolerance` in every channel.
pub fn close(a: &Rgb<u8>, b: &Rgb<u8>, tolerance: u8) -> bool {
    a.0.iter().zip(b.0.iter()).all(|(x, y)| x.abs_diff(*y) <= tolerance)
}
