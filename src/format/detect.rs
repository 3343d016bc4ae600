//! Slide format detection.
//!
//! - **Aperio SVS**: tiled TIFF whose first ImageDescription mentions "Aperio"
//! - **Generic pyramidal TIFF**: any other tiled TIFF
//! - **Raster**: a single image the `image` crate can decode (PNG, JPEG,
//!   strip-based TIFF), treated as a one-level slide

use super::svs::APERIO_MARKER;
use super::tiff::TIFF_HEADER_SIZE;

/// Detected slide format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlideFormat {
    AperioSvs,
    GenericTiff,
    Raster,
}

impl SlideFormat {
    pub const fn name(&self) -> &'static str {
        match self {
            SlideFormat::AperioSvs => "Aperio SVS",
            SlideFormat::GenericTiff => "Generic Pyramidal TIFF",
            SlideFormat::Raster => "Raster image",
        }
    }
}

/// Whether the leading bytes carry TIFF or BigTIFF magic.
pub fn is_tiff(header: &[u8]) -> bool {
    if header.len() < TIFF_HEADER_SIZE {
        return false;
    }
    matches!(
        (header[0], header[1], header[2], header[3]),
        (b'I', b'I', 42 | 43, 0) | (b'M', b'M', 0, 42 | 43)
    )
}

/// Classify a tiled TIFF by its first ImageDescription.
pub fn classify_tiff(description: Option<&str>) -> SlideFormat {
    match description {
        Some(text) if text.contains(APERIO_MARKER) => SlideFormat::AperioSvs,
        _ => SlideFormat::GenericTiff,
    }
}
