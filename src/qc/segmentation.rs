//! Tissue segmentation.
//!
//! ```text
//! RGB ──► luminance ──► invert ──► drop 255 ──► Otsu ──► > t ──► dilate 5x5 (x3)
//! ```
//!
//! Stained tissue is darker than the glass, so after inversion it is the
//! bright class. Pixels that were pure black before inversion are scanner
//! artifacts and are zeroed before the histogram is built.

use image::{imageops, GrayImage, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::morphology::dilate;
use imageproc::stats::histogram;
use tracing::{debug, warn};

use crate::error::QcError;

use super::mask::Mask;

/// Radius of the square structuring element (L-infinity norm, so 5x5)
pub const DILATION_RADIUS: u8 = 2;

/// Number of dilation passes
pub const DILATION_ITERATIONS: usize = 3;

/// Result of segmenting one raster.
#[derive(Debug, Clone)]
pub struct TissueSegmentation {
    /// Dilated tissue mask
    pub mask: Mask,

    /// Binarized mask before dilation
    pub binarized: Mask,

    /// Otsu threshold on the inverted luminance
    pub otsu_threshold: u8,
}

/// Inverted luminance with pure-black pixels removed.
pub fn inverted_luminance(raster: &RgbImage) -> GrayImage {
    let mut gray = imageops::grayscale(raster);
    for pixel in gray.pixels_mut() {
        let inverted = 255 - pixel.0[0];
        pixel.0[0] = if inverted == 255 { 0 } else { inverted };
    }
    gray
}

/// Segment tissue from a working-resolution raster.
///
/// A uniform raster gives a degenerate threshold; the resulting empty or full
/// mask is returned as-is.
pub fn segment_tissue(raster: &RgbImage) -> Result<TissueSegmentation, QcError> {
    if raster.width() == 0 || raster.height() == 0 {
        return Err(QcError::EmptyRaster);
    }

    let inverted = inverted_luminance(raster);
    let counts = histogram(&inverted).channels[0];
    let otsu_threshold = otsu_threshold(&counts);
    if counts.iter().filter(|c| **c > 0).count() <= 1 {
        warn!(
            threshold = otsu_threshold,
            "Uniform intensity; tissue mask will be degenerate"
        );
    }

    let binarized = Mask::threshold_above(&inverted, otsu_threshold);

    let mut grown = binarized.to_gray();
    for _ in 0..DILATION_ITERATIONS {
        grown = dilate(&grown, Norm::LInf, DILATION_RADIUS);
    }
    let mask = Mask::from_gray(&grown);

    debug!(
        threshold = otsu_threshold,
        binarized = binarized.count(),
        dilated = mask.count(),
        total = mask.area(),
        "Segmented tissue"
    );

    Ok(TissueSegmentation {
        mask,
        binarized,
        otsu_threshold,
    })
}

/// Otsu threshold of a 256-bin histogram: the level `t` maximizing the
/// between-class variance of `<= t` against `> t`. Ties keep the lowest level.
///
/// Accumulates in `u64`/`f64` so bins of any size are safe.
pub fn otsu_threshold(counts: &[u32; 256]) -> u8 {
    let total: u64 = counts.iter().map(|&c| c as u64).sum();
    let total_sum: f64 = counts
        .iter()
        .enumerate()
        .map(|(level, &c)| level as f64 * c as f64)
        .sum();

    let mut background_weight = 0u64;
    let mut background_sum = 0f64;
    let mut best_variance = 0f64;
    let mut best_threshold = 0u8;

    for (level, &count) in counts.iter().enumerate() {
        background_weight += count as u64;
        if background_weight == 0 {
            continue;
        }
        let foreground_weight = total - background_weight;
        if foreground_weight == 0 {
            break;
        }

        background_sum += level as f64 * count as f64;
        let background_mean = background_sum / background_weight as f64;
        let foreground_mean = (total_sum - background_sum) / foreground_weight as f64;
        let variance = background_weight as f64
            * foreground_weight as f64
            * (background_mean - foreground_mean).powi(2);

        if variance > best_variance {
            best_variance = variance;
            best_threshold = level as u8;
        }
    }

    best_threshold
}
