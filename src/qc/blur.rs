//! Blur detection.
//!
//! ```text
//! RGB ──► luminance [0,1] ──► |Laplacian| ──► Gaussian(radius) ──► <= threshold
//!                                                                      │
//!                 tissue ◄── AND NOT ── blur = tissue AND resize_nearest ◄┘
//! ```
//!
//! Sharp, textured tissue has high local Laplacian energy; out-of-focus areas
//! are flat. Pixels whose smoothed energy is at or below the threshold are
//! low-energy candidates, and those inside the tissue mask form the blur mask.

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma, RgbImage};
use imageproc::filter::{filter3x3, separable_filter_equal};
use tracing::debug;

use crate::error::QcError;

use super::mask::Mask;
use super::metrics::MaskStatistic;
use super::record::SlideRecord;

type GrayF32 = ImageBuffer<Luma<f32>, Vec<f32>>;

/// 4-neighbour discrete Laplacian
const LAPLACIAN: [f32; 9] = [0.0, -1.0, 0.0, -1.0, 4.0, -1.0, 0.0, -1.0, 0.0];

/// Luminance weights applied to RGB in [0, 1]
const LUMA_WEIGHTS: [f32; 3] = [0.2125, 0.7154, 0.0721];

/// Gaussian support, in standard deviations on each side of the centre
const GAUSSIAN_TRUNCATE: f32 = 4.0;

/// Default Gaussian standard deviation
pub const DEFAULT_BLUR_RADIUS: f32 = 7.0;

/// Default low-energy threshold
pub const DEFAULT_BLUR_THRESHOLD: f32 = 0.05;

/// Blur detector parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlurParams {
    /// Gaussian sigma applied to the Laplacian energy
    pub radius: f32,
    /// Smoothed energy at or below this is low-energy
    pub threshold: f32,
}

impl Default for BlurParams {
    fn default() -> Self {
        Self {
            radius: DEFAULT_BLUR_RADIUS,
            threshold: DEFAULT_BLUR_THRESHOLD,
        }
    }
}

impl BlurParams {
    pub fn validate(&self) -> Result<(), QcError> {
        if !self.radius.is_finite() || self.radius <= 0.0 {
            return Err(QcError::InvalidParameter(format!(
                "blur radius must be positive, got {}",
                self.radius
            )));
        }
        if !self.threshold.is_finite() {
            return Err(QcError::InvalidParameter(format!(
                "blur threshold must be finite, got {}",
                self.threshold
            )));
        }
        Ok(())
    }
}

/// Outcome of blur detection on one slide.
#[derive(Debug, Clone)]
pub struct BlurDetection {
    /// Tissue pixels that are low-energy
    pub blur_mask: Mask,

    /// Tissue mask with the blur removed
    pub updated_tissue: Mask,

    /// Low-energy pixels at the detector's own resolution
    pub low_energy_pixels: u64,
}

/// Normalized luminance in [0, 1].
pub fn luminance(raster: &RgbImage) -> GrayF32 {
    ImageBuffer::from_fn(raster.width(), raster.height(), |x, y| {
        let [r, g, b] = raster.get_pixel(x, y).0;
        let value = LUMA_WEIGHTS[0] * r as f32
            + LUMA_WEIGHTS[1] * g as f32
            + LUMA_WEIGHTS[2] * b as f32;
        Luma([value / 255.0])
    })
}

/// Absolute Laplacian response per pixel.
pub fn laplacian_energy(gray: &GrayF32) -> GrayF32 {
    let mut response: GrayF32 = filter3x3(gray, &LAPLACIAN);
    for pixel in response.pixels_mut() {
        pixel.0[0] = pixel.0[0].abs();
    }
    response
}

/// Normalized 1-D Gaussian kernel with standard deviation `sigma`, cut off
/// at `GAUSSIAN_TRUNCATE` sigmas.
pub fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (GAUSSIAN_TRUNCATE * sigma).ceil().max(1.0) as i32;
    let denom = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|i| (-((i * i) as f32) / denom).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    for weight in &mut kernel {
        *weight /= sum;
    }
    kernel
}

/// Isotropic Gaussian smoothing; edges replicate the nearest pixel.
pub fn gaussian_smooth(image: &GrayF32, sigma: f32) -> GrayF32 {
    separable_filter_equal(image, &gaussian_kernel(sigma))
}

/// Pixels of `raster` whose smoothed Laplacian energy is at or below the
/// threshold.
pub fn low_energy_indicator(raster: &RgbImage, params: &BlurParams) -> Result<Mask, QcError> {
    params.validate()?;
    if raster.width() == 0 || raster.height() == 0 {
        return Err(QcError::EmptyRaster);
    }

    let energy = laplacian_energy(&luminance(raster));
    let smoothed = gaussian_smooth(&energy, params.radius);

    Ok(Mask::from_fn(smoothed.width(), smoothed.height(), |x, y| {
        smoothed.get_pixel(x, y).0[0] <= params.threshold
    }))
}

/// Bring an indicator onto a `width` x `height` grid by nearest-neighbour
/// resampling.
///
/// The resize runs on a single-channel `Luma` buffer, so the result already
/// has exactly one channel.
pub fn align_indicator(indicator: &Mask, width: u32, height: u32) -> Result<Mask, QcError> {
    let aligned = if indicator.dimensions() == (width, height) {
        indicator.clone()
    } else {
        let resized = imageops::resize(&indicator.to_gray(), width, height, FilterType::Nearest);
        Mask::from_gray(&resized)
    };

    let expected = Mask::new(width, height);
    expected.ensure_same_dimensions(&aligned)?;
    Ok(aligned)
}

/// Compose the blur mask with a tissue mask.
pub fn compose_blur(
    raster: &RgbImage,
    tissue: &Mask,
    params: &BlurParams,
) -> Result<BlurDetection, QcError> {
    let indicator = low_energy_indicator(raster, params)?;
    let low_energy_pixels = indicator.count();
    let aligned = align_indicator(&indicator, tissue.width(), tissue.height())?;

    let blur_mask = tissue.and(&aligned)?;
    let updated_tissue = tissue.and_not(&blur_mask)?;

    Ok(BlurDetection {
        blur_mask,
        updated_tissue,
        low_energy_pixels,
    })
}

/// Run blur detection against the record's tissue mask.
///
/// Replaces the tissue-in-use mask with its blur-free part, stores the blur
/// mask, records `blur_pixels`, `percent_blurry` (the record's configured
/// statistic) and `blurry_fraction` (always relative to the tissue mask), and
/// returns the blurry fraction.
pub fn detect_blur(
    record: &mut SlideRecord,
    raster: &RgbImage,
    params: &BlurParams,
) -> Result<f64, QcError> {
    let before = record.tissue_mask()?.clone();
    let detection = compose_blur(raster, &before, params)?;
    let after = &detection.updated_tissue;

    record
        .metrics
        .insert("blur_pixels", detection.blur_mask.count())?;
    let statistic = record.mask_statistics;
    record.record_metric("percent_blurry", statistic, &before, after)?;
    let blurry_fraction =
        record.record_metric("blurry_fraction", MaskStatistic::RelativeToMask, &before, after)?;

    debug!(
        slide = %record.slide_id,
        low_energy = detection.low_energy_pixels,
        blur = detection.blur_mask.count(),
        tissue_before = before.count(),
        tissue_after = after.count(),
        blurry_fraction,
        "Detected blur"
    );

    record.tissue_mask = Some(detection.updated_tissue);
    record.blur_mask = Some(detection.blur_mask);
    Ok(blurry_fraction)
}
