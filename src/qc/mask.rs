//! Binary masks over the working-resolution pixel grid.

use image::{GrayImage, Luma};
use sha2::{Digest, Sha256};

use crate::error::QcError;

/// A 2-D boolean array, row-major.
#[derive(Clone, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    data: Vec<bool>,
}

impl std::fmt::Debug for Mask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mask")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("foreground", &self.count())
            .finish()
    }
}

impl Mask {
    /// An all-background mask.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![false; width as usize * height as usize],
        }
    }

    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> bool) -> Self {
        let data = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| f(x, y))
            .collect();
        Self {
            width,
            height,
            data,
        }
    }

    /// Foreground wherever the gray value is non-zero.
    pub fn from_gray(image: &GrayImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            data: image.pixels().map(|p| p.0[0] > 0).collect(),
        }
    }

    /// Foreground wherever the gray value is strictly above `threshold`.
    pub fn threshold_above(image: &GrayImage, threshold: u8) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            data: image.pixels().map(|p| p.0[0] > threshold).collect(),
        }
    }

    /// 255 for foreground, 0 for background.
    pub fn to_gray(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            Luma([if self.get(x, y) { 255 } else { 0 }])
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Total number of pixels.
    pub fn area(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        self.data[y as usize * self.width as usize + x as usize]
    }

    /// Number of foreground pixels.
    pub fn count(&self) -> u64 {
        self.data.iter().filter(|v| **v).count() as u64
    }

    pub fn ensure_same_dimensions(&self, other: &Mask) -> Result<(), QcError> {
        if self.dimensions() != other.dimensions() {
            return Err(QcError::MaskDimensionMismatch {
                expected_width: self.width,
                expected_height: self.height,
                actual_width: other.width,
                actual_height: other.height,
            });
        }
        Ok(())
    }

    /// Pixel-wise `self AND other`.
    pub fn and(&self, other: &Mask) -> Result<Mask, QcError> {
        self.zip_with(other, |a, b| a && b)
    }

    /// Pixel-wise `self AND NOT other`.
    pub fn and_not(&self, other: &Mask) -> Result<Mask, QcError> {
        self.zip_with(other, |a, b| a && !b)
    }

    fn zip_with(&self, other: &Mask, op: impl Fn(bool, bool) -> bool) -> Result<Mask, QcError> {
        self.ensure_same_dimensions(other)?;
        Ok(Mask {
            width: self.width,
            height: self.height,
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(a, b)| op(*a, *b))
                .collect(),
        })
    }

    /// Whether every foreground pixel of `other` is foreground here too.
    /// Masks of different sizes are never supersets of each other.
    pub fn is_superset_of(&self, other: &Mask) -> bool {
        self.dimensions() == other.dimensions()
            && self.data.iter().zip(&other.data).all(|(a, b)| *a || !*b)
    }

    /// SHA-256 of the dimensions and packed pixels, hex encoded.
    pub fn sha256_hex(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.width.to_le_bytes());
        hasher.update(self.height.to_le_bytes());
        for chunk in self.data.chunks(8) {
            let byte = chunk
                .iter()
                .enumerate()
                .fold(0u8, |acc, (i, bit)| acc | ((*bit as u8) << i));
            hasher.update([byte]);
        }
        hex::encode(hasher.finalize())
    }
}
