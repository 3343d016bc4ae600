//! Working-resolution specifiers.
//!
//! A work size names the reduced raster the QC stages run on:
//!
//! | Text      | Meaning                                               |
//! |-----------|-------------------------------------------------------|
//! | `1.25x`   | magnification; downsample = base magnification / 1.25 |
//! | `0.1`     | scale factor below 1 applied to level 0               |
//! | `2`       | pyramid level, read as stored                         |
//! | `1000`    | thumbnail whose longer side is 1000 pixels            |

use std::fmt;
use std::str::FromStr;

use crate::error::SlideError;

/// Numbers at or above this are thumbnail sizes, below it level indices.
const MAX_LEVEL_SPEC: f64 = 100.0;

/// A parsed working-resolution specifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WorkSize {
    Magnification(f64),
    Downscale(f64),
    Level(usize),
    MaxDimension(u32),
}

/// How a work size maps onto a concrete slide.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution {
    /// Read this level as stored
    Level(usize),
    /// Shrink level 0 by `downsample` to exactly `width` x `height`
    Scaled {
        downsample: f64,
        width: u32,
        height: u32,
    },
}

impl WorkSize {
    pub fn parse(spec: &str) -> Result<Self, SlideError> {
        let text = spec.trim();
        let invalid = |reason: &str| SlideError::InvalidWorkSize {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        if let Some(mag) = text.strip_suffix(['x', 'X']) {
            let mag: f64 = mag
                .trim()
                .parse()
                .map_err(|_| invalid("magnification must be a number followed by 'x'"))?;
            if !mag.is_finite() || mag <= 0.0 {
                return Err(invalid("magnification must be positive"));
            }
            return Ok(WorkSize::Magnification(mag));
        }

        let value: f64 = text
            .parse()
            .map_err(|_| invalid("expected '<mag>x', a scale factor, a level or a size"))?;
        if !value.is_finite() || value <= 0.0 {
            return Err(invalid("value must be positive"));
        }

        Ok(if value < 1.0 {
            WorkSize::Downscale(value)
        } else if value < MAX_LEVEL_SPEC {
            WorkSize::Level(value.trunc() as usize)
        } else {
            WorkSize::MaxDimension(value.trunc().min(u32::MAX as f64) as u32)
        })
    }

    /// Map onto a slide with level-0 dimensions `base` and `level_count` levels.
    ///
    /// `base_magnification` is only consulted for magnification specifiers.
    pub fn resolve(
        &self,
        base: (u32, u32),
        level_count: usize,
        base_magnification: Option<f64>,
    ) -> Result<Resolution, SlideError> {
        let (w0, h0) = (base.0 as f64, base.1 as f64);
        let scaled = |downsample: f64| Resolution::Scaled {
            downsample,
            width: ((w0 / downsample).round() as u32).max(1),
            height: ((h0 / downsample).round() as u32).max(1),
        };

        match *self {
            WorkSize::Magnification(mag) => {
                let base_mag =
                    base_magnification.ok_or_else(|| SlideError::UnknownMagnification {
                        slide: String::new(),
                        spec: self.to_string(),
                    })?;
                Ok(scaled((base_mag / mag).max(1.0)))
            }
            WorkSize::Downscale(factor) => Ok(scaled(1.0 / factor)),
            WorkSize::Level(level) => {
                if level_count == 0 {
                    return Err(SlideError::NoLevels);
                }
                Ok(Resolution::Level(level.min(level_count - 1)))
            }
            WorkSize::MaxDimension(dim) => {
                let longest = w0.max(h0);
                Ok(scaled((longest / dim as f64).max(1.0)))
            }
        }
    }
}

impl fmt::Display for WorkSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkSize::Magnification(mag) => write!(f, "{}x", mag),
            WorkSize::Downscale(factor) => write!(f, "{}", factor),
            WorkSize::Level(level) => write!(f, "{}", level),
            WorkSize::MaxDimension(dim) => write!(f, "{}", dim),
        }
    }
}

impl FromStr for WorkSize {
    type Err = SlideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkSize::parse(s)
    }
}
