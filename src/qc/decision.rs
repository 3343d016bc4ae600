//! The blur decision and the advisory it raises.

use serde::Serialize;

/// Default maximum tolerated blurry fraction
pub const DEFAULT_BLUR_MAX: f64 = 0.05;

/// Whether a slide is too blurry: strictly more than `blur_max` of its
/// tissue was removed as blur.
pub fn decide(blurry_fraction: f64, blur_max: f64) -> bool {
    blurry_fraction > blur_max
}

/// A request for human follow-up on a slide. Purely informational.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Advisory {
    pub slide_id: String,
    pub blurry_fraction: f64,
    pub blur_max: f64,
}

impl Advisory {
    pub fn new(slide_id: impl Into<String>, blurry_fraction: f64, blur_max: f64) -> Self {
        Self {
            slide_id: slide_id.into(),
            blurry_fraction,
            blur_max,
        }
    }

    pub fn percent_blurry(&self) -> f64 {
        self.blurry_fraction * 100.0
    }

    /// Human-readable advisory line.
    pub fn message(&self) -> String {
        format!(
            "Need to rescan, too blurry: {:.2}% of tissue ({})",
            self.percent_blurry(),
            self.slide_id
        )
    }
}
