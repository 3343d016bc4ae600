//! Mask image artifacts.

use std::path::Path;

use image::ImageFormat;

use crate::error::QcError;

use super::mask::Mask;

/// Suffix of the tissue mask artifact
pub const TISSUE_ARTIFACT: &str = "tissue_seg.png";

/// Suffix of the blur mask artifact
pub const BLUR_ARTIFACT: &str = "blurry.png";

/// Write `mask` as an 8-bit PNG (255 = foreground), creating parent
/// directories as needed.
pub fn write_mask_png(mask: &Mask, path: &Path) -> Result<(), QcError> {
    let artifact_error = |message: String| QcError::Artifact {
        path: path.display().to_string(),
        message,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| artifact_error(e.to_string()))?;
    }
    mask.to_gray()
        .save_with_format(path, ImageFormat::Png)
        .map_err(|e| artifact_error(e.to_string()))
}
