//! Slide file formats.
//!
//! ```text
//! bytes ──► detect ──► tiff (header, IFDs, pyramid) ──► tiled (stitch levels)
//!                 └──► raster (decoded whole by the image crate)
//! ```

pub mod detect;
pub mod jpeg;
pub mod svs;
pub mod tiff;
pub mod tiled;

pub use detect::{classify_tiff, is_tiff, SlideFormat};
pub use svs::SvsMetadata;
pub use tiff::{PyramidLevel, TiffPyramid};
pub use tiled::{read_level, MAX_LEVEL_PIXELS};
