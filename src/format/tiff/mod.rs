//! TIFF and BigTIFF parsing for tiled slide files.
//!
//! - **Byte order**: declared in the header (II or MM); every multi-byte value
//!   is read through [`ByteOrder`].
//! - **Classic vs BigTIFF**: 32-bit vs 64-bit offsets, handled transparently.
//! - **IFDs**: a slide file holds one per pyramid level plus label and macro
//!   images; [`TiffPyramid`] keeps only the resolution levels.

mod parser;
mod pyramid;
mod tags;
mod values;

pub use parser::{ByteOrder, Ifd, IfdEntry, TiffHeader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE};
pub use pyramid::{PyramidLevel, TiffPyramid, TileData};
pub use tags::{Compression, FieldType, TiffTag};
pub use values::{parse_u64_array, ValueReader};
