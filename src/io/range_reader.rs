use async_trait::async_trait;
use bytes::Bytes;

use crate::error::IoError;

/// Trait for reading byte ranges from a slide file.
///
/// The TIFF parser only ever needs a handful of small metadata reads plus one
/// read per tile, so slide files are accessed by range rather than loaded whole.
/// Implementations must be thread-safe.
#[async_trait]
pub trait RangeReader: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Returns an error if the range is out of bounds or if the read fails.
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError>;

    /// Get the total size of the resource in bytes.
    fn size(&self) -> u64;

    /// Get a unique identifier for this resource (for logging).
    fn identifier(&self) -> &str;

    /// Read the whole resource.
    ///
    /// Used for plain raster files, which are decoded in one piece.
    async fn read_all(&self) -> Result<Bytes, IoError> {
        self.read_exact_at(0, self.size() as usize).await
    }
}

/// Check that `[offset, offset + len)` lies inside a resource of `size` bytes.
pub(crate) fn check_range(offset: u64, len: usize, size: u64) -> Result<(), IoError> {
    let end = offset.checked_add(len as u64);
    match end {
        Some(end) if end <= size => Ok(()),
        _ => Err(IoError::RangeOutOfBounds {
            offset,
            requested: len as u64,
            size,
        }),
    }
}

// =============================================================================
// Endian Helper Functions
// =============================================================================
//
// TIFF files can be either little-endian or big-endian, determined by the
// magic bytes at the start of the file.

/// Read a little-endian u16 from the first two bytes of a slice.
#[inline]
pub fn read_u16_le(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

/// Read a big-endian u16 from the first two bytes of a slice.
#[inline]
pub fn read_u16_be(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

/// Read a little-endian u32 from the first four bytes of a slice.
#[inline]
pub fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Read a big-endian u32 from the first four bytes of a slice.
#[inline]
pub fn read_u32_be(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Read a little-endian u64 from the first eight bytes of a slice.
#[inline]
pub fn read_u64_le(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

/// Read a big-endian u64 from the first eight bytes of a slice.
#[inline]
pub fn read_u64_be(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(buf)
}
