//! TIFF header and IFD parsing.
//!
//! # TIFF Header Structure
//!
//! ## Classic TIFF (8 bytes)
//! ```text
//! Bytes 0-1: Byte order (0x4949 = little-endian "II", 0x4D4D = big-endian "MM")
//! Bytes 2-3: Version (42)
//! Bytes 4-7: Offset to first IFD
//! ```
//!
//! ## BigTIFF (16 bytes)
//! ```text
//! Bytes 0-1: Byte order
//! Bytes 2-3: Version (43)
//! Bytes 4-5: Offset byte size (must be 8)
//! Bytes 6-7: Reserved
//! Bytes 8-15: Offset to first IFD
//! ```
//!
//! ## IFD
//! ```text
//! entry count (u16 | u64), entries (12 | 20 bytes each), next IFD offset (u32 | u64)
//! entry: tag (u16), field type (u16), count (u32 | u64), value or offset (4 | 8 bytes)
//! ```

use crate::error::TiffError;
use crate::io::{read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be, read_u64_le};

use super::tags::{FieldType, TiffTag};

const BYTE_ORDER_LITTLE_ENDIAN: u16 = 0x4949;
const BYTE_ORDER_BIG_ENDIAN: u16 = 0x4D4D;
const VERSION_TIFF: u16 = 42;
const VERSION_BIGTIFF: u16 = 43;

/// Size of classic TIFF header in bytes
pub const TIFF_HEADER_SIZE: usize = 8;

/// Size of BigTIFF header in bytes
pub const BIGTIFF_HEADER_SIZE: usize = 16;

// =============================================================================
// ByteOrder
// =============================================================================

/// Byte order (endianness) declared by a TIFF file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// "II" (Intel)
    LittleEndian,
    /// "MM" (Motorola)
    BigEndian,
}

impl ByteOrder {
    #[inline]
    pub fn read_u16(self, bytes: &[u8]) -> u16 {
        match self {
            ByteOrder::LittleEndian => read_u16_le(bytes),
            ByteOrder::BigEndian => read_u16_be(bytes),
        }
    }

    #[inline]
    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        match self {
            ByteOrder::LittleEndian => read_u32_le(bytes),
            ByteOrder::BigEndian => read_u32_be(bytes),
        }
    }

    #[inline]
    pub fn read_u64(self, bytes: &[u8]) -> u64 {
        match self {
            ByteOrder::LittleEndian => read_u64_le(bytes),
            ByteOrder::BigEndian => read_u64_be(bytes),
        }
    }
}

// =============================================================================
// TiffHeader
// =============================================================================

/// Parsed TIFF file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    /// Byte order for all multi-byte values in the file
    pub byte_order: ByteOrder,

    /// Whether this is a BigTIFF file (64-bit offsets)
    pub is_bigtiff: bool,

    /// Offset to the first IFD in the file
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Parse a TIFF header from the first bytes of a file.
    ///
    /// `bytes` should hold 16 bytes when available so BigTIFF headers can be
    /// read; `file_size` bounds the first IFD offset.
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, TiffError> {
        if bytes.len() < TIFF_HEADER_SIZE {
            return Err(TiffError::FileTooSmall {
                required: TIFF_HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
        let byte_order = match magic {
            BYTE_ORDER_LITTLE_ENDIAN => ByteOrder::LittleEndian,
            BYTE_ORDER_BIG_ENDIAN => ByteOrder::BigEndian,
            _ => return Err(TiffError::InvalidMagic(magic)),
        };

        let (is_bigtiff, first_ifd_offset) = match byte_order.read_u16(&bytes[2..4]) {
            VERSION_TIFF => (false, byte_order.read_u32(&bytes[4..8]) as u64),
            VERSION_BIGTIFF => {
                if bytes.len() < BIGTIFF_HEADER_SIZE {
                    return Err(TiffError::FileTooSmall {
                        required: BIGTIFF_HEADER_SIZE as u64,
                        actual: bytes.len() as u64,
                    });
                }
                let offset_size = byte_order.read_u16(&bytes[4..6]);
                if offset_size != 8 {
                    return Err(TiffError::InvalidBigTiffOffsetSize(offset_size));
                }
                (true, byte_order.read_u64(&bytes[8..16]))
            }
            version => return Err(TiffError::InvalidVersion(version)),
        };

        if first_ifd_offset == 0 || first_ifd_offset >= file_size {
            return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
        }

        Ok(TiffHeader {
            byte_order,
            is_bigtiff,
            first_ifd_offset,
        })
    }

    /// Size of one IFD entry: 12 bytes (classic) or 20 bytes (BigTIFF).
    #[inline]
    pub const fn ifd_entry_size(&self) -> usize {
        if self.is_bigtiff {
            20
        } else {
            12
        }
    }

    /// Size of the entry-count field that opens an IFD.
    #[inline]
    pub const fn ifd_count_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            2
        }
    }

    /// Size of offsets, including the value/offset field of an entry.
    #[inline]
    pub const fn offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }

    /// Decode the entry count from the bytes at the start of an IFD.
    pub fn read_entry_count(&self, bytes: &[u8]) -> u64 {
        if self.is_bigtiff {
            self.byte_order.read_u64(bytes)
        } else {
            self.byte_order.read_u16(bytes) as u64
        }
    }

    fn read_offset(&self, bytes: &[u8]) -> u64 {
        if self.is_bigtiff {
            self.byte_order.read_u64(bytes)
        } else {
            self.byte_order.read_u32(bytes) as u64
        }
    }
}

// =============================================================================
// IfdEntry
// =============================================================================

/// A single tag entry of an IFD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfdEntry {
    /// Raw tag id
    pub tag: u16,

    /// Decoded field type, `None` for types this parser does not know
    pub field_type: Option<FieldType>,

    /// Raw field type id
    pub field_type_raw: u16,

    /// Number of values
    pub count: u64,

    /// The raw value/offset field (4 or 8 significant bytes)
    value_field: [u8; 8],

    /// Whether the value is stored in `value_field` rather than at an offset
    pub is_inline: bool,
}

impl IfdEntry {
    fn parse(bytes: &[u8], header: &TiffHeader) -> Self {
        let order = header.byte_order;
        let tag = order.read_u16(&bytes[0..2]);
        let field_type_raw = order.read_u16(&bytes[2..4]);
        let field_type = FieldType::from_u16(field_type_raw);

        let (count, value_start) = if header.is_bigtiff {
            (order.read_u64(&bytes[4..12]), 12)
        } else {
            (order.read_u32(&bytes[4..8]) as u64, 8)
        };

        let value_len = header.offset_size();
        let mut value_field = [0u8; 8];
        value_field[..value_len].copy_from_slice(&bytes[value_start..value_start + value_len]);

        let is_inline = field_type
            .map(|ft| ft.fits_inline(count, header.is_bigtiff))
            .unwrap_or(false);

        IfdEntry {
            tag,
            field_type,
            field_type_raw,
            count,
            value_field,
            is_inline,
        }
    }

    /// Total size of the value in bytes, `None` for unknown field types.
    pub fn value_byte_size(&self) -> Option<u64> {
        self.field_type
            .map(|ft| ft.size_in_bytes() as u64 * self.count)
    }

    /// Bytes of an inline value.
    pub fn inline_bytes(&self) -> Option<&[u8]> {
        if !self.is_inline {
            return None;
        }
        let size = self.value_byte_size()? as usize;
        Some(&self.value_field[..size])
    }

    /// Offset of an out-of-line value.
    pub fn value_offset(&self, header: &TiffHeader) -> u64 {
        header.read_offset(&self.value_field)
    }

    /// A single integer stored inline (Short, Long or Long8 with count 1).
    pub fn inline_scalar(&self, byte_order: ByteOrder) -> Option<u64> {
        if self.count != 1 || !self.is_inline {
            return None;
        }
        match self.field_type? {
            FieldType::Byte => Some(self.value_field[0] as u64),
            FieldType::Short => Some(byte_order.read_u16(&self.value_field) as u64),
            FieldType::Long => Some(byte_order.read_u32(&self.value_field) as u64),
            FieldType::Long8 => Some(byte_order.read_u64(&self.value_field)),
            _ => None,
        }
    }
}

// =============================================================================
// Ifd
// =============================================================================

/// A parsed Image File Directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ifd {
    /// Entries in file order
    pub entries: Vec<IfdEntry>,

    /// Offset of the next IFD, 0 for the last one
    pub next_ifd_offset: u64,
}

impl Ifd {
    /// Number of bytes occupied by an IFD with `entry_count` entries.
    pub fn byte_size(entry_count: u64, header: &TiffHeader) -> usize {
        header.ifd_count_size()
            + entry_count as usize * header.ifd_entry_size()
            + header.offset_size()
    }

    /// Parse an IFD from bytes starting at its entry count.
    pub fn parse(bytes: &[u8], header: &TiffHeader) -> Result<Self, TiffError> {
        let count_size = header.ifd_count_size();
        if bytes.len() < count_size {
            return Err(TiffError::FileTooSmall {
                required: count_size as u64,
                actual: bytes.len() as u64,
            });
        }

        let entry_count = header.read_entry_count(bytes);
        let required = Self::byte_size(entry_count, header);
        if bytes.len() < required {
            return Err(TiffError::FileTooSmall {
                required: required as u64,
                actual: bytes.len() as u64,
            });
        }

        let entry_size = header.ifd_entry_size();
        let entries = (0..entry_count as usize)
            .map(|i| {
                let start = count_size + i * entry_size;
                IfdEntry::parse(&bytes[start..start + entry_size], header)
            })
            .collect();

        let next_start = count_size + entry_count as usize * entry_size;
        let next_ifd_offset = header.read_offset(&bytes[next_start..]);

        Ok(Ifd {
            entries,
            next_ifd_offset,
        })
    }

    /// Look up an entry by tag.
    pub fn entry(&self, tag: TiffTag) -> Option<&IfdEntry> {
        let id = tag as u16;
        self.entries.iter().find(|e| e.tag == id)
    }

    /// Read a scalar tag stored inline.
    pub fn scalar(&self, tag: TiffTag, byte_order: ByteOrder) -> Option<u64> {
        self.entry(tag)?.inline_scalar(byte_order)
    }

    /// Whether this IFD describes a tiled image.
    pub fn is_tiled(&self) -> bool {
        self.entry(TiffTag::TileWidth).is_some()
            && self.entry(TiffTag::TileLength).is_some()
            && self.entry(TiffTag::TileOffsets).is_some()
            && self.entry(TiffTag::TileByteCounts).is_some()
    }
}

// =============================================================================
// Tests
// =============================================================================
