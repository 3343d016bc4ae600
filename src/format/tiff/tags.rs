//! TIFF tag, field type and compression definitions.
//!
//! Only the vocabulary needed to locate and decode pyramid tiles is defined;
//! tags not listed here are carried as raw entries and otherwise ignored.

// =============================================================================
// Field Types
// =============================================================================

/// TIFF field types that determine how values are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FieldType {
    Byte = 1,
    Ascii = 2,
    Short = 3,
    Long = 4,
    Rational = 5,
    Undefined = 7,
    /// BigTIFF only
    Long8 = 16,
}

impl FieldType {
    /// Size of a single value of this type in bytes.
    #[inline]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            FieldType::Byte | FieldType::Ascii | FieldType::Undefined => 1,
            FieldType::Short => 2,
            FieldType::Long => 4,
            FieldType::Rational | FieldType::Long8 => 8,
        }
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(FieldType::Byte),
            2 => Some(FieldType::Ascii),
            3 => Some(FieldType::Short),
            4 => Some(FieldType::Long),
            5 => Some(FieldType::Rational),
            7 => Some(FieldType::Undefined),
            16 => Some(FieldType::Long8),
            _ => None,
        }
    }

    /// Whether `count` values of this type fit in the entry's value field
    /// (4 bytes for classic TIFF, 8 for BigTIFF).
    #[inline]
    pub fn fits_inline(self, count: u64, is_bigtiff: bool) -> bool {
        let threshold = if is_bigtiff { 8 } else { 4 };
        (self.size_in_bytes() as u64).saturating_mul(count) <= threshold
    }
}

// =============================================================================
// Tags
// =============================================================================

/// TIFF tag ids used when reading slide pyramids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TiffTag {
    ImageWidth = 256,
    ImageLength = 257,
    BitsPerSample = 258,
    Compression = 259,
    PhotometricInterpretation = 262,
    /// Holds the vendor metadata string in SVS files
    ImageDescription = 270,
    SamplesPerPixel = 277,
    PlanarConfiguration = 284,
    TileWidth = 322,
    TileLength = 323,
    TileOffsets = 324,
    TileByteCounts = 325,
    /// Shared quantization/Huffman tables for abbreviated JPEG tiles
    JpegTables = 347,
}

impl TiffTag {
    /// Human-readable tag name for error messages.
    pub const fn name(self) -> &'static str {
        match self {
            TiffTag::ImageWidth => "ImageWidth",
            TiffTag::ImageLength => "ImageLength",
            TiffTag::BitsPerSample => "BitsPerSample",
            TiffTag::Compression => "Compression",
            TiffTag::PhotometricInterpretation => "PhotometricInterpretation",
            TiffTag::ImageDescription => "ImageDescription",
            TiffTag::SamplesPerPixel => "SamplesPerPixel",
            TiffTag::PlanarConfiguration => "PlanarConfiguration",
            TiffTag::TileWidth => "TileWidth",
            TiffTag::TileLength => "TileLength",
            TiffTag::TileOffsets => "TileOffsets",
            TiffTag::TileByteCounts => "TileByteCounts",
            TiffTag::JpegTables => "JPEGTables",
        }
    }
}

// =============================================================================
// Compression
// =============================================================================

/// Tile compression schemes seen in slide files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Lzw,
    Jpeg,
    Deflate,
    /// Aperio JPEG 2000 (YCbCr or RGB)
    Jpeg2000,
    Other(u16),
}

impl Compression {
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => Compression::None,
            5 => Compression::Lzw,
            7 => Compression::Jpeg,
            8 | 32946 => Compression::Deflate,
            33003 | 33005 => Compression::Jpeg2000,
            other => Compression::Other(other),
        }
    }

    /// Whether tiles with this compression can be decoded.
    pub const fn is_decodable(self) -> bool {
        matches!(self, Compression::None | Compression::Jpeg)
    }

    pub fn name(self) -> String {
        match self {
            Compression::None => "none".to_string(),
            Compression::Lzw => "LZW".to_string(),
            Compression::Jpeg => "JPEG".to_string(),
            Compression::Deflate => "Deflate".to_string(),
            Compression::Jpeg2000 => "JPEG 2000".to_string(),
            Compression::Other(code) => format!("code {}", code),
        }
    }
}
