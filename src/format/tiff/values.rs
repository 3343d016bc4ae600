//! TIFF tag value reading.
//!
//! Values are either inline in the IFD entry or stored at an offset. Arrays
//! such as TileOffsets are fetched with a single range read.

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{IfdEntry, TiffHeader};
use super::tags::FieldType;

/// Reads tag values respecting the file's byte order and offset width.
pub struct ValueReader<'a, R: RangeReader + ?Sized> {
    reader: &'a R,
    header: &'a TiffHeader,
}

impl<'a, R: RangeReader + ?Sized> ValueReader<'a, R> {
    pub fn new(reader: &'a R, header: &'a TiffHeader) -> Self {
        Self { reader, header }
    }

    /// Raw bytes of an entry's value, inline or fetched.
    pub async fn read_bytes(&self, entry: &IfdEntry) -> Result<Bytes, TiffError> {
        if let Some(inline) = entry.inline_bytes() {
            return Ok(Bytes::copy_from_slice(inline));
        }

        let size = entry
            .value_byte_size()
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;
        let offset = entry.value_offset(self.header);
        Ok(self.reader.read_exact_at(offset, size as usize).await?)
    }

    /// Read an integer array (Short, Long or Long8), widening to u64.
    pub async fn read_u64_array(&self, entry: &IfdEntry) -> Result<Vec<u64>, TiffError> {
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;
        if entry.count == 0 {
            return Ok(Vec::new());
        }

        let bytes = self.read_bytes(entry).await?;
        parse_u64_array(&bytes, field_type, entry.count as usize, self.header)
    }

    /// Read an ASCII value, trimming the trailing NUL.
    pub async fn read_string(&self, entry: &IfdEntry) -> Result<String, TiffError> {
        let bytes = self.read_bytes(entry).await?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(text.trim_end_matches('\0').to_string())
    }
}

/// Decode `count` integers of `field_type` from `bytes`.
pub fn parse_u64_array(
    bytes: &[u8],
    field_type: FieldType,
    count: usize,
    header: &TiffHeader,
) -> Result<Vec<u64>, TiffError> {
    let width = field_type.size_in_bytes();
    if bytes.len() < width * count {
        return Err(TiffError::InvalidTagValue {
            tag: "array",
            message: format!("expected {} bytes, got {}", width * count, bytes.len()),
        });
    }

    let order = header.byte_order;
    let read: fn(crate::format::tiff::ByteOrder, &[u8]) -> u64 = match field_type {
        FieldType::Short => |o, b| o.read_u16(b) as u64,
        FieldType::Long => |o, b| o.read_u32(b) as u64,
        FieldType::Long8 => |o, b| o.read_u64(b),
        other => {
            return Err(TiffError::InvalidTagValue {
                tag: "array",
                message: format!("expected Short, Long or Long8, got {:?}", other),
            })
        }
    };

    Ok(bytes
        .chunks_exact(width)
        .take(count)
        .map(|chunk| read(order, chunk))
        .collect())
}
