//! JPEG tile stream preparation.
//!
//! Aperio SVS tiles are "abbreviated" JPEG streams: the quantization (DQT)
//! and Huffman (DHT) tables live once in the level's `JPEGTables` tag rather
//! than in every tile. Before decoding, the two are spliced together:
//!
//! ```text
//! tables: SOI DQT DHT ... EOI
//! tile:   SOI SOF SOS <scan> EOI
//! merged: SOI DQT DHT ... SOF SOS <scan> EOI
//! ```

use bytes::{Bytes, BytesMut};

/// Start Of Image
pub const SOI: [u8; 2] = [0xFF, 0xD8];

/// End Of Image
pub const EOI: [u8; 2] = [0xFF, 0xD9];

const DHT: u8 = 0xC4;
const DQT: u8 = 0xDB;
const SOS: u8 = 0xDA;

/// Marker codes in the header of a stream, up to and including SOS.
///
/// Stops early on truncated or malformed segment lengths.
fn header_markers(data: &[u8]) -> Vec<u8> {
    let mut markers = Vec::new();
    if data.len() < 4 || data[0..2] != SOI {
        return markers;
    }

    let mut pos = 2;
    while pos + 3 < data.len() {
        if data[pos] != 0xFF {
            break;
        }
        let marker = data[pos + 1];
        if marker == 0xFF {
            // fill byte
            pos += 1;
            continue;
        }
        markers.push(marker);
        if marker == SOS {
            break;
        }
        let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        if length < 2 {
            break;
        }
        pos += 2 + length;
    }
    markers
}

/// Whether a stream carries its own quantization tables.
pub fn has_tables(data: &[u8]) -> bool {
    header_markers(data).contains(&DQT)
}

/// Whether a stream reaches its scan without any DQT or DHT segment.
pub fn is_abbreviated_stream(data: &[u8]) -> bool {
    let markers = header_markers(data);
    markers.last() == Some(&SOS) && !markers.iter().any(|m| *m == DQT || *m == DHT)
}

/// Splice shared tables into an abbreviated tile stream.
///
/// Drops the trailing EOI of `tables` and the leading SOI of `tile`.
pub fn merge_jpeg_tables(tables: &[u8], tile: &[u8]) -> Bytes {
    if tables.is_empty() {
        return Bytes::copy_from_slice(tile);
    }
    if tile.is_empty() {
        return Bytes::new();
    }

    let tables = tables.strip_suffix(&EOI).unwrap_or(tables);
    let tile = tile.strip_prefix(&SOI).unwrap_or(tile);

    let mut merged = BytesMut::with_capacity(tables.len() + tile.len());
    merged.extend_from_slice(tables);
    merged.extend_from_slice(tile);
    merged.freeze()
}

/// Produce a self-contained JPEG stream for a tile.
///
/// Complete tiles pass through; abbreviated tiles are merged with `tables`
/// when the level has them.
pub fn prepare_tile_jpeg(tables: Option<&[u8]>, tile: Bytes) -> Bytes {
    match tables {
        Some(tables) if !has_tables(&tile) && is_abbreviated_stream(&tile) => {
            merge_jpeg_tables(tables, &tile)
        }
        _ => tile,
    }
}
