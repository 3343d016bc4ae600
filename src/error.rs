use thiserror::Error;

/// I/O errors that can occur when reading slide bytes
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error reported by the filesystem
    #[error("File error: {0}")]
    File(String),

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// File not found
    #[error("File not found: {0}")]
    NotFound(String),
}

impl From<std::io::Error> for IoError {
    fn from(err: std::io::Error) -> Self {
        IoError::File(err.to_string())
    }
}

/// Errors that can occur when parsing TIFF files
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// Invalid BigTIFF offset byte size (must be 8)
    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// File is too small to contain a valid TIFF header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// IFD offset points outside the file
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Tile compression we cannot decode
    #[error("Unsupported compression: {0} (only JPEG and uncompressed tiles are supported)")]
    UnsupportedCompression(String),

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),
}

/// Errors raised by the slide accessor (opening slides and building thumbnails)
#[derive(Debug, Clone, Error)]
pub enum SlideError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// TIFF structure error
    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    /// File is neither a tiled TIFF nor a raster the image decoder understands
    #[error("Unsupported format: {reason}")]
    UnsupportedFormat { reason: String },

    /// Tile or raster pixel data could not be decoded
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// Working-resolution specifier could not be parsed
    #[error("Invalid work size '{spec}': {reason}")]
    InvalidWorkSize { spec: String, reason: String },

    /// A magnification work size was requested but the base magnification is unknown
    #[error("Slide {slide} has no base magnification; cannot resolve work size {spec}")]
    UnknownMagnification { slide: String, spec: String },

    /// The selected pyramid level is too large to materialize
    #[error("Level {level} is too large to load ({width}x{height} pixels)")]
    LevelTooLarge { level: usize, width: u32, height: u32 },

    /// The file contains no readable image levels
    #[error("Slide has no pyramid levels")]
    NoLevels,
}

/// Errors raised by the quality-control stages
#[derive(Debug, Clone, Error)]
pub enum QcError {
    /// The slide could not be loaded or sampled
    #[error("Slide error: {0}")]
    Slide(#[from] SlideError),

    /// Two masks that must share a pixel grid do not
    #[error(
        "Mask dimension mismatch: expected {expected_width}x{expected_height}, got {actual_width}x{actual_height}"
    )]
    MaskDimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    /// A stage ran before the stage producing its input
    #[error("Missing {0} mask; the producing stage has not run")]
    MissingMask(&'static str),

    /// Metrics are append-only
    #[error("Metric '{0}' is already recorded")]
    MetricExists(String),

    /// The working raster has no pixels
    #[error("Raster is empty")]
    EmptyRaster,

    /// A mask image could not be written
    #[error("Failed to write artifact {path}: {message}")]
    Artifact { path: String, message: String },

    /// A stage parameter is outside its valid range
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A stage task panicked or was cancelled
    #[error("Stage task failed: {0}")]
    Task(String),
}

/// Errors in the shape of a stage dependency graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// An edge refers to a node that is not part of the graph
    #[error("Edge {from} -> {to} refers to a node outside the graph")]
    DanglingEdge { from: &'static str, to: &'static str },

    /// The graph has a dependency cycle
    #[error("Dependency cycle through {0}")]
    Cycle(&'static str),

    /// A conditional edge leaves a node that does not produce a boolean
    #[error("Conditional edge from {0}, which does not produce a decision")]
    InvalidGate(&'static str),

    /// A node is missing the edge from the stage that produces its input
    #[error("Node {node} needs an edge from {requires}")]
    MissingInput { node: &'static str, requires: &'static str },

    /// The same node was added twice
    #[error("Node {0} appears more than once")]
    DuplicateNode(&'static str),
}
