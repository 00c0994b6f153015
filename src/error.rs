use thiserror::Error;

/// I/O errors that can occur when reading from remote storage
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error from S3 or S3-compatible storage
    #[error("S3 error: {0}")]
    S3(String),

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Local filesystem I/O failure
    #[error("filesystem error reading {path}: {message}")]
    Filesystem { path: String, message: String },
}

/// Errors related to format detection and validation
#[derive(Debug, Clone, Error)]
pub enum FormatError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// TIFF parsing error
    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    /// JPEG2000 decode error
    #[error("JPEG2000 error: {0}")]
    Jp2k(String),

    /// File format is not supported (should map to HTTP 415)
    #[error("Unsupported format: {reason}")]
    UnsupportedFormat { reason: String },
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

    /// Invalid IFD offset (points outside file or to invalid location)
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Unsupported compression scheme
    #[error("Unsupported compression: {0} (only JPEG is supported)")]
    UnsupportedCompression(String),

    /// File uses strips instead of tiles
    #[error("Unsupported organization: file uses strips instead of tiles")]
    StripOrganization,

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),
}

/// Errors surfaced by the tile pipeline (`tile::manager`, `tile::encoder`).
#[derive(Debug, Clone, Error)]
pub enum TileError {
    #[error("slide not found: {slide_id}")]
    SlideNotFound { slide_id: String },

    #[error("invalid level {level} (slide has {max_levels} levels)")]
    InvalidLevel { level: usize, max_levels: usize },

    #[error("tile ({x}, {y}) out of bounds at level {level} (max is ({max_x}, {max_y}))")]
    TileOutOfBounds {
        level: usize,
        x: u32,
        y: u32,
        max_x: u32,
        max_y: u32,
    },

    #[error("invalid quality: {quality} (must be 1-100)")]
    InvalidQuality { quality: u8 },

    #[error("decode error: {message}")]
    DecodeError { message: String },

    #[error("encode error: {message}")]
    EncodeError { message: String },

    #[error(transparent)]
    Io(#[from] IoError),

    #[error(transparent)]
    Slide(#[from] TiffError),
}

/// Cache-layer errors. Per the design, a timestamp mismatch is never an error
/// (it triggers silent eviction and refetch) so this enum only covers genuine
/// failures: an oversized single insert into an otherwise-empty cache.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("entry of {size} bytes exceeds cache capacity of {capacity} bytes and cannot be inserted alone")]
    EntryTooLarge { size: usize, capacity: usize },
}

/// Errors raised while running the image-processing pipeline.
#[derive(Debug, Clone, Error)]
pub enum TransformError {
    #[error("unsupported channel count {channels} for operation {operation}")]
    UnsupportedChannels {
        channels: usize,
        operation: &'static str,
    },

    #[error("color twist matrix row length {row_len} exceeds input channel count {channels}")]
    CtwDimensionMismatch { row_len: usize, channels: usize },

    #[error("convolution kernel must be square and odd-sized (<=5), got {size}")]
    InvalidKernel { size: usize },

    #[error("buffer of {actual} bytes does not match expected {expected} bytes for {width}x{height}x{channels}@{bpc}bpc")]
    BufferSizeMismatch {
        actual: usize,
        expected: usize,
        width: u32,
        height: u32,
        channels: usize,
        bpc: u32,
    },

    #[error("failed to load watermark image: {0}")]
    WatermarkLoad(String),
}

/// Errors raised by an `Encoder` implementation.
#[derive(Debug, Clone, Error)]
pub enum EncodeError {
    #[error("{encoding} does not support {bpc}-bit, {channels}-channel pixel data")]
    UnsupportedLayout {
        encoding: &'static str,
        bpc: u32,
        channels: usize,
    },

    #[error("underlying codec failure: {0}")]
    CodecFailure(String),

    #[error("metadata injection failed: {0}")]
    MetadataInjection(String),
}

/// Errors raised while planning a view (resolution/viewport selection).
#[derive(Debug, Clone, Error)]
pub enum ViewError {
    #[error("viewport out of range: {field} = {value} must be within [0, 1]")]
    ViewportOutOfRange { field: &'static str, value: f64 },

    #[error("requested resolution {requested} exceeds available levels (0..{num_levels})")]
    ResolutionOutOfRange { requested: i64, num_levels: usize },

    #[error("requested output {width}x{height} exceeds max_output_dimension {max}")]
    OutputTooLarge { width: u32, height: u32, max: i64 },
}

/// Top-level error taxonomy surfaced at the request boundary (maps to HTTP
/// status codes in `server::handlers`). The core itself never formats HTTP;
/// it only produces one of these semantic kinds.
#[derive(Debug, Clone, Error)]
pub enum WsiError {
    #[error("not found: {0}")]
    SourceNotFound(String),

    #[error("unsupported source: {0}")]
    SourceUnsupported(String),

    #[error("corrupt source: {0}")]
    SourceCorrupt(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<IoError> for WsiError {
    fn from(e: IoError) -> Self {
        match e {
            IoError::NotFound(id) => WsiError::SourceNotFound(id),
            other => WsiError::SourceCorrupt(other.to_string()),
        }
    }
}

impl From<TiffError> for WsiError {
    fn from(e: TiffError) -> Self {
        WsiError::SourceCorrupt(e.to_string())
    }
}

impl From<FormatError> for WsiError {
    fn from(e: FormatError) -> Self {
        match e {
            FormatError::Io(io) => io.into(),
            FormatError::Tiff(t) => t.into(),
            FormatError::Jp2k(msg) => WsiError::SourceCorrupt(msg),
            FormatError::UnsupportedFormat { reason } => WsiError::SourceUnsupported(reason),
        }
    }
}

impl From<CacheError> for WsiError {
    fn from(e: CacheError) -> Self {
        WsiError::ResourceExhausted(e.to_string())
    }
}

impl From<TransformError> for WsiError {
    fn from(e: TransformError) -> Self {
        WsiError::Internal(e.to_string())
    }
}

impl From<EncodeError> for WsiError {
    fn from(e: EncodeError) -> Self {
        WsiError::BadRequest(e.to_string())
    }
}

impl From<ViewError> for WsiError {
    fn from(e: ViewError) -> Self {
        match e {
            ViewError::OutputTooLarge { .. } => WsiError::ResourceExhausted(e.to_string()),
            other => WsiError::BadRequest(other.to_string()),
        }
    }
}

impl From<TileError> for WsiError {
    fn from(e: TileError) -> Self {
        match e {
            TileError::SlideNotFound { slide_id } => WsiError::SourceNotFound(slide_id),
            TileError::InvalidLevel { .. }
            | TileError::TileOutOfBounds { .. }
            | TileError::InvalidQuality { .. } => WsiError::BadRequest(e.to_string()),
            TileError::DecodeError { .. } => WsiError::SourceCorrupt(e.to_string()),
            TileError::EncodeError { .. } => WsiError::Internal(e.to_string()),
            TileError::Io(io) => io.into(),
            TileError::Slide(tiff) => tiff.into(),
        }
    }
}
