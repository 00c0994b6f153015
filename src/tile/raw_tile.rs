//! `RawTile`: the value type that flows between every core subsystem.
//!
//! The buffer is always a `bytes::Bytes` (cheap, refcounted, immutable once
//! built), which sidesteps needing an explicit owned-vs-borrowed flag: every
//! tile is either freshly allocated or a cheap clone of one already held by
//! the cache. See `DESIGN.md` for the rationale.

use std::sync::Arc;

use bytes::Bytes;

/// Pixel sample representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleType {
    FixedPoint,
    FloatingPoint,
}

/// Colour space of a tile's pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    None,
    Greyscale,
    Srgb,
    CieLab,
    Binary,
}

/// Compression / wire encoding of a tile's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Raw,
    Jpeg,
    Png,
    Webp,
    Avif,
    Tiff,
    Deflate,
}

impl Encoding {
    pub fn mime_type(&self) -> &'static str {
        match self {
            Encoding::Raw => "application/octet-stream",
            Encoding::Jpeg => "image/jpeg",
            Encoding::Png => "image/png",
            Encoding::Webp => "image/webp",
            Encoding::Avif => "image/avif",
            Encoding::Tiff => "image/tiff",
            Encoding::Deflate => "application/octet-stream",
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            Encoding::Raw => "raw",
            Encoding::Jpeg => "jpg",
            Encoding::Png => "png",
            Encoding::Webp => "webp",
            Encoding::Avif => "avif",
            Encoding::Tiff => "tif",
            Encoding::Deflate => "zz",
        }
    }
}

/// Composite key uniquely identifying a tile in the cache:
/// `(source_path, resolution, tile_index, h_angle, v_angle, encoding,
/// quality)`. Kept as a structured tuple rather than a formatted string,
/// since Rust's hash maps don't need a string round-trip to key on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub source_path: Arc<str>,
    pub resolution: u32,
    pub tile_index: u32,
    pub h_angle: i32,
    pub v_angle: i32,
    pub encoding: Encoding,
    pub quality: i32,
}

impl TileKey {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_path: impl Into<Arc<str>>,
        resolution: u32,
        tile_index: u32,
        h_angle: i32,
        v_angle: i32,
        encoding: Encoding,
        quality: i32,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            resolution,
            tile_index,
            h_angle,
            v_angle,
            encoding,
            quality,
        }
    }

    /// Key with `encoding` swapped, used when probing the `Raw` fallback
    /// entry per `TileManager::get_tile` step 1.
    pub fn with_encoding(&self, encoding: Encoding, quality: i32) -> Self {
        Self {
            encoding,
            quality,
            ..self.clone()
        }
    }

    /// Accounted size of this key for cache byte-capacity bookkeeping.
    pub fn size_in_bytes(&self) -> usize {
        self.source_path.len() + 32
    }
}

/// Compute the expected raw pixel buffer length for a given geometry.
///
/// `data_length = width * height * channels * (bits_per_channel / 8)`. 1-bit
/// samples are expected to have already been expanded to 8-bit by the
/// decoder before a `RawTile` is constructed, so `bits_per_channel` here is
/// always a multiple of 8.
pub fn raw_data_len(width: u32, height: u32, channels: u8, bits_per_channel: u8) -> usize {
    width as usize * height as usize * channels as usize * (bits_per_channel as usize / 8)
}

/// A rectangular pixel buffer plus its full geometry and identity.
///
/// Two tiles are `==` iff their identity fields and `(encoding, quality)`
/// match — explicitly not `data` or `timestamp`.
#[derive(Debug, Clone)]
pub struct RawTile {
    pub source_path: Arc<str>,
    pub resolution: u32,
    pub tile_index: u32,
    pub h_angle: i32,
    pub v_angle: i32,

    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub bits_per_channel: u8,
    pub sample_type: SampleType,

    pub encoding: Encoding,
    pub quality: i32,

    pub timestamp: i64,
    pub padded: bool,

    pub data: Bytes,
}

impl RawTile {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_path: impl Into<Arc<str>>,
        resolution: u32,
        tile_index: u32,
        h_angle: i32,
        v_angle: i32,
        width: u32,
        height: u32,
        channels: u8,
        bits_per_channel: u8,
        sample_type: SampleType,
        data: Bytes,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            resolution,
            tile_index,
            h_angle,
            v_angle,
            width,
            height,
            channels,
            bits_per_channel,
            sample_type,
            encoding: Encoding::Raw,
            quality: 0,
            timestamp: 0,
            padded: false,
            data,
        }
    }

    pub fn key(&self) -> TileKey {
        TileKey {
            source_path: self.source_path.clone(),
            resolution: self.resolution,
            tile_index: self.tile_index,
            h_angle: self.h_angle,
            v_angle: self.v_angle,
            encoding: self.encoding,
            quality: self.quality,
        }
    }

    /// Number of bytes the tile's data buffer actually uses.
    pub fn data_length(&self) -> usize {
        self.data.len()
    }

    /// Whether the raw pixel payload matches the geometry-implied length.
    /// Only meaningful for `Encoding::Raw` tiles; encoded tiles carry
    /// compressed bytes of unrelated length.
    pub fn has_expected_raw_length(&self) -> bool {
        self.encoding != Encoding::Raw
            || self.data.len() == raw_data_len(self.width, self.height, self.channels, self.bits_per_channel)
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_angles(mut self, h_angle: i32, v_angle: i32) -> Self {
        self.h_angle = h_angle;
        self.v_angle = v_angle;
        self
    }
}

impl PartialEq for RawTile {
    fn eq(&self, other: &Self) -> bool {
        self.tile_index == other.tile_index
            && self.resolution == other.resolution
            && self.h_angle == other.h_angle
            && self.v_angle == other.v_angle
            && self.encoding == other.encoding
            && self.quality == other.quality
            && self.source_path == other.source_path
    }
}
