//! # pyrastream
//!
//! A tile and region server for gigapixel pyramidal images stored on the
//! local filesystem or in S3-compatible object storage.
//!
//! Large pyramidal images (whole-slide microscopy, aerial/satellite
//! mosaics, multi-gigapixel scans) are too large to decode in full for every
//! request. This library streams only the bytes a request needs via HTTP
//! range reads, decodes a single tile or an arbitrary-viewport region, runs
//! it through a fixed image-processing pipeline, and re-encodes it in the
//! requested codec.
//!
//! ## Features
//!
//! - **Range-based streaming**: fetches only the bytes needed for each tile
//!   or region, never the whole source file
//! - **Format support**: native parsers for pyramidal TIFF/Aperio SVS and
//!   JPEG2000 sources
//! - **Multi-level caching**: slide, block, and encoded-tile caches
//! - **Per-request processing**: resolution planning, color transforms, and
//!   watermarking ahead of encoding to JPEG/PNG/WebP/AVIF/TIFF
//! - **Minimal demo viewer**: a static page for exercising the API by hand
//!
//! ## Architecture
//!
//! - [`io`] - range-read abstraction, S3 client, block caching
//! - [`mod@format`] - TIFF/SVS parsers and JPEG stream utilities
//! - [`slide`] - slide abstraction and registry
//! - [`tile`] - tile/region orchestration, processing pipeline, encoding
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use pyrastream::Cli;
//! use clap::Parser;
//!
//! #[tokio::main]
//! async fn main() {
//!     let cli = Cli::parse();
//!
//!     match cli.into_command() {
//!         pyrastream::Command::Serve(config) => {
//!             config.validate().expect("invalid configuration");
//!             println!("starting server on {}", config.bind_address());
//!         }
//!         pyrastream::Command::Probe(config) => {
//!             config.validate().expect("invalid configuration");
//!         }
//!     }
//! }
//! ```

pub mod config;
pub mod error;
pub mod format;
pub mod io;
pub mod server;
pub mod slide;
pub mod tile;

// Re-export commonly used types
pub use config::{Cli, Command, InterpolationKind, ProbeConfig, ServeConfig, StorageBackend};
pub use error::{
    CacheError, EncodeError, FormatError, IoError, TiffError, TileError, TransformError, ViewError,
    WsiError,
};
pub use format::tiff::{
    parse_u32_array, parse_u64_array, ByteOrder, Compression, FieldType, Ifd, IfdEntry,
    PyramidLevel, TiffHeader, TiffPyramid, TiffTag, TileData, ValueReader, BIGTIFF_HEADER_SIZE,
    TIFF_HEADER_SIZE,
};
pub use format::{detect_format, SlideFormat};
pub use format::{prepare_tile_jpeg, GenericTiffLevelData, GenericTiffReader, SvsLevelData, SvsMetadata, SvsReader};
pub use io::{create_s3_client, BlockCache, FsRangeReader, RangeReader, S3RangeReader};
pub use server::{
    create_router, healthz_handler, info_handler, region_handler, tile_handler, AppState,
    ErrorResponse, HealthResponse, RouterConfig,
};
pub use slide::{CachedSlide, FsSlideSource, LevelInfo, S3SlideSource, SlideReader, SlideRegistry, SlideSource};
pub use tile::{
    clamp_quality, is_valid_quality, open_source_image, EncoderKind, Jp2kCache, RawTile,
    RegionComposer, SourceImage, SourceImageDescriptor, TileCache, TileKey, TileManager, View,
    Watermark, DEFAULT_JPEG_QUALITY, MAX_JPEG_QUALITY, MIN_JPEG_QUALITY,
};
