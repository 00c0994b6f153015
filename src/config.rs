//! Configuration management for Pyrastream.
//!
//! This module provides a flexible configuration system that supports:
//! - Command-line arguments via clap
//! - Environment variables with a `PYRA_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Example
//!
//! ```ignore
//! use pyrastream::config::ServeConfig;
//!
//! // Parse from command line and environment
//! let config = ServeConfig::parse();
//!
//! println!("Listening on {}:{}", config.host, config.port);
//! println!("Storage backend: {:?}", config.storage);
//! ```
//!
//! # Environment Variables
//!
//! - `PYRA_HOST` - Server bind address (default: 0.0.0.0)
//! - `PYRA_PORT` - Server port (default: 3000)
//! - `PYRA_SOURCE` - Storage backend, `fs` or `s3` (default: fs)
//! - `PYRA_ROOT` - Local filesystem root directory (when source=fs)
//! - `PYRA_S3_BUCKET` - S3 bucket name (required when source=s3)
//! - `PYRA_S3_ENDPOINT` - Custom S3 endpoint for S3-compatible services
//! - `PYRA_S3_REGION` - AWS region (default: us-east-1)
//! - `PYRA_CACHE_SOURCES` - Max open source images to cache (default: 100)
//! - `PYRA_CACHE_BLOCKS` - Max I/O blocks per source to cache (default: 100)
//! - `PYRA_CACHE_MB` - Tile cache budget in megabytes (default: 256)
//! - `PYRA_JPEG_QUALITY` - Default JPEG quality (default: 80)
//! - `PYRA_CACHE_MAX_AGE` - HTTP cache max-age seconds (default: 3600)
//! - `PYRA_MAX_OUTPUT_DIMENSION` - Largest edge a region request may produce
//! - `PYRA_MAX_QUALITY_LAYERS` - JPEG2000 progressive quality-layer cap
//! - `PYRA_MAX_ICC_BYTES` - Cap on embedded ICC profile size
//! - `PYRA_CODEC_PASSTHROUGH` - Allow byte-identical re-serving of source tiles
//! - `PYRA_ALLOW_UPSCALING` - Allow region requests to upscale past native resolution
//! - `PYRA_WATERMARK_IMAGE` - Path to a watermark source image
//! - `PYRA_WATERMARK_OPACITY` - Watermark blend opacity, 0.0-1.0
//! - `PYRA_WATERMARK_PROBABILITY` - Per-block watermark placement probability, 0.0-1.0

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::io::DEFAULT_BLOCK_SIZE;
use crate::tile::DEFAULT_JPEG_QUALITY;

// =============================================================================
// Default Values
// =============================================================================

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_SOURCE_CACHE_CAPACITY: usize = 100;
pub const DEFAULT_BLOCK_CACHE_CAPACITY: usize = 100;
pub const DEFAULT_CACHE_MAX_AGE: u32 = 3600;
pub const DEFAULT_TILE_CACHE_MB: usize = 256;
pub const DEFAULT_MAX_OUTPUT_DIMENSION: i64 = 8192;
pub const DEFAULT_MAX_QUALITY_LAYERS: u32 = 8;
pub const DEFAULT_MAX_ICC_BYTES: usize = 2 * 1024 * 1024;
pub const DEFAULT_WATERMARK_OPACITY: f32 = 0.3;
pub const DEFAULT_WATERMARK_PROBABILITY: f32 = 1.0;

/// Which backend source images are read from.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
#[value(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Local (or network-mounted) filesystem, rooted at `--root`.
    Fs,
    /// S3 or an S3-compatible object store.
    S3,
}

/// How an interpolation kernel should be chosen for resampling.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
#[value(rename_all = "lowercase")]
pub enum InterpolationKind {
    /// Fastest, lowest quality.
    Nearest,
    /// Default: good quality/speed tradeoff for downsampling.
    Bilinear,
    /// Sharper than bilinear, more expensive; used for upscaling.
    Bicubic,
}

impl Default for InterpolationKind {
    fn default() -> Self {
        InterpolationKind::Bilinear
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// Pyrastream - an on-demand tile and region server for gigapixel pyramidal images.
///
/// Serves tiles and arbitrary-viewport regions from pyramidal TIFF, JPEG2000
/// and SVS-style images stored on the local filesystem or in S3, with
/// per-request resizing, color processing, re-encoding and watermarking.
#[derive(Parser, Debug, Clone)]
#[command(name = "pyrastream")]
#[command(author, version, about, long_about = None)]
pub struct ServeConfig {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "PYRA_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "PYRA_PORT")]
    pub port: u16,

    // =========================================================================
    // Storage backend
    // =========================================================================
    /// Which storage backend to read source images from.
    #[arg(long, value_enum, default_value_t = StorageBackend::Fs, env = "PYRA_SOURCE")]
    pub source: StorageBackend,

    /// Root directory for source images when `--source fs`.
    #[arg(long, env = "PYRA_ROOT")]
    pub root: Option<PathBuf>,

    /// S3 bucket name containing the source images, when `--source s3`.
    #[arg(long, env = "PYRA_S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    #[arg(long, env = "PYRA_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "PYRA_S3_REGION")]
    pub s3_region: String,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// Maximum number of open source images to keep cached.
    #[arg(long, default_value_t = DEFAULT_SOURCE_CACHE_CAPACITY, env = "PYRA_CACHE_SOURCES")]
    pub cache_sources: usize,

    /// Maximum number of I/O blocks to cache per source image (256KB each by default).
    #[arg(long, default_value_t = DEFAULT_BLOCK_CACHE_CAPACITY, env = "PYRA_CACHE_BLOCKS")]
    pub cache_blocks: usize,

    /// Tile cache budget in megabytes.
    #[arg(long, default_value_t = DEFAULT_TILE_CACHE_MB, env = "PYRA_CACHE_MB")]
    pub max_image_cache_mb: usize,

    /// Block size in bytes for the block cache.
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE, env = "PYRA_BLOCK_SIZE")]
    pub block_size: usize,

    /// Maximum number of decoded JPEG2000 sources to keep cached. The TIFF
    /// family's descriptors ride along with `cache_sources`' open-reader
    /// cache; JPEG2000 has no tiled decode path, so this bounds the separate
    /// whole-image cache that spares it a full re-decode per request.
    /// `<= 0` means unbounded (no eviction), mirroring `max_output_dimension`.
    #[arg(long, default_value_t = 1000, env = "PYRA_CACHE_METADATA")]
    pub max_metadata_cache_entries: i64,

    // =========================================================================
    // Tile / region output configuration
    // =========================================================================
    /// Default JPEG quality for tile encoding (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "PYRA_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    /// HTTP Cache-Control max-age in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "PYRA_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    /// Largest width or height, in pixels, a region request may produce.
    /// `<= 0` means unbounded.
    #[arg(long, default_value_t = DEFAULT_MAX_OUTPUT_DIMENSION, env = "PYRA_MAX_OUTPUT_DIMENSION")]
    pub max_output_dimension: i64,

    /// Cap on JPEG2000 progressive quality layers decoded per request.
    #[arg(long, default_value_t = DEFAULT_MAX_QUALITY_LAYERS, env = "PYRA_MAX_QUALITY_LAYERS")]
    pub max_quality_layers: u32,

    /// Cap on embedded ICC color profile size, in bytes; larger profiles are dropped.
    #[arg(long, default_value_t = DEFAULT_MAX_ICC_BYTES, env = "PYRA_MAX_ICC_BYTES")]
    pub max_icc_bytes: usize,

    /// Allow serving a source tile's encoded bytes unchanged when the request
    /// exactly matches its native resolution, codec and quality.
    #[arg(long, default_value_t = true, env = "PYRA_CODEC_PASSTHROUGH")]
    pub codec_passthrough: bool,

    /// Interpolation kernel used for resampling.
    #[arg(long, value_enum, default_value_t = InterpolationKind::Bilinear, env = "PYRA_INTERPOLATION")]
    pub interpolation_kind: InterpolationKind,

    /// Allow region requests to upscale past the source's native resolution.
    #[arg(long, default_value_t = false, env = "PYRA_ALLOW_UPSCALING")]
    pub allow_upscaling: bool,

    // =========================================================================
    // Watermark configuration
    // =========================================================================
    /// Path to an image used to watermark served tiles and regions. When unset,
    /// watermarking is disabled.
    #[arg(long, env = "PYRA_WATERMARK_IMAGE")]
    pub watermark_image: Option<PathBuf>,

    /// Watermark blend opacity, 0.0 (invisible) to 1.0 (opaque).
    #[arg(long, default_value_t = DEFAULT_WATERMARK_OPACITY, env = "PYRA_WATERMARK_OPACITY")]
    pub watermark_opacity: f32,

    /// Probability, 0.0 to 1.0, that any given tile-sized block is watermarked.
    #[arg(long, default_value_t = DEFAULT_WATERMARK_PROBABILITY, env = "PYRA_WATERMARK_PROBABILITY")]
    pub watermark_probability: f32,

    // =========================================================================
    // CORS Configuration
    // =========================================================================
    /// Allowed CORS origins (comma-separated). If unset, allows any origin.
    #[arg(long, env = "PYRA_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        match self.source {
            StorageBackend::S3 => {
                if self.s3_bucket.as_deref().unwrap_or("").is_empty() {
                    return Err(
                        "source=s3 requires --s3-bucket or PYRA_S3_BUCKET".to_string()
                    );
                }
            }
            StorageBackend::Fs => {
                if self.root.is_none() {
                    return Err("source=fs requires --root or PYRA_ROOT".to_string());
                }
            }
        }

        if self.cache_sources == 0 {
            return Err("cache_sources must be greater than 0".to_string());
        }
        if self.cache_blocks == 0 {
            return Err("cache_blocks must be greater than 0".to_string());
        }
        if self.max_image_cache_mb == 0 {
            return Err("max_image_cache_mb must be greater than 0".to_string());
        }

        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }

        if self.block_size < 1024 || self.block_size > 16 * 1024 * 1024 {
            return Err("block_size must be between 1KB and 16MB".to_string());
        }

        if !(0.0..=1.0).contains(&self.watermark_opacity) {
            return Err("watermark_opacity must be between 0.0 and 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.watermark_probability) {
            return Err("watermark_probability must be between 0.0 and 1.0".to_string());
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether watermarking is configured.
    pub fn watermark_enabled(&self) -> bool {
        self.watermark_image.is_some()
    }
}

// =============================================================================
// Top-level CLI
// =============================================================================

/// Top-level command-line entry point.
#[derive(Parser, Debug)]
#[command(name = "pyrastream")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Consume this parsed CLI into the command it selects.
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the tile/region HTTP server.
    Serve(ServeConfig),
    /// Check storage backend connectivity without starting the server.
    Probe(ProbeConfig),
}

/// Configuration for the `probe` subcommand: checks storage backend
/// connectivity for either backend, with no auth-adjacent behavior (there is
/// no request-signing check since authentication is out of scope here).
#[derive(Parser, Debug, Clone)]
pub struct ProbeConfig {
    /// Which storage backend to probe.
    #[arg(long, value_enum, default_value_t = StorageBackend::Fs, env = "PYRA_SOURCE")]
    pub source: StorageBackend,

    /// Root directory to probe when `--source fs`.
    #[arg(long, env = "PYRA_ROOT")]
    pub root: Option<PathBuf>,

    /// S3 bucket to probe when `--source s3`.
    #[arg(long, env = "PYRA_S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// Custom S3 endpoint URL for S3-compatible services.
    #[arg(long, env = "PYRA_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "PYRA_S3_REGION")]
    pub s3_region: String,

    /// List source images found at the root/in the bucket.
    #[arg(long, default_value_t = false)]
    pub list: bool,

    /// Enable verbose logging.
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl ProbeConfig {
    pub fn validate(&self) -> Result<(), String> {
        match self.source {
            StorageBackend::S3 => {
                if self.s3_bucket.as_deref().unwrap_or("").is_empty() {
                    return Err("source=s3 requires --s3-bucket or PYRA_S3_BUCKET".to_string());
                }
            }
            StorageBackend::Fs => {
                if self.root.is_none() {
                    return Err("source=fs requires --root or PYRA_ROOT".to_string());
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
