//! Tile and region serving layer.
//!
//! This module sits between the HTTP handlers and the slide abstraction: it
//! opens source images, probes and fills the tile cache, runs the per-request
//! processing pipeline, and encodes the result in the requested codec.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              HTTP Handlers               │
//! └─────────┬───────────────────┬────────────┘
//!           ▼                   ▼
//! ┌──────────────────┐  ┌────────────────────┐
//! │   TileManager     │  │  RegionComposer    │
//! │ (single tile)     │  │ (stitched region)  │
//! └─────────┬─────────┘  └─────────┬──────────┘
//!           │   decode/transform/encode          │
//!           ▼                                    ▼
//! ┌──────────────────┐        ┌──────────────────┐
//! │    TileCache      │        │  SourceImage     │
//! └──────────────────┘        └──────────────────┘
//! ```
//!
//! # Components
//!
//! - [`raw_tile`]: the [`RawTile`] value type and [`TileKey`] cache key
//! - [`cache`]: byte-budgeted LRU [`TileCache`]
//! - [`source`]: [`SourceImage`], the decodable-pyramid abstraction
//! - [`encoder`]: [`EncoderKind`], turning a [`RawTile`] into wire bytes
//! - [`watermark`]: [`Watermark`] blending
//! - [`transform`]: the fixed-order pixel pipeline ([`apply_pipeline`])
//! - [`view`]: [`View`], resolution and viewport planning
//! - [`region`]: [`RegionComposer`], arbitrary-viewport region assembly
//! - [`manager`]: [`TileManager`], single-tile orchestration

mod cache;
mod encoder;
mod manager;
mod raw_tile;
mod region;
mod source;
mod transform;
mod view;
mod watermark;

pub use cache::TileCache;
pub use encoder::{
    clamp_quality, is_valid_quality, EncoderKind, DEFAULT_JPEG_QUALITY, MAX_JPEG_QUALITY,
    MIN_JPEG_QUALITY,
};
pub use manager::TileManager;
pub use raw_tile::{raw_data_len, ColorSpace, Encoding, RawTile, SampleType, TileKey};
pub use region::RegionComposer;
pub use source::{
    open_source_image, Jp2kCache, SourceImage, SourceImageDescriptor, NATIVE_JPEG_QUALITY,
};
pub use transform::{apply_pipeline, BinaryMode, PipelineOptions};
pub use view::{Colormap, Flip, View};
pub use watermark::Watermark;
