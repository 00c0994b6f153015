//! Format parsers for pyramidal image files.
//!
//! This module provides parsers for the source formats the server decodes:
//! TIFF-based formats (generic pyramidal TIFF, Aperio SVS) and the JPEG
//! stream utilities they share. JPEG2000 decoding lives in `tile::source`,
//! layered directly on the `jpeg2k` crate rather than this module, since it
//! has no TIFF container to parse.

pub mod detect;
pub mod generic_tiff;
pub mod jpeg;
pub mod svs;
pub mod tiff;

pub use detect::{detect_format, SlideFormat};
pub use generic_tiff::{GenericTiffLevelData, GenericTiffReader};
pub use jpeg::prepare_tile_jpeg;
pub use svs::{SvsLevelData, SvsMetadata, SvsReader};
