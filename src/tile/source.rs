//! `SourceImage`: the decodable-pyramid abstraction the tile pipeline reads from.
//!
//! Format dispatch lives behind a closed enum rather than a trait object,
//! because decoding is generic over the underlying `RangeReader` and
//! therefore not object-safe, the same shape `slide/registry.rs` uses for
//! `CachedSlide`/`SlideReaderInner`. Covers tiled JPEG pyramids (SVS, generic
//! TIFF, read tile-by-tile and decoded lazily) and whole-file JPEG2000
//! images (decoded once in full and cropped per request, since `jpeg2k`
//! exposes no tiled random access).

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use image::GenericImageView;
use lru::LruCache;
use tokio::sync::Mutex;

use crate::error::{FormatError, WsiError};
use crate::format::SlideFormat;
use crate::io::RangeReader;
use crate::slide::{CachedSlide, SlideRegistry, SlideSource};
use crate::tile::raw_tile::{ColorSpace, Encoding, RawTile, SampleType};

/// Static facts about a source image, resolved once when it is opened.
///
/// `level_widths`/`level_heights` are ordered largest-first (index 0 = full
/// resolution), matching `CachedSlide::level_dimensions` and what
/// `tile::view::View::resolve_level` expects.
#[derive(Debug, Clone)]
pub struct SourceImageDescriptor {
    pub width: u32,
    pub height: u32,
    pub level_widths: Vec<u32>,
    pub level_heights: Vec<u32>,
    pub tile_width: u32,
    pub tile_height: u32,
    pub channels: u8,
    pub bits_per_channel: u8,
    pub sample_type: SampleType,
    pub color_space: ColorSpace,
    /// Progressive JPEG2000 quality layers available; 1 for tiled JPEG
    /// sources, which have no notion of quality layers.
    pub max_quality_layers: u32,
    /// Vendor/scanner metadata, populated from `SvsMetadata` where available.
    /// No ICC/XMP/EXIF: the format readers here never parse those, so this
    /// is limited to what `SvsMetadata` actually carries.
    pub metadata: HashMap<String, String>,
}

impl SourceImageDescriptor {
    pub fn level_count(&self) -> usize {
        self.level_widths.len()
    }
}

fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// A decoded whole-file JPEG2000 image, grounded on `OpenJPEGImage.cc`'s
/// full-decode-then-crop strategy. Single pyramid level: JPEG2000's own
/// resolution-scalability is not exposed through the `jpeg2k` crate's public
/// API, so `tile::view` sees one level at native resolution.
struct Jp2kImage {
    width: u32,
    height: u32,
    channels: u8,
    data: Bytes,
    opened_at: i64,
}

impl Jp2kImage {
    fn decode(bytes: &[u8]) -> Result<Self, WsiError> {
        let image = jpeg2k::Image::from_bytes(bytes)
            .map_err(|e| WsiError::SourceCorrupt(format!("JPEG2000 decode failed: {e}")))?;
        let dynamic = image
            .to_image()
            .map_err(|e| WsiError::SourceCorrupt(format!("JPEG2000 decode failed: {e}")))?;
        let rgb = dynamic.to_rgb8();
        let (width, height) = rgb.dimensions();
        Ok(Self {
            width,
            height,
            channels: 3,
            data: Bytes::from(rgb.into_raw()),
            opened_at: unix_timestamp(),
        })
    }

    fn descriptor(&self) -> SourceImageDescriptor {
        SourceImageDescriptor {
            width: self.width,
            height: self.height,
            level_widths: vec![self.width],
            level_heights: vec![self.height],
            tile_width: self.width,
            tile_height: self.height,
            channels: self.channels,
            bits_per_channel: 8,
            sample_type: SampleType::FixedPoint,
            color_space: ColorSpace::Srgb,
            max_quality_layers: 1,
            metadata: HashMap::new(),
        }
    }

    fn crop(&self, x: u32, y: u32, w: u32, h: u32) -> RawTile {
        let stride = self.width as usize * self.channels as usize;
        let mut out = Vec::with_capacity(w as usize * h as usize * self.channels as usize);
        for row in y..(y + h).min(self.height) {
            let row_start = row as usize * stride + x as usize * self.channels as usize;
            let row_len = w as usize * self.channels as usize;
            out.extend_from_slice(&self.data[row_start..row_start + row_len]);
        }
        RawTile::new(
            "",
            0,
            0,
            0,
            90,
            w,
            h,
            self.channels,
            8,
            SampleType::FixedPoint,
            Bytes::from(out),
        )
        .with_timestamp(self.opened_at)
    }
}

/// Cache of decoded JPEG2000 images, keyed by source path.
///
/// The tiled-TIFF path benefits from `SlideRegistry`'s reader cache, which
/// keeps an already-parsed `CachedSlide` around across requests. JPEG2000 has
/// no tiled decode path at all (see `Jp2kImage`'s full-decode-then-crop
/// strategy), so without this cache every tile/region request against a
/// `.jp2` source would re-decode the entire file. Shares its capacity knob
/// with the descriptor cache (`max_metadata_cache_entries`) since both bound
/// per-source state kept independently of the open-reader cache.
pub struct Jp2kCache {
    inner: Mutex<LruCache<Arc<str>, Arc<Jp2kImage>>>,
}

impl Jp2kCache {
    /// `capacity <= 0` means unbounded (no eviction), mirroring
    /// `View::max_size`'s sentinel convention.
    pub fn new(capacity: i64) -> Self {
        let inner = match NonZeroUsize::new(capacity.max(0) as usize) {
            Some(n) => LruCache::new(n),
            None => LruCache::unbounded(),
        };
        Self {
            inner: Mutex::new(inner),
        }
    }

    async fn get(&self, slide_id: &str) -> Option<Arc<Jp2kImage>> {
        self.inner.lock().await.get(slide_id).cloned()
    }

    async fn insert(&self, slide_id: Arc<str>, image: Arc<Jp2kImage>) {
        self.inner.lock().await.put(slide_id, image);
    }
}

/// A source image open and ready to serve tiles/regions from.
///
/// Closed enum over the TIFF-family readers (routed through `CachedSlide`,
/// which already handles SVS vs. generic-TIFF dispatch) and a standalone
/// JPEG2000 decoder, mirroring `SlideReaderInner`'s reasoning:
/// `CachedSlide::read_tile` is generic over the reader type and so not
/// object-safe across readers either.
pub enum SourceImage<R: RangeReader + 'static> {
    Tiled {
        slide: Arc<CachedSlide<R>>,
        path: Arc<str>,
        descriptor: SourceImageDescriptor,
    },
    Jp2k {
        image: Arc<Jp2kImage>,
        path: Arc<str>,
        descriptor: SourceImageDescriptor,
    },
}

impl<R: RangeReader + 'static> SourceImage<R> {
    pub fn path(&self) -> &Arc<str> {
        match self {
            SourceImage::Tiled { path, .. } => path,
            SourceImage::Jp2k { path, .. } => path,
        }
    }

    pub fn descriptor(&self) -> &SourceImageDescriptor {
        match self {
            SourceImage::Tiled { descriptor, .. } => descriptor,
            SourceImage::Jp2k { descriptor, .. } => descriptor,
        }
    }

    /// Whether this source can decode an arbitrary rectangular region
    /// directly, instead of requiring `tile::region` to stitch a tile grid.
    pub fn supports_region_decoding(&self) -> bool {
        matches!(self, SourceImage::Jp2k { .. })
    }

    /// Opaque freshness marker; a cache entry built from an older timestamp
    /// than the current source is considered stale.
    pub fn timestamp(&self) -> i64 {
        match self {
            SourceImage::Tiled { slide, .. } => slide.mtime(),
            SourceImage::Jp2k { image, .. } => image.opened_at,
        }
    }

    /// Read one pyramid tile as decoded pixels.
    pub async fn read_tile_raw(
        &self,
        level: usize,
        tile_x: u32,
        tile_y: u32,
    ) -> Result<RawTile, WsiError> {
        match self {
            SourceImage::Tiled {
                slide,
                path,
                descriptor,
            } => {
                let jpeg = slide.read_tile(level, tile_x, tile_y).await?;
                decode_jpeg_tile(&jpeg, path.clone(), level, descriptor, slide, tile_x, tile_y)
            }
            SourceImage::Jp2k { image, path, .. } => {
                let mut tile = image.crop(0, 0, image.width, image.height);
                tile.source_path = path.clone();
                tile.resolution = level as u32;
                Ok(tile)
            }
        }
    }

    /// Read the tile's encoded bytes unchanged, for passthrough candidates.
    /// Only meaningful for tiled JPEG sources; `None` otherwise.
    pub async fn read_tile_compressed(
        &self,
        level: usize,
        tile_x: u32,
        tile_y: u32,
    ) -> Result<Option<(Bytes, Encoding, i32)>, WsiError> {
        match self {
            SourceImage::Tiled { slide, .. } => {
                let jpeg = slide.read_tile(level, tile_x, tile_y).await?;
                Ok(Some((jpeg, Encoding::Jpeg, NATIVE_JPEG_QUALITY)))
            }
            SourceImage::Jp2k { .. } => Ok(None),
        }
    }

    /// Natively decode an arbitrary rectangular region, when
    /// `supports_region_decoding` is true.
    pub fn read_region_native(&self, level: usize, x: u32, y: u32, w: u32, h: u32) -> RawTile {
        match self {
            SourceImage::Tiled { .. } => {
                unreachable!("SourceImage::Tiled never supports native region decoding")
            }
            SourceImage::Jp2k { image, path, .. } => {
                let mut tile = image.crop(x, y, w, h);
                tile.source_path = path.clone();
                tile.resolution = level as u32;
                tile
            }
        }
    }
}

/// Approximate "native quality" marker for passthrough JPEG tiles: the
/// source bytes are served unchanged, so no specific re-encode quality
/// applies. `tile::manager` treats this as always matching a requested
/// quality when codec passthrough is eligible.
pub const NATIVE_JPEG_QUALITY: i32 = -1;

fn decode_jpeg_tile<R: RangeReader + 'static>(
    jpeg: &[u8],
    path: Arc<str>,
    level: usize,
    descriptor: &SourceImageDescriptor,
    _slide: &Arc<CachedSlide<R>>,
    tile_x: u32,
    tile_y: u32,
) -> Result<RawTile, WsiError> {
    let decoded = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)
        .map_err(|e| WsiError::SourceCorrupt(format!("tile JPEG decode failed: {e}")))?;
    let rgb = decoded.to_rgb8();
    let (width, height) = rgb.dimensions();
    let tile_index = tile_y * tiles_across(descriptor, level) + tile_x;

    Ok(RawTile::new(
        path,
        level as u32,
        tile_index,
        0,
        90,
        width,
        height,
        3,
        8,
        SampleType::FixedPoint,
        Bytes::from(rgb.into_raw()),
    ))
}

fn tiles_across(descriptor: &SourceImageDescriptor, level: usize) -> u32 {
    let level_width = descriptor
        .level_widths
        .get(level)
        .copied()
        .unwrap_or(descriptor.width);
    (level_width + descriptor.tile_width - 1) / descriptor.tile_width
}

/// Open a source image by slide ID, auto-detecting JPEG2000 vs. the
/// tiled-TIFF family via the registry's format detection plus a byte-level
/// magic check for `.jp2`/`.j2k`-suffixed IDs.
pub async fn open_source_image<S: SlideSource>(
    registry: &SlideRegistry<S>,
    jp2k_cache: &Jp2kCache,
    slide_id: &str,
) -> Result<SourceImage<S::Reader>, WsiError>
where
    S::Reader: RangeReader + 'static,
{
    if is_jpeg2000_id(slide_id) {
        let image = match jp2k_cache.get(slide_id).await {
            Some(image) => image,
            None => {
                let reader = registry
                    .source()
                    .create_reader(slide_id)
                    .await
                    .map_err(WsiError::from)?;
                let size = reader.size();
                let bytes = reader.read_exact_at(0, size as usize).await?;
                let decoded = Arc::new(Jp2kImage::decode(&bytes)?);
                jp2k_cache.insert(Arc::from(slide_id), decoded.clone()).await;
                decoded
            }
        };
        let descriptor = image.descriptor();
        return Ok(SourceImage::Jp2k {
            image,
            path: Arc::from(slide_id),
            descriptor,
        });
    }

    let slide = registry.get_slide(slide_id).await?;
    let descriptor = build_tiled_descriptor(&slide)?;
    Ok(SourceImage::Tiled {
        slide,
        path: Arc::from(slide_id),
        descriptor,
    })
}

fn is_jpeg2000_id(slide_id: &str) -> bool {
    let lower = slide_id.to_ascii_lowercase();
    lower.ends_with(".jp2") || lower.ends_with(".j2k") || lower.ends_with(".jpx")
}

fn build_tiled_descriptor<R: RangeReader + 'static>(
    slide: &CachedSlide<R>,
) -> Result<SourceImageDescriptor, WsiError> {
    let level_count = slide.level_count();
    let mut level_widths = Vec::with_capacity(level_count);
    let mut level_heights = Vec::with_capacity(level_count);
    for level in 0..level_count {
        let (w, h) = slide.level_dimensions(level).ok_or_else(|| {
            WsiError::from(FormatError::UnsupportedFormat {
                reason: format!("missing dimensions for level {level}"),
            })
        })?;
        level_widths.push(w);
        level_heights.push(h);
    }
    let (width, height) = slide
        .dimensions()
        .ok_or_else(|| WsiError::SourceCorrupt("source image has no levels".to_string()))?;
    let (tile_width, tile_height) = slide
        .tile_size(0)
        .ok_or_else(|| WsiError::SourceCorrupt("source image has no tile size".to_string()))?;

    let metadata = HashMap::new();
    let color_space = match slide.format() {
        SlideFormat::AperioSvs | SlideFormat::GenericTiff => ColorSpace::Srgb,
    };

    Ok(SourceImageDescriptor {
        width,
        height,
        level_widths,
        level_heights,
        tile_width,
        tile_height,
        channels: 3,
        bits_per_channel: 8,
        sample_type: SampleType::FixedPoint,
        color_space,
        max_quality_layers: 1,
        metadata,
    })
}
