//! `TileManager`: cache-probe, decode-on-miss, watermark, encode-or-passthrough.
//!
//! Probe the cache for the requested encoding, fall back to a cached `Raw`
//! entry, detect a stale (timestamp-mismatched) hit and refetch, decode
//! fresh on a full miss, watermark the decoded buffer before it ever reaches
//! the cache, then either re-encode or, when the cached entry already
//! carries the right bytes, inject-metadata-and-return. Supports the full
//! `EncoderKind` set, driven by the `View` passed into each request.

use std::sync::Arc;

use bytes::Bytes;
use rand::Rng;
use tracing::{instrument, warn};

use crate::error::WsiError;
use crate::io::RangeReader;
use crate::slide::{SlideRegistry, SlideSource};

use super::cache::TileCache;
use super::encoder::EncoderKind;
use super::raw_tile::{Encoding, RawTile, TileKey};
use super::source::{open_source_image, Jp2kCache, SourceImage, NATIVE_JPEG_QUALITY};
use super::transform::{apply_pipeline, PipelineOptions};
use super::view::View;
use super::watermark::Watermark;

/// Orchestrates one tile request end to end: open the source, probe the
/// cache, decode/transform/watermark/encode on a miss, and keep the cache
/// current.
pub struct TileManager<S: SlideSource> {
    registry: Arc<SlideRegistry<S>>,
    jp2k_cache: Arc<Jp2kCache>,
    cache: Arc<TileCache>,
    watermark: Option<Arc<Watermark>>,
    /// Mirrors `compressor->defaultQuality()`: when true and the request
    /// needs no pixel-level processing, already-compressed native JPEG
    /// bytes are served without a decode/re-encode round trip.
    codec_passthrough: bool,
}

impl<S: SlideSource> TileManager<S>
where
    S::Reader: RangeReader + 'static,
{
    pub fn new(
        registry: Arc<SlideRegistry<S>>,
        jp2k_cache: Arc<Jp2kCache>,
        cache: Arc<TileCache>,
        watermark: Option<Arc<Watermark>>,
        codec_passthrough: bool,
    ) -> Self {
        Self {
            registry,
            jp2k_cache,
            cache,
            watermark,
            codec_passthrough,
        }
    }

    pub fn cache(&self) -> &Arc<TileCache> {
        &self.cache
    }

    pub fn jp2k_cache(&self) -> &Arc<Jp2kCache> {
        &self.jp2k_cache
    }

    pub fn watermark(&self) -> Option<&Watermark> {
        self.watermark.as_deref()
    }

    /// Fetch one pyramid tile, encoded as `target` (or left `Raw` when
    /// `target` is `None`, the mode `RegionComposer` stitching uses).
    #[instrument(skip(self, view, opts, rng), fields(slide_id, resolution, tile_x, tile_y))]
    #[allow(clippy::too_many_arguments)]
    pub async fn get_tile<R: Rng + ?Sized>(
        &self,
        slide_id: &str,
        resolution: usize,
        tile_x: u32,
        tile_y: u32,
        h_angle: i32,
        v_angle: i32,
        target: Option<EncoderKind>,
        view: &View,
        opts: &PipelineOptions<'_>,
        rng: &mut R,
    ) -> Result<RawTile, WsiError> {
        let source = open_source_image(&self.registry, &self.jp2k_cache, slide_id).await?;
        let source_ts = source.timestamp();
        let descriptor = source.descriptor();
        let tiles_across = tiles_across(
            descriptor.level_widths.get(resolution).copied().unwrap_or(descriptor.width),
            descriptor.tile_width,
        );
        let tile_index = tile_y * tiles_across + tile_x;

        let target_encoding = target.map(|t| t.encoding()).unwrap_or(Encoding::Raw);
        let quality = target.map(|t| t.quality()).unwrap_or(0);

        // Step 1: probe for the requested encoding, then a Raw fallback.
        let target_key = TileKey::new(
            slide_id,
            resolution as u32,
            tile_index,
            h_angle,
            v_angle,
            target_encoding,
            quality,
        );
        let mut hit = self.cache.get(&target_key).await;
        if hit.is_none() && target_encoding != Encoding::Raw {
            let raw_key = target_key.with_encoding(Encoding::Raw, 0);
            hit = self.cache.get(&raw_key).await;
        }

        if let Some(tile) = hit {
            if tile.timestamp == source_ts {
                if tile.encoding == target_encoding {
                    return Ok(tile);
                }
                // Cached Raw, different encoding requested: re-encode without
                // touching the source again.
                return self.encode_and_cache(tile, target, target_encoding, quality).await;
            }
            // Timestamp mismatch: this tile alone is stale, evict and refetch.
            // Does not abort or restart a surrounding region stitch.
            self.cache.remove(&tile.key()).await;
        }

        self.get_new_tile(
            &source,
            slide_id,
            resolution,
            tile_x,
            tile_y,
            tile_index,
            h_angle,
            v_angle,
            target,
            target_encoding,
            quality,
            view,
            opts,
            rng,
        )
        .await
    }

    /// Re-encode an already-cached `Raw` tile into `target`, or return it
    /// unchanged when no target was requested.
    async fn encode_and_cache(
        &self,
        raw: RawTile,
        target: Option<EncoderKind>,
        target_encoding: Encoding,
        quality: i32,
    ) -> Result<RawTile, WsiError> {
        let Some(encoder) = target else {
            return Ok(raw);
        };
        match encoder.compress(&raw) {
            Ok(bytes) => {
                let mut encoded = raw;
                encoded.data = bytes;
                encoded.encoding = target_encoding;
                encoded.quality = quality;
                if let Err(e) = self.cache.insert(encoded.clone()).await {
                    warn!(error = %e, "tile cache insert failed after re-encode");
                }
                Ok(encoded)
            }
            Err(e) => {
                warn!(error = %e, "encode failed, falling back to raw tile");
                Ok(raw)
            }
        }
    }

    /// Mirrors `TileManager::getNewTile`: decode (or, when eligible, take the
    /// source's native compressed bytes untouched), watermark, then
    /// encode-or-inject-metadata, finally inserting into the cache.
    #[allow(clippy::too_many_arguments)]
    async fn get_new_tile<R: Rng + ?Sized>(
        &self,
        source: &SourceImage<S::Reader>,
        slide_id: &str,
        resolution: usize,
        tile_x: u32,
        tile_y: u32,
        tile_index: u32,
        h_angle: i32,
        v_angle: i32,
        target: Option<EncoderKind>,
        target_encoding: Encoding,
        quality: i32,
        view: &View,
        opts: &PipelineOptions<'_>,
        rng: &mut R,
    ) -> Result<RawTile, WsiError> {
        let passthrough_eligible = self.codec_passthrough
            && self.watermark.is_none()
            && target_encoding == Encoding::Jpeg
            && quality == NATIVE_JPEG_QUALITY
            && !needs_processing(view, opts);

        let mut tile = if passthrough_eligible {
            match source.read_tile_compressed(resolution, tile_x, tile_y).await? {
                Some((bytes, encoding, native_quality)) => {
                    compressed_tile_shell(slide_id, resolution, tile_index, h_angle, v_angle, bytes, encoding, native_quality)?
                }
                None => {
                    self.decode_and_process(source, resolution, tile_x, tile_y, view, opts, rng)
                        .await?
                }
            }
        } else {
            self.decode_and_process(source, resolution, tile_x, tile_y, view, opts, rng)
                .await?
        };
        tile.timestamp = source.timestamp();

        // Watermark is applied directly here, before the cache insert, and
        // only to still-decoded (Raw) buffers: a passthrough JPEG's bytes
        // are never pixel-blended, since that would corrupt the codec
        // stream rather than the image.
        if tile.encoding == Encoding::Raw {
            if let Some(wm) = &self.watermark {
                let mut data = tile.data.to_vec();
                wm.apply(
                    &mut data,
                    tile.width,
                    tile.height,
                    tile.channels as usize,
                    tile.bits_per_channel as u32,
                    opts.watermark_block,
                    rng,
                );
                tile.data = Bytes::from(data);
            }
        }

        if let Some(encoder) = target {
            if tile.encoding == target_encoding {
                // Already correctly encoded (passthrough hit): splice in any
                // ICC/XMP metadata the descriptor carries without touching
                // the compressed pixel bytes, then stamp the requested
                // quality so the cache key sorts consistently.
                let descriptor = source.descriptor();
                let icc = descriptor.metadata.get("icc").map(|s| s.as_bytes());
                let xmp = descriptor.metadata.get("xmp").map(|s| s.as_bytes());
                if icc.is_some() || xmp.is_some() {
                    if let Err(e) = encoder.inject_metadata(&mut tile, icc, xmp) {
                        warn!(error = %e, "metadata injection failed, serving tile without it");
                    }
                }
                tile.quality = quality;
            } else {
                match encoder.compress(&tile) {
                    Ok(bytes) => {
                        tile.data = bytes;
                        tile.encoding = target_encoding;
                        tile.quality = quality;
                    }
                    Err(e) => {
                        warn!(error = %e, "encode failed for freshly decoded tile, caching raw");
                    }
                }
            }
        }

        if let Err(e) = self.cache.insert(tile.clone()).await {
            warn!(error = %e, "tile cache insert failed");
        }

        Ok(tile)
    }

    async fn decode_and_process<R: Rng + ?Sized>(
        &self,
        source: &SourceImage<S::Reader>,
        resolution: usize,
        tile_x: u32,
        tile_y: u32,
        view: &View,
        opts: &PipelineOptions<'_>,
        rng: &mut R,
    ) -> Result<RawTile, WsiError> {
        let raw = source.read_tile_raw(resolution, tile_x, tile_y).await?;
        let color_space = source.descriptor().color_space;
        // Watermark is handled separately by the caller on the tile path,
        // so it's never passed into the pipeline here.
        apply_pipeline(raw, color_space, view, opts, None, rng).map_err(WsiError::from)
    }
}

fn tiles_across(level_width: u32, tile_width: u32) -> u32 {
    (level_width + tile_width - 1) / tile_width
}

fn compressed_tile_shell(
    slide_id: &str,
    resolution: usize,
    tile_index: u32,
    h_angle: i32,
    v_angle: i32,
    bytes: Bytes,
    encoding: Encoding,
    quality: i32,
) -> Result<RawTile, WsiError> {
    let (width, height) = jpeg_dimensions(&bytes)?;
    let mut tile = RawTile::new(
        slide_id,
        resolution as u32,
        tile_index,
        h_angle,
        v_angle,
        width,
        height,
        3,
        8,
        crate::tile::raw_tile::SampleType::FixedPoint,
        bytes,
    );
    tile.encoding = encoding;
    tile.quality = quality;
    Ok(tile)
}

/// Read only the JPEG header to recover dimensions, avoiding a full decode
/// for the passthrough path's whole purpose of skipping one.
fn jpeg_dimensions(bytes: &Bytes) -> Result<(u32, u32), WsiError> {
    use std::io::Cursor;
    image::ImageReader::new(Cursor::new(bytes.as_ref()))
        .with_guessed_format()
        .map_err(|e| WsiError::SourceCorrupt(format!("JPEG header read failed: {e}")))?
        .into_dimensions()
        .map_err(|e| WsiError::SourceCorrupt(format!("JPEG header read failed: {e}")))
}

/// Whether any view-driven or per-request pipeline step would actually
/// modify pixels, mirroring the combined guard conditions
/// `apply_pipeline` checks at each of its 17 steps (excluding the
/// structural CIELAB conversion and the watermark step, which this
/// manager handles on its own).
fn needs_processing(view: &View, opts: &PipelineOptions<'_>) -> bool {
    view.float_processing()
        || view.shaded
        || !view.ctw.is_empty()
        || view.inverted
        || view.cmapped
        || !view.convolution.is_empty()
        || opts.target_size.is_some()
        || opts.bands.is_some()
        || !matches!(opts.binary, crate::tile::transform::BinaryMode::Disabled)
        || view.equalization
        || view.greyscale
        || view.flip != crate::tile::view::Flip::None
        || view.rotation != 0.0
}
