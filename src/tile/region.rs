//! `RegionComposer`: assemble an arbitrary rectangular region, either by
//! delegating to a source that can decode one natively or by stitching a
//! grid of individually-cached tiles.
//!
//! Computes the covering tile range and per-edge pixel offsets, then copies
//! each contributing tile's rows into the output buffer one destination-
//! tile-width at a time. The output buffer's pixel layout (channels, bits
//! per channel, sample type) is fixed from the first tile fetched, since
//! storage can't be allocated before at least one real tile has arrived.

use std::sync::Arc;

use rand::Rng;

use crate::error::WsiError;
use crate::io::RangeReader;
use crate::slide::{SlideRegistry, SlideSource};

use super::manager::TileManager;
use super::raw_tile::{raw_data_len, RawTile, SampleType};
use super::source::{open_source_image, SourceImage};
use super::transform::{apply_pipeline, PipelineOptions};
use super::view::View;

/// Composes regions on top of a [`TileManager`], reusing its cache for each
/// contributing tile on the stitched path.
pub struct RegionComposer<S: SlideSource> {
    registry: Arc<SlideRegistry<S>>,
    manager: Arc<TileManager<S>>,
}

impl<S: SlideSource> RegionComposer<S>
where
    S::Reader: RangeReader + 'static,
{
    pub fn new(registry: Arc<SlideRegistry<S>>, manager: Arc<TileManager<S>>) -> Self {
        Self { registry, manager }
    }

    /// Fetch a `width x height` region at `(x, y)` on `resolution`'s canvas,
    /// running it through the transform pipeline (watermark included, since
    /// composed regions are never cached and so must be watermarked here
    /// rather than per-tile).
    #[allow(clippy::too_many_arguments)]
    pub async fn get_region<R: Rng + ?Sized>(
        &self,
        slide_id: &str,
        resolution: usize,
        h_angle: i32,
        v_angle: i32,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        view: &View,
        opts: &PipelineOptions<'_>,
        rng: &mut R,
    ) -> Result<RawTile, WsiError> {
        let source = open_source_image(&self.registry, self.manager.jp2k_cache(), slide_id).await?;
        let color_space = source.descriptor().color_space;

        let region = if source.supports_region_decoding() {
            source.read_region_native(resolution, x, y, width, height)
        } else {
            self.stitch_region(
                &source, slide_id, resolution, h_angle, v_angle, x, y, width, height, rng,
            )
            .await?
        };

        apply_pipeline(region, color_space, view, opts, self.manager.watermark(), rng)
            .map_err(WsiError::from)
    }

    #[allow(clippy::too_many_arguments)]
    async fn stitch_region<R: Rng + ?Sized>(
        &self,
        source: &SourceImage<S::Reader>,
        slide_id: &str,
        resolution: usize,
        h_angle: i32,
        v_angle: i32,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        rng: &mut R,
    ) -> Result<RawTile, WsiError> {
        let descriptor = source.descriptor();
        let level_width = descriptor
            .level_widths
            .get(resolution)
            .copied()
            .unwrap_or(descriptor.width);
        let level_height = descriptor
            .level_heights
            .get(resolution)
            .copied()
            .unwrap_or(descriptor.height);
        let src_tile_width = descriptor.tile_width;
        let src_tile_height = descriptor.tile_height;

        let whole_image = x == 0 && y == 0 && width == level_width && height == level_height;

        let (start_x, start_y, xoffset, yoffset, end_x, end_y) = if whole_image {
            let ntlx = div_ceil(level_width, src_tile_width);
            let ntly = div_ceil(level_height, src_tile_height);
            (0, 0, 0, 0, ntlx, ntly)
        } else {
            let start_x = x / src_tile_width;
            let start_y = y / src_tile_height;
            let xoffset = x % src_tile_width;
            let yoffset = y % src_tile_height;
            let end_x = div_ceil(width + x, src_tile_width);
            let end_y = div_ceil(height + y, src_tile_height);
            (start_x, start_y, xoffset, yoffset, end_x, end_y)
        };

        let mut channels: Option<u8> = None;
        let mut bpc: Option<u8> = None;
        let mut sample_type: Option<SampleType> = None;
        let mut data: Vec<u8> = Vec::new();
        let mut current_height = 0u32;

        for i in start_y..end_y {
            let mut current_width = 0u32;
            for j in start_x..end_x {
                let rawtile = self
                    .manager
                    .get_tile(
                        slide_id,
                        resolution,
                        j,
                        i,
                        h_angle,
                        v_angle,
                        None,
                        &View::new(),
                        &PipelineOptions::default(),
                        rng,
                    )
                    .await?;

                if channels.is_none() {
                    channels = Some(rawtile.channels);
                    // Sub-8-bit samples are already expanded by the decoder,
                    // so bpc here is always a multiple of 8.
                    bpc = Some(rawtile.bits_per_channel);
                    sample_type = Some(rawtile.sample_type);
                    data = vec![0u8; raw_data_len(width, height, channels.unwrap(), bpc.unwrap())];
                }
                let channels = channels.unwrap();
                let bpc = bpc.unwrap();
                let bytes_per_sample = bpc as usize / 8;

                let (mut dst_w, mut dst_h) = (rawtile.width, rawtile.height);
                let (mut xf, mut yf) = (0u32, 0u32);

                if !whole_image {
                    if j == start_x {
                        dst_w = if j < end_x - 1 {
                            rawtile.width - xoffset
                        } else {
                            width
                        };
                        xf = xoffset;
                    } else if j == end_x - 1 {
                        let remainder = (width + x) % src_tile_width;
                        if remainder != 0 {
                            dst_w = remainder;
                        }
                    }

                    if i == start_y {
                        dst_h = if i < end_y - 1 {
                            rawtile.height - yoffset
                        } else {
                            height
                        };
                        yf = yoffset;
                    } else if i == end_y - 1 {
                        let remainder = (height + y) % src_tile_height;
                        if remainder != 0 {
                            dst_h = remainder;
                        }
                    }
                }

                let row_bytes = dst_w as usize * channels as usize * bytes_per_sample;
                for k in 0..dst_h {
                    let dst_row_start = ((current_width * channels as u32
                        + (k + current_height) * width * channels as u32)
                        as usize)
                        * bytes_per_sample;
                    let src_row_start = (((k + yf) * rawtile.width * channels as u32
                        + xf * channels as u32) as usize)
                        * bytes_per_sample;
                    data[dst_row_start..dst_row_start + row_bytes]
                        .copy_from_slice(&rawtile.data[src_row_start..src_row_start + row_bytes]);
                }

                current_width += dst_w;
            }
            current_height += row_height(
                i,
                start_y,
                end_y,
                src_tile_height,
                yoffset,
                height,
                y,
                whole_image,
            );
        }

        Ok(RawTile::new(
            slide_id,
            resolution as u32,
            0,
            h_angle,
            v_angle,
            width,
            height,
            channels.unwrap_or(3),
            bpc.unwrap_or(8),
            sample_type.unwrap_or(SampleType::FixedPoint),
            bytes::Bytes::from(data),
        ))
    }
}

fn div_ceil(n: u32, d: u32) -> u32 {
    n / d + if n % d == 0 { 0 } else { 1 }
}

#[allow(clippy::too_many_arguments)]
fn row_height(
    i: u32,
    start_y: u32,
    end_y: u32,
    src_tile_height: u32,
    yoffset: u32,
    height: u32,
    y: u32,
    whole_image: bool,
) -> u32 {
    if whole_image {
        return src_tile_height;
    }
    if i == start_y {
        if i < end_y - 1 {
            src_tile_height - yoffset
        } else {
            height
        }
    } else if i == end_y - 1 {
        let remainder = (height + y) % src_tile_height;
        if remainder != 0 {
            remainder
        } else {
            src_tile_height
        }
    } else {
        src_tile_height
    }
}
