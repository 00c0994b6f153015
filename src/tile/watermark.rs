//! Dynamic, randomly-placed image watermarking.
//!
//! A watermark image is loaded once, premultiplied by opacity and its own
//! alpha channel, then additively blended into output buffers. For regions
//! larger than a single tile the target area is divided into square blocks
//! and each block independently draws whether to receive a (randomly
//! offset) copy of the watermark, governed by `probability`.

use std::path::Path;

use image::GenericImageView;
use rand::Rng;

use crate::error::TransformError;

/// A loaded, opacity-premultiplied watermark ready to blend into tile or
/// region buffers.
///
/// The watermark is always stored as 3-channel 8-bit RGB: whatever the
/// source image's channel count, it is decoded to RGBA and its alpha folded
/// into intensity rather than carried forward.
pub struct Watermark {
    width: u32,
    height: u32,
    opacity: f32,
    probability: f32,
    /// Premultiplied RGB buffer, `width * height * 3` bytes.
    buffer: Vec<u8>,
}

impl Watermark {
    /// Decode `path` and premultiply it by `opacity` and its own alpha.
    pub fn load(path: &Path, opacity: f32, probability: f32) -> Result<Self, TransformError> {
        let img = image::open(path).map_err(|_| e_to_transform(path))?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        let mut buffer = vec![0u8; (width as usize) * (height as usize) * 3];

        for (idx, px) in rgba.pixels().enumerate() {
            let [r, g, b, a] = px.0;
            let alpha = a as f32 / 255.0;
            let factor = opacity * alpha;
            buffer[idx * 3] = (r as f32 * factor) as u8;
            buffer[idx * 3 + 1] = (g as f32 * factor) as u8;
            buffer[idx * 3 + 2] = (b as f32 * factor) as u8;
        }

        Ok(Self {
            width,
            height,
            opacity,
            probability,
            buffer,
        })
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn probability(&self) -> f32 {
        self.probability
    }

    /// Blend the watermark into `data`, an 8- or 16-bit interleaved pixel
    /// buffer of `width x height x channels`, in native-endian samples.
    ///
    /// `block`, if non-zero and smaller than the buffer, splits the target
    /// area into `block x block` tiles and independently randomizes
    /// placement and presence within each; `block == 0` (or a block at least
    /// as large as the buffer) applies a single watermark to the whole
    /// buffer, matching the per-tile call path.
    ///
    /// Channels beyond the watermark's own 3 (RGB) are left untouched,
    /// rather than assuming the target never has more channels than the
    /// watermark buffer it was decoded into.
    pub fn apply<R: Rng + ?Sized>(
        &self,
        data: &mut [u8],
        width: u32,
        height: u32,
        channels: usize,
        bpc: u32,
        block: u32,
        rng: &mut R,
    ) {
        if self.probability == 0.0 || self.opacity == 0.0 {
            return;
        }

        let (mut tile_width, mut tile_height) = (width, height);
        let (mut ntlx, mut ntly) = (1u32, 1u32);
        let (mut rem_x, mut rem_y) = (0u32, 0u32);

        if block > 0 && (width > block || height > block) {
            tile_width = block;
            tile_height = block;
            rem_x = width % tile_width;
            ntlx = width / tile_width + if rem_x == 0 { 0 } else { 1 };
            rem_y = height % tile_height;
            ntly = height / tile_height + if rem_y == 0 { 0 } else { 1 };
        }

        for ty in 0..ntly {
            for tx in 0..ntlx {
                let draw: f32 = rng.gen();
                if draw >= self.probability {
                    continue;
                }

                let mut tw = tile_width;
                let mut th = tile_height;
                if tx == ntlx - 1 && rem_x != 0 {
                    tw = rem_x;
                }
                if ty == ntly - 1 && rem_y != 0 {
                    th = rem_y;
                }

                let xoffset = if tw > self.width {
                    let r: f32 = rng.gen();
                    (r * (tw - self.width) as f32) as u32
                } else {
                    0
                };
                let yoffset = if th > self.height {
                    let r: f32 = rng.gen();
                    (r * (th - self.height) as f32) as u32
                } else {
                    0
                };

                let xlimit = if self.width > tw { tw } else { self.width };
                let ylimit = if self.height > th { th } else { self.height };

                for j in 0..ylimit {
                    for i in 0..xlimit {
                        for k in 0..channels {
                            if k >= 3 {
                                continue;
                            }
                            let row = ty * tile_height + j + yoffset;
                            let col = tx * tile_width + i + xoffset;
                            let id = (row * width * channels as u32 + col * channels as u32 + k as u32) as usize;
                            let wm = self.buffer[(j * self.width * 3 + i * 3 + k as u32) as usize];

                            if bpc == 16 {
                                let byte_idx = id * 2;
                                let cur = u16::from_ne_bytes([data[byte_idx], data[byte_idx + 1]]);
                                let sum = cur as u32 + (wm as u32) * 256;
                                let clamped = sum.min(65535) as u16;
                                let bytes = clamped.to_ne_bytes();
                                data[byte_idx] = bytes[0];
                                data[byte_idx + 1] = bytes[1];
                            } else {
                                let sum = data[id] as u32 + wm as u32;
                                data[id] = sum.min(255) as u8;
                            }
                        }
                    }
                }
            }
        }
    }
}

fn e_to_transform(path: &Path) -> TransformError {
    TransformError::WatermarkLoad(path.display().to_string())
}
