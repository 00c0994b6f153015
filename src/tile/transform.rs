//! The 17-step per-request image processing pipeline.
//!
//! Each private helper below implements one step, run in a fixed order
//! (CIELAB→sRGB, normalize-or-float-promote, hillshade, color twist,
//! gamma/log, invert, colormap, convolution, contrast+quantize, resize,
//! channel flatten, greyscale, binary/Otsu, histogram equalization, flip,
//! rotate, watermark). Every step is gated by its own view/option flag; the
//! sequence itself never changes, steps that don't apply to a given request
//! are no-ops.
//!
//! Per-pixel dispatch on bit depth and sample type happens once, up front,
//! by decoding into a typed [`Samples`] buffer; every step thereafter
//! operates on a concretely-typed `Vec`.

use std::f32::consts::PI;

use bytes::Bytes;
use rand::Rng;

use crate::config::InterpolationKind;
use crate::error::TransformError;
use crate::tile::raw_tile::{ColorSpace, RawTile, SampleType};
use crate::tile::view::{Colormap, Flip, View};
use crate::tile::watermark::Watermark;

/// D65 white point.
const D65_X0: f64 = 95.0470;
const D65_Y0: f64 = 100.0;
const D65_Z0: f64 = 108.8827;

/// CIEXYZ → linear sRGB matrix.
const SRGB_MATRIX: [[f64; 3]; 3] = [
    [3.2406255, -1.537208, -0.4986286],
    [-0.9689307, 1.8757561, 0.0415175],
    [0.0557101, -0.2040211, 1.0569959],
];

/// How the channel-count-reducing / bi-level steps of the pipeline should
/// behave for a given request. Neither has a dedicated `View` flag since
/// each is driven by a separate request parameter (band selection, bitonal
/// output), so they're threaded through explicitly instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryMode {
    Disabled,
    /// Compute the threshold from the tile's own histogram via Otsu's method.
    Otsu,
    Threshold(u8),
}

/// Per-request knobs the pipeline needs beyond what `View` already carries.
pub struct PipelineOptions<'a> {
    pub interpolation: InterpolationKind,
    /// Target pixel size for step 10's resize; `None` or equal to the
    /// buffer's current size makes that step a no-op.
    pub target_size: Option<(u32, u32)>,
    /// Number of channels to keep in step 11's flatten; `None` or `>=`
    /// the buffer's channel count makes that step a no-op.
    pub bands: Option<u8>,
    pub binary: BinaryMode,
    /// Per-channel calibration range for step 2's normalize. Falls back to
    /// the natural range of the source bit depth when `None`, since
    /// `SourceImageDescriptor` doesn't carry calibrated min/max here.
    pub channel_min: Option<&'a [f32]>,
    pub channel_max: Option<&'a [f32]>,
    /// Block size for step 17's watermark tiling; `0` watermarks the whole
    /// buffer as one block.
    pub watermark_block: u32,
}

impl<'a> Default for PipelineOptions<'a> {
    fn default() -> Self {
        Self {
            interpolation: InterpolationKind::Bilinear,
            target_size: None,
            bands: None,
            binary: BinaryMode::Disabled,
            channel_min: None,
            channel_max: None,
            watermark_block: 0,
        }
    }
}

/// Typed pixel storage: each representation is a distinct variant so every
/// step operates on a concrete numeric type rather than a raw byte buffer.
enum Samples {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    F32(Vec<f32>),
}

struct Buffer {
    width: u32,
    height: u32,
    channels: u8,
    samples: Samples,
}

impl Buffer {
    fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    fn len_samples(&self) -> usize {
        self.pixels() * self.channels as usize
    }

    fn bits_per_channel(&self) -> u8 {
        match &self.samples {
            Samples::U8(_) => 8,
            Samples::U16(_) => 16,
            Samples::U32(_) => 32,
            Samples::F32(_) => 32,
        }
    }

    fn sample_type(&self) -> SampleType {
        match &self.samples {
            Samples::F32(_) => SampleType::FloatingPoint,
            _ => SampleType::FixedPoint,
        }
    }

    /// Each step calls these only after putting the buffer into the
    /// representation it expects; a mismatch means a step was wired to the
    /// wrong point in the pipeline, not a condition a caller can hit.
    fn as_u8(&self) -> &[u8] {
        match &self.samples {
            Samples::U8(v) => v,
            _ => unreachable!("pipeline step expected 8-bit samples"),
        }
    }

    fn as_u8_mut(&mut self) -> &mut Vec<u8> {
        match &mut self.samples {
            Samples::U8(v) => v,
            _ => unreachable!("pipeline step expected 8-bit samples"),
        }
    }

    fn as_f32(&self) -> &[f32] {
        match &self.samples {
            Samples::F32(v) => v,
            _ => unreachable!("pipeline step expected floating point samples"),
        }
    }

    fn as_f32_mut(&mut self) -> &mut Vec<f32> {
        match &mut self.samples {
            Samples::F32(v) => v,
            _ => unreachable!("pipeline step expected floating point samples"),
        }
    }
}

fn decode_buffer(tile: &RawTile) -> Result<Buffer, TransformError> {
    let expected = crate::tile::raw_tile::raw_data_len(
        tile.width,
        tile.height,
        tile.channels,
        tile.bits_per_channel,
    );
    if tile.data.len() != expected {
        return Err(TransformError::BufferSizeMismatch {
            actual: tile.data.len(),
            expected,
            width: tile.width,
            height: tile.height,
            channels: tile.channels as usize,
            bpc: tile.bits_per_channel as u32,
        });
    }

    let samples = match (tile.bits_per_channel, tile.sample_type) {
        (8, SampleType::FixedPoint) => Samples::U8(tile.data.to_vec()),
        (16, SampleType::FixedPoint) => Samples::U16(
            tile.data
                .chunks_exact(2)
                .map(|c| u16::from_ne_bytes([c[0], c[1]]))
                .collect(),
        ),
        (32, SampleType::FixedPoint) => Samples::U32(
            tile.data
                .chunks_exact(4)
                .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
        (32, SampleType::FloatingPoint) => Samples::F32(
            tile.data
                .chunks_exact(4)
                .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
        _ => {
            return Err(TransformError::UnsupportedChannels {
                channels: tile.channels as usize,
                operation: "decode_buffer: unsupported bpc/sample_type combination",
            })
        }
    };

    Ok(Buffer {
        width: tile.width,
        height: tile.height,
        channels: tile.channels,
        samples,
    })
}

fn encode_buffer(buf: Buffer, template: &RawTile) -> RawTile {
    let bpc = buf.bits_per_channel();
    let sample_type = buf.sample_type();
    let data: Bytes = match buf.samples {
        Samples::U8(v) => Bytes::from(v),
        Samples::U16(v) => {
            let mut out = Vec::with_capacity(v.len() * 2);
            for s in v {
                out.extend_from_slice(&s.to_ne_bytes());
            }
            Bytes::from(out)
        }
        Samples::U32(v) => {
            let mut out = Vec::with_capacity(v.len() * 4);
            for s in v {
                out.extend_from_slice(&s.to_ne_bytes());
            }
            Bytes::from(out)
        }
        Samples::F32(v) => {
            let mut out = Vec::with_capacity(v.len() * 4);
            for s in v {
                out.extend_from_slice(&s.to_ne_bytes());
            }
            Bytes::from(out)
        }
    };

    RawTile {
        source_path: template.source_path.clone(),
        resolution: template.resolution,
        tile_index: template.tile_index,
        h_angle: template.h_angle,
        v_angle: template.v_angle,
        width: buf.width,
        height: buf.height,
        channels: buf.channels,
        bits_per_channel: bpc,
        sample_type,
        encoding: template.encoding,
        quality: template.quality,
        timestamp: template.timestamp,
        padded: template.padded,
        data,
    }
}

/// Run the full fixed-order pipeline over `tile`, driven by `view` and
/// `opts`. `color_space` comes from the source descriptor since `RawTile`
/// itself carries no colour-space tag.
pub fn apply_pipeline<R: Rng + ?Sized>(
    tile: RawTile,
    color_space: ColorSpace,
    view: &View,
    opts: &PipelineOptions,
    watermark: Option<&Watermark>,
    rng: &mut R,
) -> Result<RawTile, TransformError> {
    let mut buf = decode_buffer(&tile)?;

    // Step 1: CIELAB -> sRGB.
    if color_space == ColorSpace::CieLab && buf.channels == 3 && buf.bits_per_channel() == 8 {
        lab_to_srgb(&mut buf)?;
    }

    // Step 2: normalize-or-float-promote.
    if view.float_processing() {
        normalize(&mut buf, opts.channel_min, opts.channel_max)?;
    } else {
        scale_to_8bit(&mut buf)?;
    }

    // Step 3: hillshade.
    if view.shaded {
        shade(&mut buf, view.shade[0], view.shade[1])?;
    }

    // Step 4: color twist.
    if !view.ctw.is_empty() {
        twist(&mut buf, &view.ctw)?;
    }

    // Step 5: gamma / log.
    if view.gamma < 0.0 {
        log_transform(&mut buf)?;
    } else if view.gamma != 1.0 {
        gamma(&mut buf, view.gamma)?;
    }

    // Step 6: invert.
    if view.inverted {
        invert(&mut buf)?;
    }

    // Step 7: colormap.
    if view.cmapped {
        cmap(&mut buf, view.cmap)?;
    }

    // Step 8: convolution.
    if !view.convolution.is_empty() {
        convolution(&mut buf, &view.convolution)?;
    }

    // Step 9: contrast + quantize to 8 bit.
    if matches!(buf.samples, Samples::F32(_)) {
        contrast(&mut buf, view.contrast)?;
    }

    // Step 10: resize.
    if let Some((w, h)) = opts.target_size {
        if w != buf.width || h != buf.height {
            resize(&mut buf, w, h, opts.interpolation)?;
        }
    }

    // Step 11: channel flatten.
    if let Some(bands) = opts.bands {
        if bands < buf.channels {
            flatten(&mut buf, bands)?;
        }
    }

    // Step 12: greyscale.
    if view.greyscale {
        greyscale(&mut buf)?;
    }

    // Step 13: binary / Otsu.
    match opts.binary {
        BinaryMode::Disabled => {}
        BinaryMode::Otsu => {
            let histogram = compute_histogram(&buf)?;
            let threshold = otsu_threshold(&histogram);
            binary(&mut buf, threshold)?;
        }
        BinaryMode::Threshold(t) => binary(&mut buf, t)?,
    }

    // Step 14: histogram equalization.
    if view.equalization {
        let histogram = compute_histogram(&buf)?;
        equalize(&mut buf, &histogram)?;
    }

    // Step 15: flip.
    if view.flip != Flip::None {
        flip(&mut buf, view.flip)?;
    }

    // Step 16: rotate.
    if view.rotation != 0.0 {
        rotate(&mut buf, view.rotation)?;
    }

    // Step 17: watermark.
    if let Some(wm) = watermark {
        let (width, height, channels) = (buf.width, buf.height, buf.channels as usize);
        let data = buf.as_u8_mut();
        wm.apply(data, width, height, channels, 8, opts.watermark_block, rng);
    }

    Ok(encode_buffer(buf, &tile))
}

/// Step 1. CIELAB → CIEXYZ → linear sRGB → gamma-encoded sRGB.
fn lab_to_srgb(buf: &mut Buffer) -> Result<(), TransformError> {
    let data = buf.as_u8_mut();
    for px in data.chunks_exact_mut(3) {
        let l = px[0] as f64 / 2.55;
        let a = px[1] as i8 as f64;
        let b = px[2] as i8 as f64;

        let (y, cby) = if l < 8.0 {
            let y = (l * D65_Y0) / 903.3;
            (y, 7.787 * (y / D65_Y0) + 16.0 / 116.0)
        } else {
            let cby = (l + 16.0) / 116.0;
            (D65_Y0 * cby * cby * cby, cby)
        };

        let tmp_x = a / 500.0 + cby;
        let x = if tmp_x < 0.2069 {
            D65_X0 * (tmp_x - 0.13793) / 7.787
        } else {
            D65_X0 * tmp_x * tmp_x * tmp_x
        };

        let tmp_z = cby - b / 200.0;
        let z = if tmp_z < 0.2069 {
            D65_Z0 * (tmp_z - 0.13793) / 7.787
        } else {
            D65_Z0 * tmp_z * tmp_z * tmp_z
        };

        let (x, y, z) = (x / 100.0, y / 100.0, z / 100.0);

        let mut rgb = [0.0f64; 3];
        for (i, row) in SRGB_MATRIX.iter().enumerate() {
            rgb[i] = x * row[0] + y * row[1] + z * row[2];
        }

        for v in rgb.iter_mut() {
            *v = v.max(0.0);
            *v = if *v <= 0.0031308 {
                *v * 12.92
            } else {
                1.055 * v.powf(1.0 / 2.4) - 0.055
            };
            *v = (*v * 255.0).min(255.0);
        }

        px[0] = rgb[0] as u8;
        px[1] = rgb[1] as u8;
        px[2] = rgb[2] as u8;
    }
    Ok(())
}

/// Step 2 (float path). Rescales each channel from `[min, max]` to `[0, 1]`,
/// promoting the buffer to `f32` samples; non-finite float inputs map to 0.
fn normalize(
    buf: &mut Buffer,
    channel_min: Option<&[f32]>,
    channel_max: Option<&[f32]>,
) -> Result<(), TransformError> {
    let channels = buf.channels as usize;
    let natural_max = (1u64 << buf.bits_per_channel().min(32)) as f32 - 1.0;

    let min_for = |c: usize| channel_min.and_then(|m| m.get(c).copied()).unwrap_or(0.0);
    let max_for =
        |c: usize| channel_max.and_then(|m| m.get(c).copied()).unwrap_or(natural_max);

    let len = buf.len_samples();
    let mut out = vec![0.0f32; len];

    macro_rules! normalize_into {
        ($src:expr, $is_float:expr) => {
            for c in 0..channels {
                let minc = min_for(c);
                let diffc = max_for(c) - minc;
                let invdiffc = if diffc.abs() > 1e-30 { 1.0 / diffc } else { 1e30 };
                let mut n = c;
                while n < len {
                    let raw = $src[n] as f32;
                    out[n] = if $is_float && !raw.is_finite() {
                        0.0
                    } else {
                        (raw - minc) * invdiffc
                    };
                    n += channels;
                }
            }
        };
    }

    match &buf.samples {
        Samples::U8(v) => normalize_into!(v, false),
        Samples::U16(v) => normalize_into!(v, false),
        Samples::U32(v) => normalize_into!(v, false),
        Samples::F32(v) => normalize_into!(v, true),
    }

    buf.samples = Samples::F32(out);
    Ok(())
}

/// Step 2 (non-float path). Drops wider integer samples down to 8 bits by
/// truncating the low bits.
fn scale_to_8bit(buf: &mut Buffer) -> Result<(), TransformError> {
    buf.samples = match std::mem::replace(&mut buf.samples, Samples::U8(Vec::new())) {
        Samples::U8(v) => Samples::U8(v),
        Samples::U16(v) => Samples::U8(v.into_iter().map(|s| (s >> 8) as u8).collect()),
        Samples::U32(v) => Samples::U8(v.into_iter().map(|s| (s >> 16) as u8).collect()),
        Samples::F32(v) => Samples::F32(v),
    };
    Ok(())
}

/// Step 3. Requires a 3-channel float buffer (a normal-vector map);
/// collapses to a single hillshade channel lit from `(h_angle, v_angle)`.
fn shade(buf: &mut Buffer, h_angle: i32, v_angle: i32) -> Result<(), TransformError> {
    if buf.channels != 3 {
        return Err(TransformError::UnsupportedChannels {
            channels: buf.channels as usize,
            operation: "shade",
        });
    }

    let a = (h_angle as f64 * 2.0 * PI as f64) / 360.0;
    let s_y = a.cos();
    let mut s_x = (1.0 - s_y * s_y).sqrt();
    if h_angle > 180 {
        s_x = -s_x;
    }
    let a = (v_angle as f64 * 2.0 * PI as f64) / 360.0;
    let s_z = -a.sin();
    let norm = (s_x * s_x + s_y * s_y + s_z * s_z).sqrt();
    let s_x = s_x / norm;
    let s_y = s_y / norm;
    let s_z = s_z / norm;

    let input = buf.as_f32();
    let np = buf.pixels();
    let mut out = vec![0.0f32; np];

    for k in 0..np {
        let n = k * 3;
        let (o_x, o_y, o_z) = if input[n] == 0.0 && input[n + 1] == 0.0 && input[n + 2] == 0.0 {
            (0.0, 0.0, 0.0)
        } else {
            (
                -(input[n] - 0.5) * 2.0,
                -(input[n + 1] - 0.5) * 2.0,
                -(input[n + 2] - 0.5) * 2.0,
            )
        };

        let dot = (s_x as f32 * o_x) + (s_y as f32 * o_y) + (s_z as f32 * o_z);
        let dot = (0.5 * dot).clamp(0.0, 1.0);
        out[k] = dot;
    }

    buf.samples = Samples::F32(out);
    buf.channels = 1;
    Ok(())
}

/// Step 4. Applies an arbitrary channel-mixing matrix: each output channel
/// is a weighted sum of input channels.
fn twist(buf: &mut Buffer, matrix: &[Vec<f32>]) -> Result<(), TransformError> {
    let input_channels = buf.channels as usize;
    let output_channels = matrix.len();
    // Rows longer than the input's channel count are silently truncated,
    // matching `row_sizes[k] = min(matrix[k].size(), input_channels)`.
    let row_sizes: Vec<usize> = matrix.iter().map(|row| row.len().min(input_channels)).collect();

    let input = buf.as_f32();
    let np = buf.pixels();
    let mut out = vec![0.0f32; np * output_channels];

    for i in 0..np {
        let in_base = i * input_channels;
        let out_base = i * output_channels;
        for (k, row) in matrix.iter().enumerate() {
            let mut value = 0.0f32;
            for j in 0..row_sizes[k] {
                let m = row[j];
                if m != 0.0 {
                    let p = input[in_base + j];
                    value += if m == 1.0 { p } else { p * m };
                }
            }
            out[out_base + k] = value;
        }
    }

    buf.samples = Samples::F32(out);
    buf.channels = output_channels as u8;
    Ok(())
}

/// Step 5 (gamma branch). `out = max(in, 0).powf(g)`.
fn gamma(buf: &mut Buffer, g: f32) -> Result<(), TransformError> {
    let data = buf.as_f32_mut();
    for v in data.iter_mut() {
        *v = v.max(0.0).powf(g);
    }
    Ok(())
}

/// Step 5 (log branch). Logarithmic scaling of normalized samples.
fn log_transform(buf: &mut Buffer) -> Result<(), TransformError> {
    let max = 255.0f32;
    let scale = 1.0 / (max + 1.0).ln();
    let data = buf.as_f32_mut();
    for v in data.iter_mut() {
        let scaled = *v * max;
        *v = scale * (1.0 + scaled).ln();
    }
    Ok(())
}

/// Step 6. Inverts normalized samples: `out = 1 - in`.
fn invert(buf: &mut Buffer) -> Result<(), TransformError> {
    let data = buf.as_f32_mut();
    for v in data.iter_mut() {
        *v = 1.0 - *v;
    }
    Ok(())
}

/// Step 7. Maps a single-channel value into a 3-channel colour via one of
/// the fixed HOT/COLD/JET/RED/GREEN/BLUE piecewise-linear functions.
fn cmap(buf: &mut Buffer, colormap: Colormap) -> Result<(), TransformError> {
    let input_channels = buf.channels as usize;
    let input = buf.as_f32();
    let np = buf.pixels();
    let mut out = vec![0.0f32; np * 3];

    const MAX3: f32 = 1.0 / 3.0;
    const MAX8: f32 = 1.0 / 8.0;

    for i in 0..np {
        let value = input[i * input_channels];
        let o = &mut out[i * 3..i * 3 + 3];
        match colormap {
            Colormap::Hot => {
                if value > 1.0 {
                    o[0] = 1.0;
                    o[1] = 1.0;
                    o[2] = 1.0;
                } else if value <= 0.0 {
                    o[0] = 0.0;
                    o[1] = 0.0;
                    o[2] = 0.0;
                } else if value < MAX3 {
                    o[0] = 3.0 * value;
                    o[1] = 0.0;
                    o[2] = 0.0;
                } else if value < 2.0 * MAX3 {
                    o[0] = 1.0;
                    o[1] = 3.0 * value - 1.0;
                    o[2] = 0.0;
                } else if value < 1.0 {
                    o[0] = 1.0;
                    o[1] = 1.0;
                    o[2] = 3.0 * value - 2.0;
                } else {
                    o[0] = 1.0;
                    o[1] = 1.0;
                    o[2] = 1.0;
                }
            }
            Colormap::Cold => {
                if value > 1.0 {
                    o[0] = 1.0;
                    o[1] = 1.0;
                    o[2] = 1.0;
                } else if value <= 0.0 {
                    o[0] = 0.0;
                    o[1] = 0.0;
                    o[2] = 0.0;
                } else if value < MAX3 {
                    o[0] = 0.0;
                    o[1] = 0.0;
                    o[2] = 3.0 * value;
                } else if value < 2.0 * MAX3 {
                    o[0] = 0.0;
                    o[1] = 3.0 * value - 1.0;
                    o[2] = 1.0;
                } else if value < 1.0 {
                    o[0] = 3.0 * value - 2.0;
                    o[1] = 1.0;
                    o[2] = 1.0;
                } else {
                    o[0] = 1.0;
                    o[1] = 1.0;
                    o[2] = 1.0;
                }
            }
            Colormap::Jet => {
                if value < 0.0 {
                    o[0] = 0.0;
                    o[1] = 0.0;
                    o[2] = 0.0;
                } else if value < MAX8 {
                    o[0] = 0.0;
                    o[1] = 0.0;
                    o[2] = 4.0 * value + 0.5;
                } else if value < 3.0 * MAX8 {
                    o[0] = 0.0;
                    o[1] = 4.0 * value - 0.5;
                    o[2] = 1.0;
                } else if value < 5.0 * MAX8 {
                    o[0] = 4.0 * value - 1.5;
                    o[1] = 1.0;
                    o[2] = 2.5 - 4.0 * value;
                } else if value < 7.0 * MAX8 {
                    o[0] = 1.0;
                    o[1] = 3.5 - 4.0 * value;
                    o[2] = 0.0;
                } else if value < 1.0 {
                    o[0] = 4.5 - 4.0 * value;
                    o[1] = 0.0;
                    o[2] = 0.0;
                } else {
                    o[0] = 0.5;
                    o[1] = 0.0;
                    o[2] = 0.0;
                }
            }
            Colormap::Red => {
                o[0] = value;
                o[1] = 0.0;
                o[2] = 0.0;
            }
            Colormap::Green => {
                o[0] = 0.0;
                o[1] = value;
                o[2] = 0.0;
            }
            Colormap::Blue => {
                o[0] = 0.0;
                o[1] = 0.0;
                o[2] = value;
            }
        }
    }

    buf.samples = Samples::F32(out);
    buf.channels = 3;
    Ok(())
}

/// Step 8. Edge-wrapping square convolution kernel, normalized by the sum
/// of its coefficients when positive. Kernel side must be odd and at most 5.
fn convolution(buf: &mut Buffer, kernel: &[f32]) -> Result<(), TransformError> {
    let side = (kernel.len() as f64).sqrt().round() as usize;
    if side == 0 || side * side != kernel.len() || side % 2 == 0 || side > 5 {
        return Err(TransformError::InvalidKernel { size: kernel.len() });
    }
    let half_side = (side / 2) as i64;
    let total: f32 = kernel.iter().sum();

    let channels = buf.channels as usize;
    let (width, height) = (buf.width as i64, buf.height as i64);
    let input = buf.as_f32();
    let mut out = vec![0.0f32; input.len()];

    for y in 0..height {
        for x in 0..width {
            for c in 0..channels {
                let mut v = 0.0f64;
                for fy in 0..side as i64 {
                    let iny = (y + fy - half_side).rem_euclid(height);
                    for fx in 0..side as i64 {
                        let inx = (x + fx - half_side).rem_euclid(width);
                        let i = (inx + iny * width) as usize * channels + c;
                        v += input[i] as f64 * kernel[(fy as usize * side) + fx as usize] as f64;
                    }
                }
                if total > 0.0 {
                    v /= total as f64;
                }
                let n = (y * width + x) as usize * channels + c;
                out[n] = v as f32;
            }
        }
    }

    buf.samples = Samples::F32(out);
    Ok(())
}

/// Step 9. Scales normalized samples by `contrast` and quantizes to 8-bit,
/// clamping to `[0, 255]`.
fn contrast(buf: &mut Buffer, contrast: f32) -> Result<(), TransformError> {
    const MAX8: f32 = 255.0;
    let cmax = MAX8 * contrast;
    let input = buf.as_f32();
    let out: Vec<u8> = input
        .iter()
        .map(|&v| {
            let scaled = v * cmax;
            if scaled < MAX8 {
                if scaled < 0.0 {
                    0
                } else {
                    scaled as u8
                }
            } else {
                MAX8 as u8
            }
        })
        .collect();
    buf.samples = Samples::U8(out);
    Ok(())
}

/// Step 10. Nearest-neighbour or bilinear resampling to the target
/// dimensions. `InterpolationKind::Bicubic` degrades to bilinear: the enum
/// value is accepted but no distinct bicubic kernel is implemented.
fn resize(
    buf: &mut Buffer,
    target_width: u32,
    target_height: u32,
    kind: InterpolationKind,
) -> Result<(), TransformError> {
    let channels = buf.channels as usize;
    let (width, height) = (buf.width, buf.height);
    let input = buf.as_u8();

    let out = match kind {
        InterpolationKind::Nearest => {
            nearest_neighbour(input, width, height, channels, target_width, target_height)
        }
        InterpolationKind::Bilinear | InterpolationKind::Bicubic => {
            bilinear(input, width, height, channels, target_width, target_height)
        }
    };

    buf.samples = Samples::U8(out);
    buf.width = target_width;
    buf.height = target_height;
    Ok(())
}

fn nearest_neighbour(
    input: &[u8],
    width: u32,
    height: u32,
    channels: usize,
    target_width: u32,
    target_height: u32,
) -> Vec<u8> {
    let xscale = width as f32 / target_width as f32;
    let yscale = height as f32 / target_height as f32;
    let mut out = vec![0u8; target_width as usize * target_height as usize * channels];

    for j in 0..target_height {
        let jj = (j as f32 * yscale).floor() as u32;
        for i in 0..target_width {
            let ii = (i as f32 * xscale).floor() as u32;
            let src = (ii + jj * width) as usize * channels;
            let dst = (i + j * target_width) as usize * channels;
            out[dst..dst + channels].copy_from_slice(&input[src..src + channels]);
        }
    }
    out
}

fn bilinear(
    input: &[u8],
    width: u32,
    height: u32,
    channels: usize,
    target_width: u32,
    target_height: u32,
) -> Vec<u8> {
    let max = ((width as u64 * height as u64) - 1) as usize * channels;
    let xscale = width as f32 / target_width as f32;
    let yscale = height as f32 / target_height as f32;
    let mut out = vec![0u8; target_width as usize * target_height as usize * channels];

    for j in 0..target_height {
        let jscale = j as f32 * yscale;
        let jj = jscale.floor() as i64;
        let c = (jj + 1) as f32 - jscale;
        let d = jscale - jj as f32;

        for i in 0..target_width {
            let iscale = i as f32 * xscale;
            let ii = iscale.floor() as i64;

            let jj_w = jj as i64 * width as i64;
            let p11 = (channels as i64 * (ii + jj_w)) as usize;
            let mut p12 = (channels as i64 * (ii + jj_w + width as i64)) as usize;
            let mut p21 = (channels as i64 * (ii + 1 + jj_w)) as usize;
            let mut p22 = (channels as i64 * (ii + 1 + jj_w + width as i64)) as usize;
            p12 = p12.min(max);
            p21 = p21.min(max);
            p22 = p22.min(max);

            let a = (ii + 1) as f32 - iscale;
            let b = iscale - ii as f32;

            let dst = (j as usize * target_width as usize + i as usize) * channels;
            for k in 0..channels {
                let tx = input[p11 + k] as f32 * a + input[p21 + k] as f32 * b;
                let ty = input[p12 + k] as f32 * a + input[p22 + k] as f32 * b;
                out[dst + k] = (c * tx + d * ty) as u8;
            }
        }
    }
    out
}

/// Step 11. Drops all but the first `bands` channels, packing the kept
/// samples contiguously.
fn flatten(buf: &mut Buffer, bands: u8) -> Result<(), TransformError> {
    let channels = buf.channels as usize;
    let bands = bands as usize;
    let gap = channels - bands;
    let data = buf.as_u8_mut();
    let np = buf.pixels();

    let mut ni = 0;
    let mut no = 0;
    for _ in 0..np {
        for _ in 0..bands {
            data[ni] = data[no];
            ni += 1;
            no += 1;
        }
        no += gap;
    }
    data.truncate(ni);
    buf.channels = bands as u8;
    Ok(())
}

/// Step 12. BT.709-ish fixed-point luma from 3-channel 8-bit pixels.
fn greyscale(buf: &mut Buffer) -> Result<(), TransformError> {
    if buf.channels != 3 || buf.bits_per_channel() != 8 {
        return Ok(());
    }
    let np = buf.pixels();
    let data = buf.as_u8();
    let mut out = vec![0u8; np];
    for i in 0..np {
        let n = i * 3;
        let r = data[n] as u32;
        let g = data[n + 1] as u32;
        let b = data[n + 2] as u32;
        out[i] = ((1254097 * r + 2462056 * g + 478151 * b) >> 22) as u8;
    }
    buf.samples = Samples::U8(out);
    buf.channels = 1;
    Ok(())
}

/// Step 13 helper. Per-pixel average across channels, binned into 256
/// buckets; by this point in the pipeline the buffer is always 8-bit.
fn compute_histogram(buf: &Buffer) -> Result<Vec<u32>, TransformError> {
    let channels = buf.channels as usize;
    let data = buf.as_u8();
    let mut histogram = vec![0u32; 256];
    for px in data.chunks_exact(channels) {
        let sum: u32 = px.iter().map(|&v| v as u32).sum();
        let value = ((sum as f32 / channels as f32).round() as usize).min(255);
        histogram[value] += 1;
    }
    Ok(histogram)
}

/// Step 13. Otsu's between-class variance maximization over a histogram.
fn otsu_threshold(histogram: &[u32]) -> u8 {
    let bits = histogram.len();
    let mut sum = 0.0f64;
    let mut np = 0u64;
    for (n, &count) in histogram.iter().enumerate() {
        np += count as u64;
        sum += n as f64 * count as f64;
    }

    let mut wb = 0.0f64;
    let mut sumb = 0.0f64;
    let mut max_diff = 0.0f64;
    let mut otsu = 0u8;
    for n in 0..bits {
        wb += histogram[n] as f64;
        if wb == 0.0 {
            continue;
        }
        let wf = np as f64 - wb;
        if wf == 0.0 {
            break;
        }
        sumb += n as f64 * histogram[n] as f64;
        let mb = sumb / wb;
        let mf = (sum - sumb) / wf;
        let diff = wb * wf * (mb - mf) * (mb - mf);
        if diff > max_diff {
            otsu = n as u8;
            max_diff = diff;
        }
    }
    otsu
}

/// Step 13. Forces greyscale first, then thresholds against a fixed or
/// Otsu-computed value.
fn binary(buf: &mut Buffer, threshold: u8) -> Result<(), TransformError> {
    if buf.bits_per_channel() != 8 {
        return Ok(());
    }
    greyscale(buf)?;
    let data = buf.as_u8_mut();
    for v in data.iter_mut() {
        *v = if *v < threshold { 0 } else { 255 };
    }
    Ok(())
}

/// Step 14. Histogram equalization via the cumulative distribution function.
fn equalize(buf: &mut Buffer, histogram: &[u32]) -> Result<(), TransformError> {
    let bits = histogram.len();
    let mut n0 = 0usize;
    while n0 < bits && histogram[n0] == 0 {
        n0 += 1;
    }
    if n0 >= bits {
        return Ok(());
    }

    let mut cdf = vec![0.0f32; bits];
    cdf[0] = histogram[0] as f32;
    for i in 1..bits {
        cdf[i] = cdf[i - 1] + histogram[i] as f32;
    }

    let scale = (bits as f32 - 1.0) / cdf[bits - 1];
    let np = buf.pixels() as f32;
    let cdfmin = cdf[n0] / np;
    for v in cdf.iter_mut() {
        *v = (scale * (*v - cdfmin)).round();
    }

    let data = buf.as_u8_mut();
    for v in data.iter_mut() {
        // A float-to-u8 cast saturates rather than wrapping, so a pre-n0
        // negative CDF entry maps to 0 rather than wrapping around.
        *v = cdf[*v as usize].clamp(0.0, 255.0) as u8;
    }
    Ok(())
}

/// Step 15. Mirrors the buffer vertically or horizontally.
fn flip(buf: &mut Buffer, orientation: Flip) -> Result<(), TransformError> {
    let channels = buf.channels as usize;
    let (width, height) = (buf.width as usize, buf.height as usize);
    let data = buf.as_u8();
    let mut out = vec![0u8; data.len()];

    match orientation {
        Flip::Vertical => {
            for j in 0..height {
                let src_row = (height - 1 - j) * width * channels;
                let dst_row = j * width * channels;
                out[dst_row..dst_row + width * channels]
                    .copy_from_slice(&data[src_row..src_row + width * channels]);
            }
        }
        Flip::Horizontal => {
            for j in 0..height {
                for i in 0..width {
                    let src = (j * width + (width - 1 - i)) * channels;
                    let dst = (j * width + i) * channels;
                    out[dst..dst + channels].copy_from_slice(&data[src..src + channels]);
                }
            }
        }
        Flip::None => unreachable!("caller only invokes flip when orientation != None"),
    }

    buf.samples = Samples::U8(out);
    Ok(())
}

/// Step 16. Only multiples of 90 degrees are supported; other angles leave
/// the buffer unchanged.
fn rotate(buf: &mut Buffer, angle: f64) -> Result<(), TransformError> {
    let normalized = ((angle % 360.0) + 360.0) % 360.0;
    if normalized as i64 % 90 != 0 || normalized as i64 % 360 == 0 {
        return Ok(());
    }

    let channels = buf.channels as usize;
    let (width, height) = (buf.width as i64, buf.height as i64);
    let data = buf.as_u8();
    let mut out = vec![0u8; data.len()];

    if normalized as i64 == 90 {
        let mut n = 0usize;
        for i in 0..width {
            for j in (0..height).rev() {
                let index = (width * j + i) as usize * channels;
                out[n..n + channels].copy_from_slice(&data[index..index + channels]);
                n += channels;
            }
        }
    } else if normalized as i64 == 270 {
        for i in (0..width).rev() {
            let mut n = ((width - 1 - i) * height) as usize * channels;
            for j in 0..height {
                let index = (width * j + i) as usize * channels;
                out[n..n + channels].copy_from_slice(&data[index..index + channels]);
                n += channels;
            }
        }
    } else {
        // 180
        let np = (width * height) as usize;
        let mut n = 0usize;
        for i in (0..np as i64).rev() {
            let index = i as usize * channels;
            out[n..n + channels].copy_from_slice(&data[index..index + channels]);
            n += channels;
        }
    }

    buf.samples = Samples::U8(out);
    if normalized as i64 % 180 == 90 {
        std::mem::swap(&mut buf.width, &mut buf.height);
    }
    Ok(())
}
