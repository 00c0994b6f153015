//! `Encoder`: turns a processed [`RawTile`] into wire bytes in a chosen codec.
//!
//! Besides the one-shot `compress` path, `EncoderKind` exposes a streaming
//! `begin`/`strip`/`finish` mode (see [`EncodeStream`]) for callers that
//! produce pixel rows incrementally, and `inject_metadata` for splicing an
//! ICC/XMP payload into an already-compressed JPEG/WebP bitstream without
//! re-encoding the pixels.
//!
//! Closed enum rather than a trait object, for the same reason
//! `slide/registry.rs`'s `SlideReaderInner` and `tile::source::SourceImage`
//! are: keeping codec dispatch inherent avoids threading a `dyn` boundary
//! through a path that otherwise never needs one.

use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::tiff::TiffEncoder;
use image::codecs::webp::WebPEncoder;
use image::{ColorType, ExtendedColorType, ImageEncoder};

use crate::error::EncodeError;
use crate::tile::raw_tile::{raw_data_len, Encoding, RawTile, SampleType};

/// Default JPEG quality used when a request doesn't specify one.
pub const DEFAULT_JPEG_QUALITY: u8 = 80;
pub const MIN_JPEG_QUALITY: u8 = 1;
pub const MAX_JPEG_QUALITY: u8 = 100;

pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}

pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// A codec an encoded tile or region may be produced in, with whatever
/// per-codec parameters `configure` has set.
///
/// Only JPEG and AVIF take a quality factor; PNG, WebP (lossless only, per
/// `image`'s codec) and TIFF ignore it.
#[derive(Debug, Clone, Copy)]
pub enum EncoderKind {
    Jpeg { quality: u8 },
    Png,
    Webp,
    Avif { quality: u8 },
    Tiff,
}

impl EncoderKind {
    pub fn jpeg(quality: u8) -> Self {
        EncoderKind::Jpeg {
            quality: clamp_quality(quality),
        }
    }

    pub fn avif(quality: u8) -> Self {
        EncoderKind::Avif {
            quality: clamp_quality(quality),
        }
    }

    /// Apply a new quality factor, a no-op for codecs that don't use one.
    /// Grounded on `Compressor::setQuality`.
    pub fn configure(&mut self, quality: u8) {
        match self {
            EncoderKind::Jpeg { quality: q } | EncoderKind::Avif { quality: q } => {
                *q = clamp_quality(quality);
            }
            EncoderKind::Png | EncoderKind::Webp | EncoderKind::Tiff => {}
        }
    }

    /// Current quality factor, or `0` for codecs with no such notion.
    /// Grounded on `Compressor::getQuality`.
    pub fn quality(&self) -> i32 {
        match self {
            EncoderKind::Jpeg { quality } | EncoderKind::Avif { quality } => *quality as i32,
            EncoderKind::Png | EncoderKind::Webp | EncoderKind::Tiff => 0,
        }
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            EncoderKind::Jpeg { .. } => Encoding::Jpeg,
            EncoderKind::Png => Encoding::Png,
            EncoderKind::Webp => Encoding::Webp,
            EncoderKind::Avif { .. } => Encoding::Avif,
            EncoderKind::Tiff => Encoding::Tiff,
        }
    }

    /// Grounded on `Compressor::getMimeType`.
    pub fn mime_type(&self) -> &'static str {
        self.encoding().mime_type()
    }

    pub fn suffix(&self) -> &'static str {
        self.encoding().suffix()
    }

    /// Whether this codec can hold the given pixel layout, per the codec
    /// validity rules (JPEG: 8-bit, 1 or 3 channels only; PNG: 1-16 bit,
    /// 1-4 channels; WebP/AVIF: 8-bit, 1-4 channels; TIFF: anything the
    /// `RawTile` can already represent).
    pub fn supports_layout(&self, channels: u8, bits_per_channel: u8) -> bool {
        match self {
            EncoderKind::Jpeg { .. } => bits_per_channel == 8 && matches!(channels, 1 | 3),
            EncoderKind::Png => (1..=4).contains(&channels) && bits_per_channel <= 16,
            EncoderKind::Webp | EncoderKind::Avif { .. } => {
                bits_per_channel == 8 && (1..=4).contains(&channels)
            }
            EncoderKind::Tiff => true,
        }
    }

    /// Encode the tile's pixel buffer in this codec, producing the final
    /// wire bytes. Grounded on `Compressor::Compress`.
    pub fn compress(&self, tile: &RawTile) -> Result<Bytes, EncodeError> {
        if tile.encoding != Encoding::Raw {
            return Err(EncodeError::CodecFailure(
                "compress expects a Raw (decoded) tile".to_string(),
            ));
        }
        if !self.supports_layout(tile.channels, tile.bits_per_channel) {
            return Err(EncodeError::UnsupportedLayout {
                encoding: self.encoding().suffix(),
                bpc: tile.bits_per_channel as u32,
                channels: tile.channels as usize,
            });
        }

        match self {
            EncoderKind::Jpeg { quality } => encode_jpeg(tile, *quality),
            EncoderKind::Png => encode_png(tile),
            EncoderKind::Webp => encode_webp(tile),
            EncoderKind::Avif { quality } => encode_avif(tile, *quality),
            EncoderKind::Tiff => encode_tiff(tile),
        }
    }

    /// Begin a streaming encode. `tile` supplies the final geometry up
    /// front (this crate always knows a tile's full dimensions before
    /// encoding starts, unlike a true incremental scanner); `strip_rows` is
    /// an advisory batch-size hint and otherwise unused, since none of this
    /// crate's codec libraries expose row-at-a-time output — [`EncodeStream`]
    /// buffers every `strip` call and performs the real encode at `finish`.
    pub fn begin(&self, tile: &RawTile, strip_rows: u32) -> Result<EncodeStream, EncodeError> {
        if tile.encoding != Encoding::Raw {
            return Err(EncodeError::CodecFailure(
                "begin expects a Raw (decoded) tile".to_string(),
            ));
        }
        if !self.supports_layout(tile.channels, tile.bits_per_channel) {
            return Err(EncodeError::UnsupportedLayout {
                encoding: self.encoding().suffix(),
                bpc: tile.bits_per_channel as u32,
                channels: tile.channels as usize,
            });
        }
        let _ = strip_rows;
        Ok(EncodeStream {
            kind: *self,
            source_path: tile.source_path.clone(),
            resolution: tile.resolution,
            tile_index: tile.tile_index,
            h_angle: tile.h_angle,
            v_angle: tile.v_angle,
            width: tile.width,
            height: tile.height,
            channels: tile.channels,
            bits_per_channel: tile.bits_per_channel,
            sample_type: tile.sample_type,
            rows_expected: tile.height,
            rows_received: 0,
            buf: Vec::with_capacity(raw_data_len(
                tile.width,
                tile.height,
                tile.channels,
                tile.bits_per_channel,
            )),
        })
    }

    /// Splice `icc`/`xmp` byte strings into an already-compressed JPEG or
    /// WebP bitstream without touching the pixel data. `tile.encoding` must
    /// already equal this encoder's encoding (i.e. `tile` holds compressed
    /// bytes, not raw pixels).
    ///
    /// Other codecs reject this outright: PNG/TIFF metadata lives in
    /// different chunk/tag structures this crate doesn't write, and this
    /// crate's AVIF path never embeds ICC/XMP boxes.
    pub fn inject_metadata(
        &self,
        tile: &mut RawTile,
        icc: Option<&[u8]>,
        xmp: Option<&[u8]>,
    ) -> Result<(), EncodeError> {
        if tile.encoding != self.encoding() {
            return Err(EncodeError::MetadataInjection(format!(
                "tile is encoded as {:?}, not {:?}",
                tile.encoding,
                self.encoding()
            )));
        }
        if icc.is_none() && xmp.is_none() {
            return Ok(());
        }
        match self {
            EncoderKind::Jpeg { .. } => {
                tile.data = inject_jpeg_metadata(&tile.data, icc, xmp)?;
                Ok(())
            }
            EncoderKind::Webp => {
                tile.data = inject_webp_metadata(&tile.data, tile.width, tile.height, icc, xmp)?;
                Ok(())
            }
            other => Err(EncodeError::MetadataInjection(format!(
                "{} does not support metadata injection",
                other.encoding().suffix()
            ))),
        }
    }

    /// Fixed leading magic/signature bytes for this codec's container, for
    /// transports that want to flush a header before the body is ready.
    /// Codecs whose container has no fixed-offset magic (a size-prefixed
    /// box precedes it) return an empty slice.
    pub fn header(&self) -> &'static [u8] {
        match self {
            EncoderKind::Jpeg { .. } => &[0xFF, 0xD8],
            EncoderKind::Png => &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A],
            EncoderKind::Webp => b"RIFF",
            EncoderKind::Tiff => b"II*\0",
            EncoderKind::Avif { .. } => &[],
        }
    }

    pub fn header_size(&self) -> usize {
        self.header().len()
    }

    /// Alias kept for parity with the external contract's naming;
    /// identical to [`EncoderKind::encoding`].
    pub fn encoding_kind(&self) -> Encoding {
        self.encoding()
    }
}

/// Row-accumulating streaming handle produced by [`EncoderKind::begin`].
///
/// `strip` appends pixel rows in order; `finish` performs the real
/// whole-buffer encode once every row has arrived.
pub struct EncodeStream {
    kind: EncoderKind,
    source_path: Arc<str>,
    resolution: u32,
    tile_index: u32,
    h_angle: i32,
    v_angle: i32,
    width: u32,
    height: u32,
    channels: u8,
    bits_per_channel: u8,
    sample_type: SampleType,
    rows_expected: u32,
    rows_received: u32,
    buf: Vec<u8>,
}

impl EncodeStream {
    /// Accept `rows` more rows of pixel data. Returns the number of bytes
    /// accepted into the internal accumulator.
    pub fn strip(&mut self, input_rows: &[u8], rows: u32) -> Result<usize, EncodeError> {
        if self.rows_received + rows > self.rows_expected {
            return Err(EncodeError::CodecFailure(format!(
                "strip received {rows} rows but only {} remain",
                self.rows_expected - self.rows_received
            )));
        }
        self.buf.extend_from_slice(input_rows);
        self.rows_received += rows;
        Ok(input_rows.len())
    }

    /// Finish the stream, encoding the fully-accumulated buffer and
    /// returning the wire bytes.
    pub fn finish(self) -> Result<Bytes, EncodeError> {
        if self.rows_received != self.rows_expected {
            return Err(EncodeError::CodecFailure(format!(
                "finish called after {}/{} rows were streamed",
                self.rows_received, self.rows_expected
            )));
        }
        let tile = RawTile::new(
            self.source_path,
            self.resolution,
            self.tile_index,
            self.h_angle,
            self.v_angle,
            self.width,
            self.height,
            self.channels,
            self.bits_per_channel,
            self.sample_type,
            Bytes::from(self.buf),
        );
        self.kind.compress(&tile)
    }
}

/// Splice an APP2 `ICC_PROFILE` marker and/or an APP1 XMP marker
/// immediately after a JPEG bitstream's SOI marker.
fn inject_jpeg_metadata(
    data: &Bytes,
    icc: Option<&[u8]>,
    xmp: Option<&[u8]>,
) -> Result<Bytes, EncodeError> {
    if data.len() < 2 || data[0] != 0xFF || data[1] != 0xD8 {
        return Err(EncodeError::MetadataInjection(
            "not a JPEG bitstream (missing SOI marker)".to_string(),
        ));
    }

    let mut out = Vec::with_capacity(data.len() + 64);
    out.extend_from_slice(&data[..2]);

    if let Some(icc) = icc {
        const ICC_SIG: &[u8] = b"ICC_PROFILE\0";
        let segment_len = 2 + ICC_SIG.len() + 2 + icc.len();
        if segment_len > 0xFFFF {
            return Err(EncodeError::MetadataInjection(
                "ICC profile too large for a single APP2 segment".to_string(),
            ));
        }
        out.push(0xFF);
        out.push(0xE2);
        out.extend_from_slice(&(segment_len as u16).to_be_bytes());
        out.extend_from_slice(ICC_SIG);
        out.push(1); // chunk sequence number
        out.push(1); // total chunk count
        out.extend_from_slice(icc);
    }

    if let Some(xmp) = xmp {
        const XMP_SIG: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";
        let segment_len = 2 + XMP_SIG.len() + xmp.len();
        if segment_len > 0xFFFF {
            return Err(EncodeError::MetadataInjection(
                "XMP packet too large for a single APP1 segment".to_string(),
            ));
        }
        out.push(0xFF);
        out.push(0xE1);
        out.extend_from_slice(&(segment_len as u16).to_be_bytes());
        out.extend_from_slice(XMP_SIG);
        out.extend_from_slice(xmp);
    }

    out.extend_from_slice(&data[2..]);
    Ok(Bytes::from(out))
}

/// Splice `ICCP`/`XMP ` RIFF chunks into a WebP bitstream by adding a VP8X
/// extended-header chunk in front of the existing image data chunk.
///
/// Only handles the common case this crate's own encoder produces (a bare
/// `VP8 `/`VP8L` chunk, no pre-existing `VP8X`); a bitstream that already
/// carries one is rejected rather than merged.
fn inject_webp_metadata(
    data: &Bytes,
    width: u32,
    height: u32,
    icc: Option<&[u8]>,
    xmp: Option<&[u8]>,
) -> Result<Bytes, EncodeError> {
    if data.len() < 12 || &data[0..4] != b"RIFF" || &data[8..12] != b"WEBP" {
        return Err(EncodeError::MetadataInjection(
            "not a WebP bitstream (missing RIFF/WEBP header)".to_string(),
        ));
    }
    if data.len() >= 16 && &data[12..16] == b"VP8X" {
        return Err(EncodeError::MetadataInjection(
            "WebP metadata injection does not support a bitstream with an existing VP8X chunk"
                .to_string(),
        ));
    }

    let image_chunk = &data[12..];

    let mut flags: u8 = 0;
    if icc.is_some() {
        flags |= 0x20;
    }
    if xmp.is_some() {
        flags |= 0x04;
    }
    let w_minus1 = width.saturating_sub(1).to_le_bytes();
    let h_minus1 = height.saturating_sub(1).to_le_bytes();
    let mut vp8x_payload = [0u8; 10];
    vp8x_payload[0] = flags;
    vp8x_payload[4..7].copy_from_slice(&w_minus1[..3]);
    vp8x_payload[7..10].copy_from_slice(&h_minus1[..3]);

    let mut out = Vec::with_capacity(data.len() + 64);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&[0u8; 4]); // total size, patched below
    out.extend_from_slice(b"WEBP");
    out.extend_from_slice(b"VP8X");
    out.extend_from_slice(&10u32.to_le_bytes());
    out.extend_from_slice(&vp8x_payload);

    if let Some(icc) = icc {
        out.extend_from_slice(b"ICCP");
        out.extend_from_slice(&(icc.len() as u32).to_le_bytes());
        out.extend_from_slice(icc);
        if icc.len() % 2 == 1 {
            out.push(0);
        }
    }
    if let Some(xmp) = xmp {
        out.extend_from_slice(b"XMP ");
        out.extend_from_slice(&(xmp.len() as u32).to_le_bytes());
        out.extend_from_slice(xmp);
        if xmp.len() % 2 == 1 {
            out.push(0);
        }
    }

    out.extend_from_slice(image_chunk);

    let riff_size = (out.len() - 8) as u32;
    out[4..8].copy_from_slice(&riff_size.to_le_bytes());

    Ok(Bytes::from(out))
}

fn color_type_for(
    channels: u8,
    bits_per_channel: u8,
) -> Result<(ColorType, ExtendedColorType), EncodeError> {
    match (channels, bits_per_channel) {
        (1, 8) => Ok((ColorType::L8, ExtendedColorType::L8)),
        (1, 16) => Ok((ColorType::L16, ExtendedColorType::L16)),
        (2, 8) => Ok((ColorType::La8, ExtendedColorType::La8)),
        (2, 16) => Ok((ColorType::La16, ExtendedColorType::La16)),
        (3, 8) => Ok((ColorType::Rgb8, ExtendedColorType::Rgb8)),
        (3, 16) => Ok((ColorType::Rgb16, ExtendedColorType::Rgb16)),
        (4, 8) => Ok((ColorType::Rgba8, ExtendedColorType::Rgba8)),
        (4, 16) => Ok((ColorType::Rgba16, ExtendedColorType::Rgba16)),
        _ => Err(EncodeError::UnsupportedLayout {
            encoding: "image",
            bpc: bits_per_channel as u32,
            channels: channels as usize,
        }),
    }
}

fn encode_jpeg(tile: &RawTile, quality: u8) -> Result<Bytes, EncodeError> {
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
    encoder
        .encode(
            &tile.data,
            tile.width,
            tile.height,
            if tile.channels == 1 {
                ExtendedColorType::L8
            } else {
                ExtendedColorType::Rgb8
            },
        )
        .map_err(|e| EncodeError::CodecFailure(e.to_string()))?;
    Ok(Bytes::from(out))
}

fn encode_png(tile: &RawTile) -> Result<Bytes, EncodeError> {
    let (_, extended) = color_type_for(tile.channels, tile.bits_per_channel)?;
    let mut out = Vec::new();
    let encoder = PngEncoder::new(&mut out);
    encoder
        .write_image(&tile.data, tile.width, tile.height, extended)
        .map_err(|e| EncodeError::CodecFailure(e.to_string()))?;
    Ok(Bytes::from(out))
}

fn encode_webp(tile: &RawTile) -> Result<Bytes, EncodeError> {
    let (_, extended) = color_type_for(tile.channels, tile.bits_per_channel)?;
    let mut out = Vec::new();
    let encoder = WebPEncoder::new_lossless(&mut out);
    encoder
        .encode(&tile.data, tile.width, tile.height, extended)
        .map_err(|e| EncodeError::CodecFailure(e.to_string()))?;
    Ok(Bytes::from(out))
}

fn encode_tiff(tile: &RawTile) -> Result<Bytes, EncodeError> {
    let (_, extended) = color_type_for(tile.channels, tile.bits_per_channel)?;
    let mut out = Vec::new();
    let encoder = TiffEncoder::new(Cursor::new(&mut out));
    encoder
        .write_image(&tile.data, tile.width, tile.height, extended)
        .map_err(|e| EncodeError::CodecFailure(e.to_string()))?;
    Ok(Bytes::from(out))
}

/// AVIF encoding via `ravif` directly: the `image` crate's own AVIF codec
/// isn't in this crate's dependency set.
fn encode_avif(tile: &RawTile, quality: u8) -> Result<Bytes, EncodeError> {
    use rgb::RGBA8;

    if tile.sample_type != SampleType::FixedPoint || tile.bits_per_channel != 8 {
        return Err(EncodeError::UnsupportedLayout {
            encoding: "avif",
            bpc: tile.bits_per_channel as u32,
            channels: tile.channels as usize,
        });
    }

    let pixels: Vec<RGBA8> = match tile.channels {
        1 => tile.data.iter().map(|&g| RGBA8::new(g, g, g, 255)).collect(),
        3 => tile
            .data
            .chunks_exact(3)
            .map(|c| RGBA8::new(c[0], c[1], c[2], 255))
            .collect(),
        4 => tile
            .data
            .chunks_exact(4)
            .map(|c| RGBA8::new(c[0], c[1], c[2], c[3]))
            .collect(),
        _ => {
            return Err(EncodeError::UnsupportedLayout {
                encoding: "avif",
                bpc: 8,
                channels: tile.channels as usize,
            })
        }
    };

    let img = ravif::Img::new(pixels.as_slice(), tile.width as usize, tile.height as usize);
    let encoder = ravif::Encoder::new()
        .with_quality(quality as f32)
        .with_alpha_quality(quality as f32)
        .with_speed(6);

    let result = encoder
        .encode_rgba(img)
        .map_err(|e| EncodeError::CodecFailure(e.to_string()))?;
    Ok(Bytes::from(result.avif_file))
}
