//! HTTP request handlers for the pyrastream tile/region API.
//!
//! This is a minimal stand-in transport, not a wire-dialect implementation:
//! callers pass `View`/`PipelineOptions` fields directly as flat query
//! parameters rather than through an IIP/IIIF/Zoomify/DeepZoom grammar.
//!
//! # Endpoints
//!
//! - `GET /healthz` - liveness check
//! - `GET /info/*path` - source image geometry and pyramid levels
//! - `GET /tile/*path` - one pyramid tile
//! - `GET /region/*path` - an arbitrary-viewport region, fully processed

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::config::InterpolationKind;
use crate::error::WsiError;
use crate::slide::SlideRegistry;
use crate::slide::SlideSource;
use crate::tile::{
    clamp_quality, open_source_image, BinaryMode, Colormap, EncoderKind, Flip, PipelineOptions,
    RegionComposer, TileManager, View,
};

// =============================================================================
// Application State
// =============================================================================

/// Shared application state: everything a handler needs to serve a request.
pub struct AppState<S: SlideSource> {
    pub registry: Arc<SlideRegistry<S>>,
    pub manager: Arc<TileManager<S>>,
    pub composer: Arc<RegionComposer<S>>,
    pub cache_max_age: u32,
    /// `<= 0` means unbounded.
    pub max_output_dimension: i64,
    pub allow_upscaling: bool,
    /// JPEG/AVIF quality used when a request's `quality` query param is absent.
    pub default_jpeg_quality: u8,
    /// Resampling filter used for region resizes, server-wide (spec §6.5).
    pub interpolation_kind: InterpolationKind,
}

impl<S: SlideSource> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            manager: Arc::clone(&self.manager),
            composer: Arc::clone(&self.composer),
            cache_max_age: self.cache_max_age,
            max_output_dimension: self.max_output_dimension,
            allow_upscaling: self.allow_upscaling,
            default_jpeg_quality: self.default_jpeg_quality,
            interpolation_kind: self.interpolation_kind,
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Query parameters for `GET /tile/*path`.
#[derive(Debug, Deserialize)]
pub struct TileQueryParams {
    /// Pyramid resolution level (0 = highest resolution).
    #[serde(default)]
    pub resolution: usize,

    /// Flat tile index within the level, row-major: `y * tiles_across + x`.
    #[serde(default)]
    pub tile: u32,

    /// Horizontal pan angle in degrees, for sources that carry one.
    #[serde(default)]
    pub ha: i32,

    /// Vertical pan angle in degrees.
    #[serde(default = "default_v_angle")]
    pub va: i32,

    /// Output codec: `jpeg`, `png`, `webp`, `avif`, `tiff`.
    #[serde(default = "default_encoding")]
    pub encoding: String,

    /// Quality factor for codecs that use one (JPEG/AVIF). Falls back to
    /// `AppState::default_jpeg_quality` when omitted.
    #[serde(default)]
    pub quality: Option<u8>,
}

fn default_v_angle() -> i32 {
    90
}

fn default_encoding() -> String {
    "jpeg".to_string()
}

/// Query parameters for `GET /region/*path`, the `View` fields flattened.
#[derive(Debug, Deserialize)]
pub struct RegionQueryParams {
    #[serde(default)]
    pub view_left: f64,
    #[serde(default)]
    pub view_top: f64,
    #[serde(default = "one_f64")]
    pub view_width: f64,
    #[serde(default = "one_f64")]
    pub view_height: f64,

    /// Requested output width in pixels; `0` derives it from height/aspect.
    #[serde(default)]
    pub width: u32,
    /// Requested output height in pixels; `0` derives it from width/aspect.
    #[serde(default)]
    pub height: u32,

    #[serde(default)]
    pub rotation: f64,
    #[serde(default)]
    pub ha: i32,
    #[serde(default = "default_v_angle")]
    pub va: i32,

    #[serde(default = "one_f32")]
    pub gamma: f32,
    #[serde(default = "one_f32")]
    pub contrast: f32,
    #[serde(default)]
    pub inverted: bool,
    #[serde(default)]
    pub greyscale: bool,
    #[serde(default)]
    pub equalization: bool,

    #[serde(default)]
    pub cmapped: bool,
    #[serde(default = "default_cmap")]
    pub cmap: String,

    #[serde(default = "default_flip")]
    pub flip: String,

    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default)]
    pub quality: Option<u8>,
}

fn one_f64() -> f64 {
    1.0
}

fn one_f32() -> f32 {
    1.0
}

fn default_cmap() -> String {
    "hot".to_string()
}

fn default_flip() -> String {
    "none".to_string()
}

fn parse_colormap(name: &str) -> Result<Colormap, WsiError> {
    match name {
        "hot" => Ok(Colormap::Hot),
        "cold" => Ok(Colormap::Cold),
        "jet" => Ok(Colormap::Jet),
        "blue" => Ok(Colormap::Blue),
        "green" => Ok(Colormap::Green),
        "red" => Ok(Colormap::Red),
        other => Err(WsiError::BadRequest(format!("unknown cmap: {other}"))),
    }
}

fn parse_flip(name: &str) -> Result<Flip, WsiError> {
    match name {
        "none" => Ok(Flip::None),
        "horizontal" => Ok(Flip::Horizontal),
        "vertical" => Ok(Flip::Vertical),
        other => Err(WsiError::BadRequest(format!("unknown flip: {other}"))),
    }
}

fn parse_encoder(name: &str, quality: u8) -> Result<EncoderKind, WsiError> {
    match name {
        "jpeg" | "jpg" => Ok(EncoderKind::jpeg(quality)),
        "png" => Ok(EncoderKind::Png),
        "webp" => Ok(EncoderKind::Webp),
        "avif" => Ok(EncoderKind::avif(quality)),
        "tiff" | "tif" => Ok(EncoderKind::Tiff),
        other => Err(WsiError::BadRequest(format!("unknown encoding: {other}"))),
    }
}

// =============================================================================
// Response Types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct LevelResponse {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Serialize)]
pub struct SourceInfoResponse {
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub channels: u8,
    pub bits_per_channel: u8,
    pub max_quality_layers: u32,
    pub levels: Vec<LevelResponse>,
}

// =============================================================================
// Error mapping
// =============================================================================

/// Maps the core's semantic error taxonomy to HTTP status codes. The core
/// never formats HTTP itself; this is the only place a `WsiError` becomes a
/// status code and JSON body.
impl IntoResponse for WsiError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            WsiError::SourceNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            WsiError::SourceUnsupported(_) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_source")
            }
            WsiError::SourceCorrupt(_) => (StatusCode::UNPROCESSABLE_ENTITY, "source_corrupt"),
            WsiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            WsiError::ResourceExhausted(_) => (StatusCode::PAYLOAD_TOO_LARGE, "resource_exhausted"),
            WsiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

pub async fn healthz_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `GET /info/*path` - geometry and pyramid levels for a source image.
pub async fn info_handler<S: SlideSource>(
    State(state): State<AppState<S>>,
    Path(path): Path<String>,
) -> Result<Json<SourceInfoResponse>, WsiError>
where
    S::Reader: crate::io::RangeReader + 'static,
{
    let source = open_source_image(&state.registry, state.manager.jp2k_cache(), &path).await?;
    let descriptor = source.descriptor();

    Ok(Json(SourceInfoResponse {
        width: descriptor.width,
        height: descriptor.height,
        tile_width: descriptor.tile_width,
        tile_height: descriptor.tile_height,
        channels: descriptor.channels,
        bits_per_channel: descriptor.bits_per_channel,
        max_quality_layers: descriptor.max_quality_layers,
        levels: descriptor
            .level_widths
            .iter()
            .zip(descriptor.level_heights.iter())
            .map(|(&width, &height)| LevelResponse { width, height })
            .collect(),
    }))
}

/// `GET /tile/*path?resolution=&tile=&ha=&va=&encoding=&quality=`
pub async fn tile_handler<S: SlideSource>(
    State(state): State<AppState<S>>,
    Path(path): Path<String>,
    Query(query): Query<TileQueryParams>,
) -> Result<Response, WsiError>
where
    S::Reader: crate::io::RangeReader + 'static,
{
    let source = open_source_image(&state.registry, state.manager.jp2k_cache(), &path).await?;
    let descriptor = source.descriptor();
    let level_width = descriptor
        .level_widths
        .get(query.resolution)
        .copied()
        .unwrap_or(descriptor.width);
    let tiles_across = level_width.div_ceil(descriptor.tile_width).max(1);
    let tile_x = query.tile % tiles_across;
    let tile_y = query.tile / tiles_across;

    let quality = clamp_quality(query.quality.unwrap_or(state.default_jpeg_quality));
    let encoder = parse_encoder(&query.encoding, quality)?;
    let mut rng = rand::thread_rng();
    let opts = PipelineOptions {
        interpolation: state.interpolation_kind,
        ..PipelineOptions::default()
    };

    let tile = state
        .manager
        .get_tile(
            &path,
            query.resolution,
            tile_x,
            tile_y,
            query.ha,
            query.va,
            Some(encoder),
            &View::new(),
            &opts,
            &mut rng,
        )
        .await?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, tile.encoding.mime_type())
        .header(
            header::CACHE_CONTROL,
            format!("public, max-age={}", state.cache_max_age),
        )
        .body(axum::body::Body::from(tile.data))
        .unwrap())
}

/// `GET /region/*path?view_left=&view_top=&view_width=&view_height=&width=&height=...`
pub async fn region_handler<S: SlideSource>(
    State(state): State<AppState<S>>,
    Path(path): Path<String>,
    Query(query): Query<RegionQueryParams>,
) -> Result<Response, WsiError>
where
    S::Reader: crate::io::RangeReader + 'static,
{
    let source = open_source_image(&state.registry, state.manager.jp2k_cache(), &path).await?;
    let descriptor = source.descriptor();

    let mut view = View::new();
    view.set_image_size(descriptor.width, descriptor.height);
    view.set_max_resolutions(descriptor.level_count() as u32);
    view.set_view_left(query.view_left)?;
    view.set_view_top(query.view_top)?;
    view.set_view_width(query.view_width)?;
    view.set_view_height(query.view_height)?;
    view.set_request_width(query.width);
    view.set_request_height(query.height);
    view.set_max_size(state.max_output_dimension);
    view.rotation = query.rotation;
    view.h_angle = query.ha;
    view.v_angle = query.va;
    view.gamma = query.gamma;
    view.contrast = query.contrast;
    view.inverted = query.inverted;
    view.greyscale = query.greyscale;
    view.equalization = query.equalization;
    view.cmapped = query.cmapped;
    view.cmap = parse_colormap(&query.cmap)?;
    view.flip = parse_flip(&query.flip)?;
    view.allow_upscaling = state.allow_upscaling;

    let resolution = view.resolve_level(&descriptor.level_widths, &descriptor.level_heights);
    let (x, y) = (view.pixel_left(), view.pixel_top());
    let (w, h) = (view.pixel_width(), view.pixel_height());

    let target_size = view.request_size();
    if state.max_output_dimension > 0
        && (target_size.0 as i64 > state.max_output_dimension
            || target_size.1 as i64 > state.max_output_dimension)
    {
        return Err(crate::error::ViewError::OutputTooLarge {
            width: target_size.0,
            height: target_size.1,
            max: state.max_output_dimension,
        }
        .into());
    }

    let opts = PipelineOptions {
        target_size: Some(target_size),
        binary: BinaryMode::Disabled,
        interpolation: state.interpolation_kind,
        ..PipelineOptions::default()
    };

    let mut rng = rand::thread_rng();
    let processed = state
        .composer
        .get_region(
            &path,
            resolution,
            view.h_angle,
            view.v_angle,
            x,
            y,
            w,
            h,
            &view,
            &opts,
            &mut rng,
        )
        .await?;

    let quality = clamp_quality(query.quality.unwrap_or(state.default_jpeg_quality));
    let encoder = parse_encoder(&query.encoding, quality)?;
    let encoded = encoder.compress(&processed).map_err(WsiError::from)?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, encoder.mime_type())
        .header(
            header::CACHE_CONTROL,
            format!("public, max-age={}", state.cache_max_age),
        )
        .body(axum::body::Body::from(encoded))
        .unwrap())
}

// =============================================================================
// Tests
// =============================================================================
