//! Router configuration for pyrastream.
//!
//! This module defines the HTTP routes and applies CORS/tracing middleware.
//! There is no authentication layer here; callers that need access control
//! put it in front (a reverse proxy, a gateway) rather than in this crate.
//!
//! # Route Structure
//!
//! ```text
//! /healthz              - Liveness check
//! /info/{*path}         - Source image geometry and pyramid levels
//! /tile/{*path}         - One pyramid tile
//! /region/{*path}       - An arbitrary-viewport region, fully processed
//! /viewer/{*path}       - Minimal static demo page
//! ```
//!
//! # Example
//!
//! ```ignore
//! use pyrastream::server::routes::{create_router, RouterConfig};
//! use pyrastream::server::handlers::AppState;
//!
//! let router = create_router(app_state, RouterConfig::default());
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::time::Duration;

use axum::{routing::get, Router};
use http::header::CONTENT_TYPE;
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{healthz_handler, info_handler, region_handler, tile_handler, AppState};
use super::viewer::generate_demo_html;
use crate::slide::SlideSource;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin).
    pub cors_origins: Option<Vec<String>>,

    /// `Cache-Control: max-age` applied to tile/region responses, in seconds.
    pub cache_max_age: u32,

    /// Whether to enable request tracing.
    pub enable_tracing: bool,
}

impl Default for RouterConfig {
    /// Defaults: any CORS origin, 1 hour cache max-age, tracing enabled.
    fn default() -> Self {
        Self {
            cors_origins: None,
            cache_max_age: 3600,
            enable_tracing: true,
        }
    }
}

impl RouterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests. Pass `None`
    /// (or don't call this method) to allow any origin.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Allow any CORS origin.
    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    /// Set the `Cache-Control` max-age in seconds.
    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Build the complete Axum router.
pub fn create_router<S>(app_state: AppState<S>, config: RouterConfig) -> Router
where
    S: SlideSource + 'static,
    S::Reader: crate::io::RangeReader + 'static,
{
    let cors = build_cors_layer(&config);

    let router = Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/info/{*path}", get(info_handler::<S>))
        .route("/tile/{*path}", get(tile_handler::<S>))
        .route("/region/{*path}", get(region_handler::<S>))
        .route("/viewer/{*path}", get(viewer_handler))
        .with_state(app_state)
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Serve the static demo page for the slide identified by the wildcard path.
async fn viewer_handler(
    axum::extract::Path(path): axum::extract::Path<String>,
) -> axum::response::Html<String> {
    axum::response::Html(generate_demo_html(&path))
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(86400));

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
