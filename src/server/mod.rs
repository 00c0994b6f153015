//! HTTP server layer for pyrastream.
//!
//! This module provides the HTTP API for serving tiles and regions of
//! gigapixel pyramidal images.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │  GET /healthz   GET /info/*path                                 │
//! │  GET /tile/*path   GET /region/*path   GET /viewer/*path        │
//! │                                                                 │
//! │  ┌─────────────┐           ┌─────────────────────────────────┐  │
//! │  │  handlers   │           │             routes              │  │
//! │  │ (requests)  │           │         (router config)         │  │
//! │  └─────────────┘           └─────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod handlers;
pub mod routes;
pub mod viewer;

pub use handlers::{
    healthz_handler, info_handler, region_handler, tile_handler, AppState, ErrorResponse,
    HealthResponse, LevelResponse, RegionQueryParams, SourceInfoResponse, TileQueryParams,
};
pub use routes::{create_router, RouterConfig};
pub use viewer::generate_demo_html;
