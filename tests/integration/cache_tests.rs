//! Cache effectiveness integration tests.
//!
//! Tests verify:
//! - The slide registry opens each source at most once across repeated
//!   requests (singleflight + LRU reader cache)
//! - Concurrent requests for the same and different tiles all succeed
//! - A tile cache sized far below the pyramid's total bytes still serves
//!   every tile correctly (eviction, not failure)

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use pyrastream::server::{create_router, AppState, RouterConfig};
use pyrastream::slide::{SlideRegistry, SlideSource};
use pyrastream::tile::{Jp2kCache, RegionComposer, TileCache, TileManager, DEFAULT_JPEG_QUALITY};

use super::test_utils::{build_test_router, create_tiff_with_jpeg_tile, is_valid_jpeg, MockSlideSource};

fn tile_uri(slide_id: &str, tile: u32) -> String {
    format!("/tile/{slide_id}?resolution=0&tile={tile}&encoding=jpeg")
}

fn build_router_with_cache_bytes<S>(source: S, cache_bytes: usize) -> Router
where
    S: SlideSource + 'static,
    S::Reader: pyrastream::io::RangeReader + 'static,
{
    let registry = Arc::new(SlideRegistry::new(source));
    let cache = Arc::new(TileCache::new(cache_bytes));
    let jp2k_cache = Arc::new(Jp2kCache::new(500));
    let manager = Arc::new(TileManager::new(
        Arc::clone(&registry),
        jp2k_cache,
        Arc::clone(&cache),
        None,
        true,
    ));
    let composer = Arc::new(RegionComposer::new(Arc::clone(&registry), Arc::clone(&manager)));

    let app_state = AppState {
        registry,
        manager,
        composer,
        cache_max_age: 3600,
        max_output_dimension: 8192,
        allow_upscaling: true,
        default_jpeg_quality: DEFAULT_JPEG_QUALITY,
        interpolation_kind: pyrastream::config::InterpolationKind::Bilinear,
    };

    create_router(app_state, RouterConfig::new().with_tracing(false))
}

// =============================================================================
// Slide Registry Reuse
// =============================================================================

#[tokio::test]
async fn test_slide_opened_once_across_repeated_tile_requests() {
    let tiff_data = create_tiff_with_jpeg_tile();
    let source = MockSlideSource::new().with_slide("test.tif", tiff_data);
    let tracker = source.clone();
    let router = build_test_router(source);

    for tile in [0u32, 1, 2] {
        let request = Request::builder()
            .uri(tile_uri("test.tif", tile))
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(
        tracker.get_request_count("test.tif").await,
        1,
        "the registry should only open the source once, reusing it for every tile"
    );
}

#[tokio::test]
async fn test_different_slides_opened_independently() {
    let source = MockSlideSource::new()
        .with_slide("slide1.tif", create_tiff_with_jpeg_tile())
        .with_slide("slide2.tif", create_tiff_with_jpeg_tile());
    let tracker = source.clone();
    let router = build_test_router(source);

    for slide in ["slide1.tif", "slide2.tif"] {
        let request = Request::builder()
            .uri(tile_uri(slide, 0))
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(tracker.get_request_count("slide1.tif").await, 1);
    assert_eq!(tracker.get_request_count("slide2.tif").await, 1);
}

// =============================================================================
// Concurrent Request Handling
// =============================================================================

#[tokio::test]
async fn test_concurrent_requests_for_same_tile_singleflight() {
    let tiff_data = create_tiff_with_jpeg_tile();
    let source = MockSlideSource::new().with_slide("test.tif", tiff_data);
    let tracker = source.clone();
    let router = Arc::new(build_test_router(source));

    let mut handles = Vec::new();
    for i in 0..5 {
        let router_clone = Arc::clone(&router);
        handles.push(tokio::spawn(async move {
            let request = Request::builder()
                .uri(tile_uri("test.tif", 0))
                .body(Body::empty())
                .unwrap();
            let response = (*router_clone).clone().oneshot(request).await.unwrap();
            (i, response.status())
        }));
    }

    for handle in handles {
        let (idx, status) = handle.await.unwrap();
        assert_eq!(status, StatusCode::OK, "concurrent request {idx} should succeed");
    }

    assert_eq!(
        tracker.get_request_count("test.tif").await,
        1,
        "singleflight should collapse concurrent opens of the same source into one"
    );
}

#[tokio::test]
async fn test_concurrent_requests_for_different_tiles() {
    let tiff_data = create_tiff_with_jpeg_tile();
    let source = MockSlideSource::new().with_slide("test.tif", tiff_data);
    let router = Arc::new(build_test_router(source));

    let mut handles = Vec::new();
    for tile in 0..9u32 {
        let router_clone = Arc::clone(&router);
        handles.push(tokio::spawn(async move {
            let request = Request::builder()
                .uri(tile_uri("test.tif", tile))
                .body(Body::empty())
                .unwrap();
            let response = (*router_clone).clone().oneshot(request).await.unwrap();
            let body = response.into_body().collect().await.unwrap().to_bytes();
            (tile, is_valid_jpeg(&body))
        }));
    }

    for handle in handles {
        let (tile, valid) = handle.await.unwrap();
        assert!(valid, "concurrent tile {tile} should be a valid JPEG");
    }
}

// =============================================================================
// Cache Capacity
// =============================================================================

#[tokio::test]
async fn test_tiles_served_correctly_with_undersized_cache() {
    let tiff_data = create_tiff_with_jpeg_tile();
    let source = MockSlideSource::new().with_slide("test.tif", tiff_data);
    // Far smaller than the full 8x6 tile grid's encoded bytes: every insert
    // evicts the previous tenant, but correctness must not depend on a hit.
    let router = build_router_with_cache_bytes(source, 8 * 1024);

    for tile in 0..48u32 {
        let request = Request::builder()
            .uri(tile_uri("test.tif", tile))
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(
            response.status(),
            StatusCode::OK,
            "tile {tile} should succeed even with a cache too small to hold it"
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(is_valid_jpeg(&body), "tile {tile} should be a valid JPEG");
    }
}

// =============================================================================
// Tile Re-request Returns Equivalent Bytes
// =============================================================================

#[tokio::test]
async fn test_repeated_tile_request_returns_identical_bytes() {
    let tiff_data = create_tiff_with_jpeg_tile();
    let source = MockSlideSource::new().with_slide("test.tif", tiff_data);
    let router = build_test_router(source);

    let request1 = Request::builder()
        .uri(tile_uri("test.tif", 4))
        .body(Body::empty())
        .unwrap();
    let response1 = router.clone().oneshot(request1).await.unwrap();
    let body1 = response1.into_body().collect().await.unwrap().to_bytes();

    let request2 = Request::builder()
        .uri(tile_uri("test.tif", 4))
        .body(Body::empty())
        .unwrap();
    let response2 = router.oneshot(request2).await.unwrap();
    let body2 = response2.into_body().collect().await.unwrap().to_bytes();

    assert_eq!(body1, body2, "a cache hit must return the same bytes as the original encode");
}
