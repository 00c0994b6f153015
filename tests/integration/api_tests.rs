//! API integration tests for tile retrieval and error handling.
//!
//! Tests verify:
//! - Tile retrieval for generic pyramidal TIFF
//! - Error cases (missing slide, invalid coordinates, unsupported format)
//! - HTTP response codes and headers

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use super::test_utils::{
    build_test_router, create_strip_tiff, create_tiff_with_jpeg_tile,
    create_tiff_with_lzw_compression, is_valid_jpeg, MockSlideSource,
};

fn tile_uri(slide_id: &str) -> String {
    format!("/tile/{slide_id}?resolution=0&tile=0&encoding=jpeg")
}

// =============================================================================
// Basic Tile Retrieval
// =============================================================================

#[tokio::test]
async fn test_tile_retrieval_success() {
    let tiff_data = create_tiff_with_jpeg_tile();
    let source = MockSlideSource::new().with_slide("test.tif", tiff_data);
    let router = build_test_router(source);

    let request = Request::builder()
        .uri(tile_uri("test.tif"))
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "image/jpeg"
    );
    assert!(response.headers().contains_key("cache-control"));

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(is_valid_jpeg(&body), "Response should be a valid JPEG");
}

#[tokio::test]
async fn test_tile_retrieval_with_quality() {
    let tiff_data = create_tiff_with_jpeg_tile();
    let source = MockSlideSource::new().with_slide("test.tif", tiff_data);
    let router = build_test_router(source);

    let request = Request::builder()
        .uri(format!("{}&quality=50", tile_uri("test.tif")))
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(is_valid_jpeg(&body));
}

#[tokio::test]
async fn test_tile_retrieval_out_of_range_quality_is_clamped() {
    // quality is clamped to [1, 100] rather than rejected (see clamp_quality).
    let tiff_data = create_tiff_with_jpeg_tile();
    let source = MockSlideSource::new().with_slide("test.tif", tiff_data);
    let router = build_test_router(source);

    let request = Request::builder()
        .uri(format!("{}&quality=0", tile_uri("test.tif")))
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// =============================================================================
// Error Cases - Missing Slide
// =============================================================================

#[tokio::test]
async fn test_slide_not_found() {
    let source = MockSlideSource::new();
    let router = build_test_router(source);

    let request = Request::builder()
        .uri(tile_uri("nonexistent.tif"))
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["error"], "not_found");
}

// =============================================================================
// Error Cases - Invalid Coordinates
// =============================================================================

#[tokio::test]
async fn test_invalid_level_is_rejected() {
    // Only level 0 exists; the format reader surfaces out-of-range levels
    // as a corrupt/invalid source rather than silently clamping.
    let tiff_data = create_tiff_with_jpeg_tile();
    let source = MockSlideSource::new().with_slide("test.tif", tiff_data);
    let router = build_test_router(source);

    let request = Request::builder()
        .uri("/tile/test.tif?resolution=10&tile=0&encoding=jpeg")
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_tile_out_of_bounds_is_rejected() {
    let tiff_data = create_tiff_with_jpeg_tile();
    let source = MockSlideSource::new().with_slide("test.tif", tiff_data);
    let router = build_test_router(source);

    let request = Request::builder()
        .uri("/tile/test.tif?resolution=0&tile=100000&encoding=jpeg")
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

// =============================================================================
// Error Cases - Unsupported Format
// =============================================================================

#[tokio::test]
async fn test_unsupported_compression_lzw() {
    let tiff_data = create_tiff_with_lzw_compression();
    let source = MockSlideSource::new().with_slide("lzw.tif", tiff_data);
    let router = build_test_router(source);

    let request = Request::builder()
        .uri(tile_uri("lzw.tif"))
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["error"], "unsupported_source");
}

#[tokio::test]
async fn test_unsupported_strip_organization() {
    let tiff_data = create_strip_tiff();
    let source = MockSlideSource::new().with_slide("strip.tif", tiff_data);
    let router = build_test_router(source);

    let request = Request::builder()
        .uri(tile_uri("strip.tif"))
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

// =============================================================================
// Health Endpoint
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let source = MockSlideSource::new();
    let router = build_test_router(source);

    let request = Request::builder()
        .uri("/healthz")
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert!(health["version"].is_string());
}

// =============================================================================
// Source Info Endpoint
// =============================================================================

#[tokio::test]
async fn test_info_endpoint() {
    let tiff_data = create_tiff_with_jpeg_tile();
    let source = MockSlideSource::new().with_slide("test.tif", tiff_data);
    let router = build_test_router(source);

    let request = Request::builder()
        .uri("/info/test.tif")
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let info: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(info["width"], 2048);
    assert_eq!(info["height"], 1536);
}

// =============================================================================
// Multiple Tiles / Multiple Slides
// =============================================================================

#[tokio::test]
async fn test_multiple_tiles_same_slide() {
    let tiff_data = create_tiff_with_jpeg_tile();
    let source = MockSlideSource::new().with_slide("test.tif", tiff_data);
    let router = build_test_router(source);

    for tile in [0u32, 1, 8, 9] {
        let request = Request::builder()
            .uri(format!(
                "/tile/test.tif?resolution=0&tile={tile}&encoding=jpeg"
            ))
            .body(Body::empty())
            .unwrap();

        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "tile {tile} should succeed");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(is_valid_jpeg(&body), "tile {tile} should be valid JPEG");
    }
}

#[tokio::test]
async fn test_multiple_slides() {
    let source = MockSlideSource::new()
        .with_slide("slide1.tif", create_tiff_with_jpeg_tile())
        .with_slide("slide2.tif", create_tiff_with_jpeg_tile());
    let router = build_test_router(source);

    let request1 = Request::builder()
        .uri(tile_uri("slide1.tif"))
        .body(Body::empty())
        .unwrap();
    let response1 = router.clone().oneshot(request1).await.unwrap();
    assert_eq!(response1.status(), StatusCode::OK);

    let request2 = Request::builder()
        .uri(tile_uri("slide2.tif"))
        .body(Body::empty())
        .unwrap();
    let response2 = router.oneshot(request2).await.unwrap();
    assert_eq!(response2.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_slide_id_with_special_chars() {
    let tiff_data = create_tiff_with_jpeg_tile();
    let source = MockSlideSource::new().with_slide("my_slide-2024.tif", tiff_data);
    let router = build_test_router(source);

    let request = Request::builder()
        .uri(tile_uri("my_slide-2024.tif"))
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
