//! Slide Registry for managing slide lifecycle and caching.
//!
//! The registry provides:
//! - LRU caching of opened slide readers to avoid re-parsing metadata
//! - Singleflight pattern to prevent duplicate opens for the same slide
//! - Format auto-detection when opening slides
//! - Block caching for efficient I/O
//!
//! # Example
//!
//! ```ignore
//! use pyrastream::slide::{SlideRegistry, S3SlideSource};
//! use pyrastream::io::create_s3_client;
//!
//! // Create S3 source
//! let client = create_s3_client(None).await;
//! let source = S3SlideSource::new(client, "my-bucket".to_string());
//!
//! // Create registry
//! let registry = SlideRegistry::new(source);
//!
//! // Get a slide (opens and caches on first access)
//! let slide = registry.get_slide("path/to/slide.svs").await?;
//!
//! // Read a tile
//! let tile = slide.read_tile(0, 0, 0).await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use tokio::sync::{Mutex, Notify, RwLock};

use crate::error::{FormatError, IoError, TiffError};
use crate::format::{detect_format, GenericTiffReader, SlideFormat, SvsReader};
use crate::io::{BlockCache, RangeReader, DEFAULT_BLOCK_SIZE};

use super::reader::{LevelInfo, SlideReader};

// =============================================================================
// Configuration
// =============================================================================

/// Default capacity for slide cache (number of slides).
const DEFAULT_SLIDE_CACHE_CAPACITY: usize = 100;

/// Default capacity for block cache per slide (number of blocks).
const DEFAULT_BLOCK_CACHE_CAPACITY: usize = 100;

// =============================================================================
// SlideSource Trait
// =============================================================================

/// Trait for creating range readers from slide identifiers.
///
/// This abstraction allows the registry to work with different storage backends
/// (S3, local files, etc.) without being tied to a specific implementation.
#[async_trait]
pub trait SlideSource: Send + Sync {
    /// The type of range reader this source creates.
    type Reader: RangeReader + 'static;

    /// Create a range reader for the given slide identifier.
    ///
    /// # Arguments
    /// * `slide_id` - Unique identifier for the slide (e.g., S3 key)
    ///
    /// # Returns
    /// A range reader for accessing the slide's bytes.
    async fn create_reader(&self, slide_id: &str) -> Result<Self::Reader, IoError>;
}

// =============================================================================
// CachedSlide
// =============================================================================

/// A slide that has been opened and cached.
///
/// This holds both the parsed slide structure and the underlying reader
/// (wrapped in a BlockCache for efficient I/O).
pub struct CachedSlide<R: RangeReader + 'static> {
    /// The detected format of this slide
    format: SlideFormat,

    /// The underlying reader with block caching
    reader: Arc<BlockCache<R>>,

    /// The slide reader (either SVS or generic TIFF)
    inner: SlideReaderInner,
}

/// Internal enum to hold format-specific readers.
///
/// We use an enum instead of trait objects because `SlideReader::read_tile`
/// is generic over the reader type, making the trait not object-safe.
enum SlideReaderInner {
    Svs(SvsReader),
    GenericTiff(GenericTiffReader),
}

impl<R: RangeReader + 'static> CachedSlide<R> {
    /// Get the detected format of this slide.
    pub fn format(&self) -> SlideFormat {
        self.format
    }

    /// Unix timestamp of the underlying source file's last modification.
    ///
    /// Used to invalidate downstream tile caches when the source on disk (or
    /// in the object store) changes out from under an open slide.
    pub fn mtime(&self) -> i64 {
        self.reader.last_modified()
    }

    /// Get the number of pyramid levels.
    pub fn level_count(&self) -> usize {
        match &self.inner {
            SlideReaderInner::Svs(r) => r.level_count(),
            SlideReaderInner::GenericTiff(r) => r.level_count(),
        }
    }

    /// Get dimensions of the full-resolution (level 0) image.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match &self.inner {
            SlideReaderInner::Svs(r) => r.dimensions(),
            SlideReaderInner::GenericTiff(r) => r.dimensions(),
        }
    }

    /// Get dimensions of a specific level.
    pub fn level_dimensions(&self, level: usize) -> Option<(u32, u32)> {
        match &self.inner {
            SlideReaderInner::Svs(r) => r.level_dimensions(level),
            SlideReaderInner::GenericTiff(r) => r.level_dimensions(level),
        }
    }

    /// Get the downsample factor for a level.
    pub fn level_downsample(&self, level: usize) -> Option<f64> {
        match &self.inner {
            SlideReaderInner::Svs(r) => r.level_downsample(level),
            SlideReaderInner::GenericTiff(r) => r.level_downsample(level),
        }
    }

    /// Get tile size for a level.
    pub fn tile_size(&self, level: usize) -> Option<(u32, u32)> {
        match &self.inner {
            SlideReaderInner::Svs(r) => r.tile_size(level),
            SlideReaderInner::GenericTiff(r) => r.tile_size(level),
        }
    }

    /// Get the number of tiles in X and Y directions for a level.
    pub fn tile_count(&self, level: usize) -> Option<(u32, u32)> {
        match &self.inner {
            SlideReaderInner::Svs(r) => r.tile_count(level),
            SlideReaderInner::GenericTiff(r) => r.tile_count(level),
        }
    }

    /// Get complete information about a level.
    pub fn level_info(&self, level: usize) -> Option<LevelInfo> {
        match &self.inner {
            SlideReaderInner::Svs(r) => r.level_info(level),
            SlideReaderInner::GenericTiff(r) => r.level_info(level),
        }
    }

    /// Find the best level for a given downsample factor.
    pub fn best_level_for_downsample(&self, downsample: f64) -> Option<usize> {
        match &self.inner {
            SlideReaderInner::Svs(r) => SlideReader::best_level_for_downsample(r, downsample),
            SlideReaderInner::GenericTiff(r) => {
                SlideReader::best_level_for_downsample(r, downsample)
            }
        }
    }

    /// Read a tile and prepare it for JPEG decoding.
    ///
    /// # Arguments
    /// * `level` - Pyramid level index (0 = highest resolution)
    /// * `tile_x` - Tile X coordinate (0-indexed from left)
    /// * `tile_y` - Tile Y coordinate (0-indexed from top)
    ///
    /// # Returns
    /// Complete JPEG data ready for decoding.
    pub async fn read_tile(
        &self,
        level: usize,
        tile_x: u32,
        tile_y: u32,
    ) -> Result<Bytes, TiffError> {
        match &self.inner {
            SlideReaderInner::Svs(r) => {
                r.read_tile(self.reader.as_ref(), level, tile_x, tile_y)
                    .await
            }
            SlideReaderInner::GenericTiff(r) => {
                r.read_tile(self.reader.as_ref(), level, tile_x, tile_y)
                    .await
            }
        }
    }
}

// =============================================================================
// SlideRegistry
// =============================================================================

/// Registry for managing slide lifecycle and caching.
///
/// The registry:
/// - Caches opened slide readers with LRU eviction
/// - Creates readers on-demand with format auto-detection
/// - Wraps readers in BlockCache for efficient I/O
/// - Uses singleflight to prevent duplicate opens for the same slide
pub struct SlideRegistry<S: SlideSource> {
    /// The source for creating range readers
    source: S,

    /// Cached slides indexed by slide ID
    cache: RwLock<LruCache<String, Arc<CachedSlide<S::Reader>>>>,

    /// In-flight opens for singleflight pattern
    in_flight: Mutex<HashMap<String, Arc<InFlightState<S::Reader>>>>,

    /// Block size for BlockCache
    block_size: usize,

    /// Block cache capacity per slide
    block_cache_capacity: usize,
}

/// State for an in-flight slide open operation.
struct InFlightState<R: RangeReader + 'static> {
    /// Notification for waiters
    notify: Notify,
    /// Result of the open operation (set when complete)
    result: Mutex<Option<Result<Arc<CachedSlide<R>>, FormatError>>>,
}

impl<S: SlideSource> SlideRegistry<S> {
    /// Borrow the underlying source, e.g. to open a raw reader for a format
    /// the registry's own TIFF-family auto-detection doesn't cover.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Create a new SlideRegistry with default settings.
    ///
    /// Uses default cache capacities:
    /// - Slide cache: 100 slides
    /// - Block cache per slide: 100 blocks (25.6 MB per slide)
    pub fn new(source: S) -> Self {
        Self::with_capacity(
            source,
            DEFAULT_SLIDE_CACHE_CAPACITY,
            DEFAULT_BLOCK_SIZE,
            DEFAULT_BLOCK_CACHE_CAPACITY,
        )
    }

    /// Create a new SlideRegistry with custom capacity settings.
    ///
    /// # Arguments
    /// * `source` - The slide source for creating readers
    /// * `slide_cache_capacity` - Maximum number of slides to cache
    /// * `block_size` - Block size for the block cache (bytes)
    /// * `block_cache_capacity` - Number of blocks to cache per slide
    pub fn with_capacity(
        source: S,
        slide_cache_capacity: usize,
        block_size: usize,
        block_cache_capacity: usize,
    ) -> Self {
        Self {
            source,
            cache: RwLock::new(LruCache::new(
                std::num::NonZeroUsize::new(slide_cache_capacity).unwrap(),
            )),
            in_flight: Mutex::new(HashMap::new()),
            block_size,
            block_cache_capacity,
        }
    }

    /// Get a slide, opening it if not already cached.
    ///
    /// This method:
    /// 1. Checks the cache for an existing slide
    /// 2. If not cached, opens the slide with format auto-detection
    /// 3. Uses singleflight to prevent duplicate opens for concurrent requests
    ///
    /// # Arguments
    /// * `slide_id` - Unique identifier for the slide
    ///
    /// # Returns
    /// An Arc-wrapped CachedSlide that can be used to read tiles.
    pub async fn get_slide(
        &self,
        slide_id: &str,
    ) -> Result<Arc<CachedSlide<S::Reader>>, FormatError> {
        // Fast path: check cache
        {
            let mut cache = self.cache.write().await;
            if let Some(slide) = cache.get(slide_id) {
                return Ok(slide.clone());
            }
        }

        // Slow path: check in_flight or become leader
        loop {
            let state = {
                let mut in_flight = self.in_flight.lock().await;

                if let Some(state) = in_flight.get(slide_id) {
                    // Another task is opening this slide
                    state.clone()
                } else {
                    // We're the leader for opening this slide
                    let state = Arc::new(InFlightState {
                        notify: Notify::new(),
                        result: Mutex::new(None),
                    });
                    in_flight.insert(slide_id.to_string(), state.clone());
                    drop(in_flight);

                    // Perform the open
                    let result = self.open_slide_internal(slide_id).await;

                    // Store result and update cache
                    {
                        let mut result_guard = state.result.lock().await;
                        *result_guard = Some(result.clone());
                    }

                    if let Ok(ref slide) = result {
                        let mut cache = self.cache.write().await;
                        cache.put(slide_id.to_string(), slide.clone());
                    }

                    // Clean up in_flight and notify waiters
                    {
                        let mut in_flight = self.in_flight.lock().await;
                        in_flight.remove(slide_id);
                    }
                    state.notify.notify_waiters();

                    return result;
                }
            };

            // Wait for the leader to finish
            state.notify.notified().await;

            // Check if result is available
            let result_guard = state.result.lock().await;
            if let Some(ref result) = *result_guard {
                return result.clone();
            }

            // Result not yet available, loop back (shouldn't normally happen)
        }
    }

    /// Open a slide without caching (internal implementation).
    async fn open_slide_internal(
        &self,
        slide_id: &str,
    ) -> Result<Arc<CachedSlide<S::Reader>>, FormatError> {
        // Create the underlying reader
        let reader = self.source.create_reader(slide_id).await?;

        // Wrap in block cache
        let cached_reader = Arc::new(BlockCache::with_capacity(
            reader,
            self.block_size,
            self.block_cache_capacity,
        ));

        // Detect format
        let format = detect_format(cached_reader.as_ref()).await?;

        // Open the appropriate reader
        let inner = match format {
            SlideFormat::AperioSvs => {
                let svs = SvsReader::open(cached_reader.as_ref()).await?;
                SlideReaderInner::Svs(svs)
            }
            SlideFormat::GenericTiff => {
                let tiff = GenericTiffReader::open(cached_reader.as_ref()).await?;
                SlideReaderInner::GenericTiff(tiff)
            }
        };

        Ok(Arc::new(CachedSlide {
            format,
            reader: cached_reader,
            inner,
        }))
    }

    /// Remove a slide from the cache.
    ///
    /// This can be useful for forcing a reload of a slide's metadata.
    pub async fn invalidate(&self, slide_id: &str) {
        let mut cache = self.cache.write().await;
        cache.pop(slide_id);
    }

    /// Clear all cached slides.
    pub async fn clear(&self) {
        let mut cache = self.cache.write().await;
        cache.clear();
    }

    /// Get the number of cached slides.
    pub async fn cached_count(&self) -> usize {
        let cache = self.cache.read().await;
        cache.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
