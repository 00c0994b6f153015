use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use lru::LruCache;
use tokio::sync::{Mutex, Notify, RwLock};

use super::RangeReader;
use crate::error::IoError;

/// Default block size: 256KB
/// This is large enough to amortize S3 latency, small enough to not waste bandwidth.
pub const DEFAULT_BLOCK_SIZE: usize = 256 * 1024;

/// Default cache capacity in number of blocks.
/// 100 blocks * 256KB = 25.6MB default cache size.
const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Block-based caching layer that wraps any RangeReader.
///
/// This cache is critical for performance:
/// - TIFF parsing requires many small reads at scattered offsets
/// - Without caching, each read would be an S3 request
/// - Block cache amortizes these into fewer, larger requests
///
/// Features:
/// - Fixed-size block cache (default 256KB blocks)
/// - LRU eviction when cache reaches capacity
/// - Singleflight: concurrent requests for the same block share one fetch
/// - Handles reads spanning multiple blocks
pub struct BlockCache<R> {
    /// The underlying reader
    inner: Arc<R>,
    /// Block size in bytes
    block_size: usize,
    /// Cached blocks indexed by block number
    cache: RwLock<LruCache<u64, Bytes>>,
    /// In-flight block fetches for singleflight pattern
    in_flight: Mutex<HashMap<u64, Arc<Notify>>>,
}

impl<R: RangeReader> BlockCache<R> {
    /// Create a new BlockCache wrapping the given reader.
    ///
    /// Uses default block size (256KB) and cache capacity (100 blocks).
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, DEFAULT_BLOCK_SIZE, DEFAULT_CACHE_CAPACITY)
    }

    /// Create a new BlockCache with custom block size and capacity.
    ///
    /// # Arguments
    /// * `inner` - The underlying reader to wrap
    /// * `block_size` - Size of each cached block in bytes
    /// * `capacity` - Maximum number of blocks to cache
    pub fn with_capacity(inner: R, block_size: usize, capacity: usize) -> Self {
        Self {
            inner: Arc::new(inner),
            block_size,
            cache: RwLock::new(LruCache::new(
                std::num::NonZeroUsize::new(capacity).unwrap(),
            )),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Get a block from cache or fetch it from the underlying reader.
    ///
    /// Implements the singleflight pattern: if multiple tasks request the same
    /// block concurrently, only one fetch is performed and all tasks share the result.
    async fn get_block(&self, block_idx: u64) -> Result<Bytes, IoError> {
        loop {
            // Fast path: check cache
            {
                let cache = self.cache.read().await;
                if let Some(data) = cache.peek(&block_idx) {
                    return Ok(data.clone());
                }
            }

            // Slow path: check in_flight or become leader
            let notify = {
                let mut in_flight = self.in_flight.lock().await;

                if let Some(notify) = in_flight.get(&block_idx) {
                    // Another task is fetching this block, wait for it
                    let notify = notify.clone();
                    drop(in_flight);
                    notify.notified().await;
                    // Loop back to check cache
                    continue;
                }

                // We're the leader for this block
                let notify = Arc::new(Notify::new());
                in_flight.insert(block_idx, notify.clone());
                notify
            };

            // Fetch the block from source
            let result = self.fetch_block_from_source(block_idx).await;

            // Update cache and in_flight atomically, then notify waiters
            {
                let mut cache = self.cache.write().await;
                let mut in_flight = self.in_flight.lock().await;

                if let Ok(ref data) = result {
                    cache.put(block_idx, data.clone());
                }

                in_flight.remove(&block_idx);
            }

            notify.notify_waiters();

            return result;
        }
    }

    /// Fetch a block directly from the underlying reader.
    async fn fetch_block_from_source(&self, block_idx: u64) -> Result<Bytes, IoError> {
        let offset = block_idx * self.block_size as u64;
        let size = self.inner.size();

        // Calculate actual bytes to read (may be less for last block)
        let remaining = size.saturating_sub(offset);
        if remaining == 0 {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: self.block_size as u64,
                size,
            });
        }

        let len = std::cmp::min(self.block_size as u64, remaining) as usize;
        self.inner.read_exact_at(offset, len).await
    }

    /// Calculate which block contains the given offset.
    #[inline]
    fn block_for_offset(&self, offset: u64) -> u64 {
        offset / self.block_size as u64
    }

    /// Calculate the offset within a block.
    #[inline]
    fn offset_within_block(&self, offset: u64) -> usize {
        (offset % self.block_size as u64) as usize
    }
}

#[async_trait]
impl<R: RangeReader + 'static> RangeReader for BlockCache<R> {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        // Validate range
        let size = self.inner.size();
        if offset + len as u64 > size {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size,
            });
        }

        // Handle zero-length reads
        if len == 0 {
            return Ok(Bytes::new());
        }

        // Calculate which blocks we need
        let start_block = self.block_for_offset(offset);
        let end_block = self.block_for_offset(offset + len as u64 - 1);

        if start_block == end_block {
            // Single block read (common case)
            let block = self.get_block(start_block).await?;
            let block_offset = self.offset_within_block(offset);
            Ok(block.slice(block_offset..block_offset + len))
        } else {
            // Multi-block read: fetch all required blocks and combine
            let mut result = BytesMut::with_capacity(len);
            let mut remaining = len;
            let mut current_offset = offset;

            for block_idx in start_block..=end_block {
                let block = self.get_block(block_idx).await?;
                let block_offset = self.offset_within_block(current_offset);
                let bytes_in_block = std::cmp::min(block.len() - block_offset, remaining);

                result.extend_from_slice(&block[block_offset..block_offset + bytes_in_block]);

                remaining -= bytes_in_block;
                current_offset += bytes_in_block as u64;
            }

            Ok(result.freeze())
        }
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }

    fn last_modified(&self) -> i64 {
        self.inner.last_modified()
    }
}
