//! Byte-budgeted LRU cache of decoded/encoded tiles.
//!
//! Keyed on the full `(source_path, resolution, tile_index, h_angle,
//! v_angle, encoding, quality)` tuple, evicting least-recently-used entries
//! while `current_bytes > capacity_bytes`. Built on the async/`lru`-crate
//! shape of the block cache used elsewhere in this crate, generalized from
//! `(slide_id, level, x, y, quality) -> Bytes` to the full `TileKey ->
//! RawTile` pair the pipeline needs.

use lru::LruCache;
use std::num::NonZeroUsize;
use tokio::sync::Mutex;

use crate::error::CacheError;
use crate::tile::raw_tile::{RawTile, TileKey};

/// Fixed per-entry bookkeeping overhead, in addition to key and data bytes.
/// Capacity is a budget for payload bytes, not a promise of exact allocator
/// accounting.
const ENTRY_OVERHEAD_BYTES: usize = 64;

fn entry_accounted_size(key: &TileKey, tile: &RawTile) -> usize {
    key.size_in_bytes() + tile.data_length() + ENTRY_OVERHEAD_BYTES
}

struct Inner {
    cache: LruCache<TileKey, RawTile>,
    current_bytes: usize,
}

/// Thread-safe, byte-capacity-bounded LRU tile cache.
///
/// `capacity_bytes == 0` disables storage entirely: `get` always misses and
/// `insert` is always a no-op, matching a deployment with caching switched
/// off via `max_image_cache_mb = 0`.
pub struct TileCache {
    inner: Mutex<Inner>,
    capacity_bytes: usize,
}

impl TileCache {
    pub fn new(capacity_bytes: usize) -> Self {
        // lru::LruCache requires a nonzero slot bound; this only bounds the
        // number of keys tracked, byte accounting enforces the real budget.
        let slots = NonZeroUsize::new(1_000_000).unwrap();
        Self {
            inner: Mutex::new(Inner {
                cache: LruCache::new(slots),
                current_bytes: 0,
            }),
            capacity_bytes,
        }
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    /// Look up a tile by key, promoting it to most-recently-used on hit.
    pub async fn get(&self, key: &TileKey) -> Option<RawTile> {
        if self.capacity_bytes == 0 {
            return None;
        }
        let mut inner = self.inner.lock().await;
        inner.cache.get(key).cloned()
    }

    pub async fn contains(&self, key: &TileKey) -> bool {
        if self.capacity_bytes == 0 {
            return false;
        }
        let inner = self.inner.lock().await;
        inner.cache.contains(key)
    }

    /// Insert a tile, evicting least-recently-used entries until the cache
    /// fits within `capacity_bytes`.
    ///
    /// - If an entry already exists under `key`:
    ///   - same or newer `timestamp` than the incoming tile: no-op, but the
    ///     existing entry is still promoted to most-recently-used (it's
    ///     touched before its staleness is checked).
    ///   - older `timestamp`: the stale entry is evicted first, then the new
    ///     tile is inserted as below.
    /// - If the cache held zero entries before this call and the new tile
    ///   alone exceeds `capacity_bytes`, nothing is stored and
    ///   `CacheError::EntryTooLarge` is returned.
    /// - Otherwise the tile is inserted and older entries are evicted
    ///   (oldest first) until the budget holds or only the just-inserted
    ///   entry remains: a single pathological tile is allowed to stand alone
    ///   over budget rather than being dropped after displacing everything
    ///   else.
    pub async fn insert(&self, tile: RawTile) -> Result<(), CacheError> {
        if self.capacity_bytes == 0 {
            return Ok(());
        }
        let key = tile.key();
        let mut inner = self.inner.lock().await;
        let was_empty = inner.cache.is_empty();

        if let Some(existing) = inner.cache.get(&key) {
            if existing.timestamp >= tile.timestamp {
                return Ok(());
            }
            if let Some(stale) = inner.cache.pop(&key) {
                inner.current_bytes -= entry_accounted_size(&key, &stale);
            }
        }

        let incoming_size = entry_accounted_size(&key, &tile);
        if was_empty && incoming_size > self.capacity_bytes {
            return Err(CacheError::EntryTooLarge {
                size: incoming_size,
                capacity: self.capacity_bytes,
            });
        }

        inner.cache.put(key, tile);
        inner.current_bytes += incoming_size;

        while inner.current_bytes > self.capacity_bytes && inner.cache.len() > 1 {
            if let Some((old_key, old_tile)) = inner.cache.pop_lru() {
                inner.current_bytes -= entry_accounted_size(&old_key, &old_tile);
            } else {
                break;
            }
        }

        Ok(())
    }

    pub async fn remove(&self, key: &TileKey) -> Option<RawTile> {
        let mut inner = self.inner.lock().await;
        let removed = inner.cache.pop(key);
        if let Some(tile) = &removed {
            inner.current_bytes -= entry_accounted_size(key, tile);
        }
        removed
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.cache.clear();
        inner.current_bytes = 0;
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.cache.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn current_bytes(&self) -> usize {
        self.inner.lock().await.current_bytes
    }
}
