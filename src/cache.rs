//! In-process point identity cache with flush-on-overflow
//!
//! The cache fronts the known-set table: every raw intersection point is
//! offered here first, keyed by its fingerprint, and only unseen points
//! survive. The capacity cap bounds process memory on long runs; on
//! reaching it the cache flushes its unpersisted entries to the store in a
//! single batched upsert (which holds the cross-worker known-set lease) and
//! then drops the whole map. Dropping is safe because a duplicate that
//! resurfaces later is absorbed by the store's uniqueness constraint.

use std::collections::HashMap;

use crate::point::{Point, PointKey};
use crate::store::{StoreError, WorkStore};

/// Outcome of offering a point to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// The fingerprint was already present; the point was dropped.
    Seen,
    /// The point was cached.
    Inserted,
    /// Capacity was reached: the flush protocol ran, then the point was
    /// cached.
    FlushedAndInserted,
}

/// Fingerprint-keyed cache of discovered points, capacity `K`
/// (`0` disables caching and routes every offer straight to the store).
#[derive(Debug)]
pub struct PointCache {
    capacity: usize,
    map: HashMap<PointKey, Point>,
}

impl PointCache {
    /// A cache bounded at `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self { capacity, map: HashMap::new() }
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Offers a point, consuming it. Duplicate fingerprints are dropped;
    /// a full cache flushes before inserting.
    pub async fn offer<S: WorkStore>(
        &mut self,
        store: &S,
        point: Point,
    ) -> Result<Offer, StoreError> {
        if self.capacity == 0 {
            let added = store.insert_known(&point).await?;
            return Ok(if added > 0 { Offer::Inserted } else { Offer::Seen });
        }

        if self.map.contains_key(point.key()) {
            return Ok(Offer::Seen);
        }

        let mut flushed = false;
        if self.map.len() >= self.capacity {
            self.flush(store).await?;
            flushed = true;
        }

        self.map.insert(point.key().clone(), point);
        Ok(if flushed { Offer::FlushedAndInserted } else { Offer::Inserted })
    }

    /// Flush protocol: batch every unpersisted entry to the store, mark
    /// them persisted, then drop the whole map if at or above capacity.
    /// Returns the number of rows the store reported affected.
    pub async fn flush<S: WorkStore>(&mut self, store: &S) -> Result<u64, StoreError> {
        let pending: Vec<Point> =
            self.map.values().filter(|p| !p.in_store).cloned().collect();

        let mut affected = 0;
        if !pending.is_empty() {
            affected = store.insert_many_known(&pending).await?;
            for point in self.map.values_mut() {
                point.in_store = true;
            }
        }

        if self.capacity != 0 && self.map.len() >= self.capacity {
            self.map.clear();
        }

        Ok(affected)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::Point;
    use crate::scalar::Ctx;
    use crate::store::MemoryStore;

    fn ctx() -> Ctx {
        Ctx::new(200, "1e-20", 60).unwrap()
    }

    #[tokio::test]
    async fn colliding_fingerprints_persist_once() {
        let c = ctx();
        let store = MemoryStore::new();
        let mut cache = PointCache::new(16);

        let p = Point::from_i64(&c, 1, 1);
        assert_eq!(cache.offer(&store, p.clone()).await.unwrap(), Offer::Inserted);
        assert_eq!(cache.offer(&store, p.clone()).await.unwrap(), Offer::Seen);
        assert_eq!(cache.offer(&store, p.clone()).await.unwrap(), Offer::Seen);
        assert_eq!(cache.len(), 1);

        cache.flush(&store).await.unwrap();
        assert_eq!(store.known_len().await, 1);
    }

    #[tokio::test]
    async fn overflow_flushes_and_clears() {
        let c = ctx();
        let store = MemoryStore::new();
        let mut cache = PointCache::new(3);

        for v in 0..3 {
            cache.offer(&store, Point::from_i64(&c, v, 0)).await.unwrap();
        }
        assert_eq!(cache.len(), 3);
        assert_eq!(store.known_len().await, 0);

        // The fourth offer trips the flush; the map is dropped and only
        // the newcomer remains cached.
        let outcome = cache.offer(&store, Point::from_i64(&c, 9, 9)).await.unwrap();
        assert_eq!(outcome, Offer::FlushedAndInserted);
        assert_eq!(cache.len(), 1);
        assert_eq!(store.known_len().await, 3);

        cache.flush(&store).await.unwrap();
        assert_eq!(store.known_len().await, 4);
    }

    #[tokio::test]
    async fn intermediate_flush_keeps_entries_as_negative_lookups() {
        let c = ctx();
        let store = MemoryStore::new();
        let mut cache = PointCache::new(10);

        cache.offer(&store, Point::from_i64(&c, 1, 0)).await.unwrap();
        cache.offer(&store, Point::from_i64(&c, 2, 0)).await.unwrap();

        // Below capacity the flush persists but retains the map.
        assert_eq!(cache.flush(&store).await.unwrap(), 2);
        assert_eq!(cache.len(), 2);
        assert_eq!(store.known_len().await, 2);

        // Retained entries still dedup, and a second flush has nothing
        // new to write.
        assert_eq!(cache.offer(&store, Point::from_i64(&c, 1, 0)).await.unwrap(), Offer::Seen);
        assert_eq!(cache.flush(&store).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn zero_capacity_bypasses_the_cache() {
        let c = ctx();
        let store = MemoryStore::new();
        let mut cache = PointCache::new(0);

        let p = Point::from_i64(&c, 4, 4);
        assert_eq!(cache.offer(&store, p.clone()).await.unwrap(), Offer::Inserted);
        assert_eq!(cache.offer(&store, p).await.unwrap(), Offer::Seen);
        assert_eq!(cache.len(), 0);
        assert_eq!(store.known_len().await, 1);
    }
}
