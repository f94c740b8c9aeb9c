//! In-memory [`BackingStore`] implementation backed by [`DashMap`].
//!
//! Entries are raw encoded blobs held as [`Bytes`], so a hit hands the decoder
//! a cheap clone of the published buffer. Publication is a single map insert.

use std::sync::Arc;
use std::time::SystemTime;

use bytes::{Buf, Bytes};
use dashmap::DashMap;
use querycache_core::{encode, CacheKey, RowCursor};

use crate::error::CacheError;
use crate::locks::LockCoordinator;
use crate::storage::clock::{Clock, SystemClock};
use crate::storage::engine::{run_producer, BackingStore, EntryInfo, Producer, SweepableStore};

#[derive(Clone)]
struct MemoryEntry {
    blob: Bytes,
    published: SystemTime,
}

/// Named in-memory store.
///
/// Reads are lock-free apart from `DashMap`'s internal sharding; populations
/// of the same key are serialized by a [`LockCoordinator`].
pub struct MemoryStore {
    name: String,
    entries: DashMap<CacheKey, MemoryEntry>,
    locks: LockCoordinator,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Creates an empty store for namespace `name`.
    ///
    /// # Errors
    ///
    /// [`CacheError::Configuration`] if `name` is empty.
    pub fn new(name: impl Into<String>) -> Result<Self, CacheError> {
        Self::with_clock(name, Arc::new(SystemClock))
    }

    /// Like [`new`](Self::new), stamping publish times from `clock`.
    ///
    /// # Errors
    ///
    /// [`CacheError::Configuration`] if `name` is empty.
    pub fn with_clock(name: impl Into<String>, clock: Arc<dyn Clock>) -> Result<Self, CacheError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CacheError::Configuration(
                "memory store name must not be empty".to_string(),
            ));
        }
        tracing::info!(store = %name, "memory cache store created");
        Ok(Self {
            name,
            entries: DashMap::new(),
            locks: LockCoordinator::new(),
            clock,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn blob(&self, key: &CacheKey) -> Option<Bytes> {
        self.entries.get(key).map(|e| e.blob.clone())
    }

    fn populate(&self, key: &CacheKey, producer: Producer<'_>) -> Result<Option<Bytes>, CacheError> {
        let Some(mut source) = run_producer(key, producer)? else {
            return Ok(None);
        };
        let mut buf = Vec::new();
        let summary =
            encode(&mut buf, source.as_mut()).map_err(|e| CacheError::from_encode(key, e))?;
        let blob = Bytes::from(buf);
        self.entries.insert(
            key.clone(),
            MemoryEntry {
                blob: blob.clone(),
                published: self.clock.now(),
            },
        );
        metrics::counter!("querycache_populations_total", "store" => "memory").increment(1);
        tracing::debug!(
            store = %self.name,
            key = %key,
            rows = summary.rows,
            bytes = blob.len(),
            "published cache entry"
        );
        Ok(Some(blob))
    }
}

fn decode(key: &CacheKey, blob: Bytes) -> Result<RowCursor, CacheError> {
    RowCursor::open(blob.reader()).map_err(|e| CacheError::from_decode(key, e))
}

impl BackingStore for MemoryStore {
    fn get_or_populate(
        &self,
        key: &CacheKey,
        producer: Option<Producer<'_>>,
    ) -> Result<Option<RowCursor>, CacheError> {
        if let Some(blob) = self.blob(key) {
            metrics::counter!("querycache_hits_total", "store" => "memory").increment(1);
            tracing::debug!(store = %self.name, key = %key, "cache hit");
            return decode(key, blob).map(Some);
        }

        metrics::counter!("querycache_misses_total", "store" => "memory").increment(1);
        let Some(producer) = producer else {
            tracing::debug!(store = %self.name, key = %key, "cache miss without producer");
            return Err(CacheError::NoCacheEntry { key: key.clone() });
        };

        let blob = {
            let _guard = self.locks.lock(key.as_str());
            match self.blob(key) {
                Some(blob) => blob,
                None => match self.populate(key, producer)? {
                    Some(blob) => blob,
                    None => return Ok(None),
                },
            }
        };
        decode(key, blob).map(Some)
    }

    fn exists(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    fn flush_all(&self) -> Result<(), CacheError> {
        self.entries.clear();
        Ok(())
    }

    fn flush_one(&self, key: &CacheKey) -> Result<bool, CacheError> {
        Ok(self.entries.remove(key).is_some())
    }

    fn size(&self) -> Result<usize, CacheError> {
        Ok(self.entries.len())
    }

    fn active_count(&self) -> usize {
        self.locks.active_count()
    }

    fn is_active(&self, key: &CacheKey) -> bool {
        self.locks.is_registered(key.as_str())
    }
}

impl SweepableStore for MemoryStore {
    fn entries(&self) -> Result<Vec<EntryInfo>, CacheError> {
        Ok(self
            .entries
            .iter()
            .map(|e| EntryInfo {
                key: e.key().clone(),
                last_modified: e.value().published,
            })
            .collect())
    }

    fn last_modified(&self, key: &CacheKey) -> Option<SystemTime> {
        self.entries.get(key).map(|e| e.published)
    }
}
