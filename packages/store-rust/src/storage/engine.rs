//! Backing store traits.
//!
//! Defines [`BackingStore`], the get-or-populate contract shared by the
//! in-memory and on-disk stores, and [`SweepableStore`], the extra surface the
//! [`ExpiringStore`](super::ExpiringStore) decorator needs to apply age and
//! size limits.

use std::time::SystemTime;

use querycache_core::{CacheKey, Produced, RowCursor, RowSource};

use crate::error::CacheError;

/// Executes the query against the live backend on a cache miss.
///
/// Called at most once, while the per-key population lock is held.
pub type Producer<'a> = Box<dyn FnOnce() -> anyhow::Result<Produced> + 'a>;

/// Key-addressed store of encoded results.
///
/// All operations are synchronous and may block: on a per-key lock while a
/// concurrent population of the same key runs, and on I/O for the on-disk
/// store. Wrapped in `Arc<dyn BackingStore>` for sharing across threads.
pub trait BackingStore: Send + Sync + 'static {
    /// Returns a cursor over the entry for `key`, populating it first if absent.
    ///
    /// On a hit the entry is decoded and returned without locking. On a miss
    /// with no `producer` the call fails with [`CacheError::NoCacheEntry`].
    /// Otherwise the per-key lock is taken, existence is re-checked, and the
    /// producer runs only if the entry is still absent. Its rows are encoded to
    /// a staging location and published atomically before the lock is
    /// released. Returns `Ok(None)` if the producer reports
    /// [`Produced::NotAQuery`]; nothing is published then.
    ///
    /// # Errors
    ///
    /// [`CacheError::NoCacheEntry`], [`CacheError::PopulationFailure`],
    /// [`CacheError::Serialization`] or [`CacheError::CorruptEntry`].
    fn get_or_populate(
        &self,
        key: &CacheKey,
        producer: Option<Producer<'_>>,
    ) -> Result<Option<RowCursor>, CacheError>;

    /// Whether a published entry exists for `key`.
    fn exists(&self, key: &CacheKey) -> bool;

    /// Removes every published entry.
    ///
    /// # Errors
    ///
    /// [`CacheError::Storage`] if the backing medium cannot be cleared.
    fn flush_all(&self) -> Result<(), CacheError>;

    /// Removes the entry for `key`, if any. Returns whether one was removed.
    ///
    /// # Errors
    ///
    /// [`CacheError::Storage`] if the entry exists but cannot be removed.
    fn flush_one(&self, key: &CacheKey) -> Result<bool, CacheError>;

    /// Number of published entries. Staging artifacts are not counted.
    ///
    /// # Errors
    ///
    /// [`CacheError::Storage`] if the backing medium cannot be enumerated.
    fn size(&self) -> Result<usize, CacheError>;

    /// Number of keys currently being populated (or waited on).
    fn active_count(&self) -> usize;

    /// Whether `key` is currently being populated (or waited on).
    fn is_active(&self, key: &CacheKey) -> bool;

    /// Whether this store enforces age or size limits on its entries.
    fn supports_expiration(&self) -> bool {
        false
    }
}

/// A published entry and when it was published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub key: CacheKey,
    pub last_modified: SystemTime,
}

/// A [`BackingStore`] that can enumerate its entries with their publish times.
pub trait SweepableStore: BackingStore {
    /// Point-in-time listing of published entries.
    ///
    /// # Errors
    ///
    /// [`CacheError::Storage`] if the backing medium cannot be enumerated.
    fn entries(&self) -> Result<Vec<EntryInfo>, CacheError>;

    /// Publish time of `key`, or `None` if it has no entry.
    fn last_modified(&self, key: &CacheKey) -> Option<SystemTime>;
}

/// Runs `producer` for `key`, mapping its failure to
/// [`CacheError::PopulationFailure`]. `Ok(None)` means "not a query".
pub(crate) fn run_producer(
    key: &CacheKey,
    producer: Producer<'_>,
) -> Result<Option<Box<dyn RowSource>>, CacheError> {
    match producer() {
        Ok(Produced::Rows(source)) => Ok(Some(source)),
        Ok(Produced::NotAQuery) => {
            tracing::debug!(key = %key, "producer returned no rows to cache");
            Ok(None)
        }
        Err(source) => Err(CacheError::PopulationFailure {
            key: key.clone(),
            source,
        }),
    }
}
