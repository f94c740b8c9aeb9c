//! Caching facade used by statement executors.
//!
//! [`QueryCache`] turns a [`Query`] into a [`CacheKey`] and serves it through
//! a [`BackingStore`]. An inactive cache has no store at all: every call runs
//! the producer and hands its live rows back untouched.

use std::sync::Arc;

use querycache_core::{CacheKey, Query, RowSource};

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::storage::engine::{run_producer, BackingStore, Producer};
use crate::storage::factory::StoreFactory;

/// Entry point for executing queries through the cache.
#[derive(Clone)]
pub struct QueryCache {
    store: Option<Arc<dyn BackingStore>>,
}

impl QueryCache {
    /// An active cache over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn BackingStore>) -> Self {
        Self { store: Some(store) }
    }

    /// An inactive cache that always executes against the backend.
    #[must_use]
    pub fn passthrough() -> Self {
        Self { store: None }
    }

    /// Builds a cache from `config`, obtaining the store from `factory`.
    /// No store is created when `config.active` is `false`.
    ///
    /// # Errors
    ///
    /// See [`StoreFactory::store_for`].
    pub fn from_config(factory: &StoreFactory, config: &CacheConfig) -> Result<Self, CacheError> {
        if !config.active {
            tracing::info!("query cache inactive; executing every query directly");
            return Ok(Self::passthrough());
        }
        factory.store_for(config).map(Self::new)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.store.is_some()
    }

    #[must_use]
    pub fn store(&self) -> Option<&Arc<dyn BackingStore>> {
        self.store.as_ref()
    }

    /// Executes `query`, serving it from the cache when active.
    ///
    /// `producer` runs the query against the backend; pass `None` for
    /// cache-only lookups. Returns `Ok(None)` when the statement produced no
    /// rows to cache.
    ///
    /// # Errors
    ///
    /// [`CacheError::NoCacheEntry`] on a cache-only miss (always, when
    /// inactive), or any error of [`BackingStore::get_or_populate`].
    pub fn execute(
        &self,
        query: &Query,
        producer: Option<Producer<'_>>,
    ) -> Result<Option<Box<dyn RowSource>>, CacheError> {
        let key = query.cache_key();
        match &self.store {
            Some(store) => Ok(store
                .get_or_populate(&key, producer)?
                .map(|cursor| Box::new(cursor) as Box<dyn RowSource>)),
            None => match producer {
                Some(producer) => run_producer(&key, producer),
                None => Err(CacheError::NoCacheEntry { key }),
            },
        }
    }

    /// # Errors
    ///
    /// See [`BackingStore::flush_all`].
    pub fn flush_all(&self) -> Result<(), CacheError> {
        match &self.store {
            Some(store) => store.flush_all(),
            None => Ok(()),
        }
    }

    /// # Errors
    ///
    /// See [`BackingStore::flush_one`].
    pub fn flush_one(&self, key: &CacheKey) -> Result<bool, CacheError> {
        match &self.store {
            Some(store) => store.flush_one(key),
            None => Ok(false),
        }
    }

    /// # Errors
    ///
    /// See [`BackingStore::size`].
    pub fn size(&self) -> Result<usize, CacheError> {
        self.store.as_ref().map_or(Ok(0), |store| store.size())
    }

    #[must_use]
    pub fn exists(&self, key: &CacheKey) -> bool {
        self.store.as_ref().is_some_and(|store| store.exists(key))
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.store.as_ref().map_or(0, |store| store.active_count())
    }

    /// Whether the underlying store enforces age or size limits.
    #[must_use]
    pub fn supports_expiration(&self) -> bool {
        self.store
            .as_ref()
            .is_some_and(|store| store.supports_expiration())
    }

    #[must_use]
    pub fn is_populating(&self, key: &CacheKey) -> bool {
        self.store.as_ref().is_some_and(|store| store.is_active(key))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use querycache_core::{collect_rows, Produced, SqlValue};
    use tokio::runtime::Handle;

    use super::*;
    use crate::config::BackendConfig;
    use crate::storage::engines::MemoryStore;
    use crate::storage::test_support::{self, counting_producer};

    fn active() -> QueryCache {
        QueryCache::new(Arc::new(MemoryStore::new("facade").unwrap()))
    }

    fn query() -> Query {
        Query::new("SELECT id, name FROM users WHERE id > ?").bind(1_u32, SqlValue::Int(0))
    }

    #[test]
    fn active_cache_populates_once() {
        let cache = active();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let mut rows = cache
                .execute(&query(), Some(counting_producer(&calls)))
                .unwrap()
                .unwrap();
            assert_eq!(collect_rows(rows.as_mut()).unwrap(), test_support::rows());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.exists(&query().cache_key()));
        assert_eq!(cache.size().unwrap(), 1);
        assert_eq!(cache.active_count(), 0);
        assert!(!cache.is_populating(&query().cache_key()));
        assert!(!cache.supports_expiration());
    }

    #[test]
    fn cached_rows_serve_cache_only_reads() {
        let cache = active();
        let calls = AtomicUsize::new(0);
        cache.execute(&query(), Some(counting_producer(&calls))).unwrap();

        let mut rows = cache.execute(&query(), None).unwrap().unwrap();
        assert_eq!(rows.columns(), test_support::columns().as_slice());
        assert_eq!(collect_rows(rows.as_mut()).unwrap(), test_support::rows());
    }

    #[test]
    fn different_bindings_are_different_entries() {
        let cache = active();
        let calls = AtomicUsize::new(0);
        let other = Query::new(query().sql).bind(1_u32, SqlValue::Int(10));

        cache.execute(&query(), Some(counting_producer(&calls))).unwrap();
        cache.execute(&other, Some(counting_producer(&calls))).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.size().unwrap(), 2);
        assert!(cache.flush_one(&other.cache_key()).unwrap());
        assert_eq!(cache.size().unwrap(), 1);
        cache.flush_all().unwrap();
        assert_eq!(cache.size().unwrap(), 0);
    }

    #[test]
    fn inactive_cache_always_executes() {
        let cache = QueryCache::passthrough();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let mut rows = cache
                .execute(&query(), Some(counting_producer(&calls)))
                .unwrap()
                .unwrap();
            assert_eq!(collect_rows(rows.as_mut()).unwrap(), test_support::rows());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!cache.is_active());
        assert_eq!(cache.size().unwrap(), 0);
        assert!(!cache.exists(&query().cache_key()));
    }

    #[test]
    fn inactive_cache_without_producer_misses() {
        let cache = QueryCache::passthrough();
        assert!(matches!(
            cache.execute(&query(), None),
            Err(CacheError::NoCacheEntry { .. })
        ));
    }

    #[test]
    fn not_a_query_returns_none_in_both_modes() {
        for cache in [active(), QueryCache::passthrough()] {
            let result = cache
                .execute(
                    &Query::new("DELETE FROM users"),
                    Some(Box::new(|| Ok(Produced::NotAQuery))),
                )
                .unwrap();
            assert!(result.is_none());
            assert_eq!(cache.size().unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn inactive_config_builds_no_store() {
        let factory = StoreFactory::new(Handle::current());
        let config = CacheConfig {
            backend: BackendConfig::Memory {
                name: "unused".to_string(),
            },
            active: false,
            expiration: None,
        };
        let cache = QueryCache::from_config(&factory, &config).unwrap();
        assert!(!cache.is_active());
        assert!(factory.is_empty());

        let active = QueryCache::from_config(&factory, &CacheConfig::default()).unwrap();
        assert!(active.is_active());
        assert_eq!(factory.len(), 1);
    }
}
