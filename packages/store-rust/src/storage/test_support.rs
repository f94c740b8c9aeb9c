//! Shared fixtures and contract checks for [`BackingStore`] implementations.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use querycache_core::{
    collect_rows, sql_types, CacheKey, ColumnDef, Produced, Query, Row, RowCursor, SqlValue,
    VecRowSource,
};

use crate::error::CacheError;
use crate::storage::engine::{BackingStore, Producer};

pub(crate) fn key(sql: &str) -> CacheKey {
    Query::new(sql).cache_key()
}

pub(crate) fn columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef::new("id", sql_types::INTEGER),
        ColumnDef::new("name", sql_types::VARCHAR),
    ]
}

pub(crate) fn rows() -> Vec<Row> {
    vec![
        vec![Some(SqlValue::Int(1)), Some(SqlValue::Text("ada".into()))],
        vec![Some(SqlValue::Int(2)), None],
    ]
}

/// Producer yielding [`rows`] and bumping `calls` each time it runs.
pub(crate) fn counting_producer(calls: &AtomicUsize) -> Producer<'_> {
    Box::new(move || {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(VecRowSource::new(columns(), rows()).produced())
    })
}

pub(crate) fn failing_producer() -> Producer<'static> {
    Box::new(|| Err(anyhow::anyhow!("backend unavailable")))
}

pub(crate) fn read_all(cursor: Option<RowCursor>) -> Vec<Row> {
    let mut cursor = cursor.expect("expected a cursor");
    collect_rows(&mut cursor).unwrap()
}

/// Publishes [`rows`] under `key`.
pub(crate) fn publish(store: &dyn BackingStore, key: &CacheKey) {
    let calls = AtomicUsize::new(0);
    store
        .get_or_populate(key, Some(counting_producer(&calls)))
        .unwrap();
}

pub(crate) fn populate_then_hit(store: &dyn BackingStore) {
    let k = key("SELECT id, name FROM users");
    let calls = AtomicUsize::new(0);

    let first = store.get_or_populate(&k, Some(counting_producer(&calls))).unwrap();
    assert_eq!(read_all(first), rows());
    assert!(store.exists(&k));
    assert_eq!(store.size().unwrap(), 1);

    let second = store.get_or_populate(&k, Some(counting_producer(&calls))).unwrap();
    assert_eq!(read_all(second), rows());
    let cached = store.get_or_populate(&k, None).unwrap();
    assert_eq!(cached.as_ref().map(|c| c.columns().to_vec()), Some(columns()));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.active_count(), 0);
    assert!(!store.is_active(&k));
}

pub(crate) fn cache_only_miss(store: &dyn BackingStore) {
    let k = CacheKey::parse("abc.jdbc_cache").unwrap();
    let err = store.get_or_populate(&k, None).unwrap_err();
    assert!(matches!(err, CacheError::NoCacheEntry { key } if key == k));
    assert!(!store.exists(&k));
    assert_eq!(store.size().unwrap(), 0);
}

pub(crate) fn not_a_query_publishes_nothing(store: &dyn BackingStore) {
    let k = key("UPDATE users SET name = 'x'");
    let result = store
        .get_or_populate(&k, Some(Box::new(|| Ok(Produced::NotAQuery))))
        .unwrap();
    assert!(result.is_none());
    assert!(!store.exists(&k));
    assert_eq!(store.active_count(), 0);
}

pub(crate) fn failed_population_leaves_no_entry(store: &dyn BackingStore) {
    let k = key("SELECT broken");
    let err = store.get_or_populate(&k, Some(failing_producer())).unwrap_err();
    match err {
        CacheError::PopulationFailure { key, source } => {
            assert_eq!(key, k);
            assert_eq!(source.to_string(), "backend unavailable");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(!store.exists(&k));
    assert_eq!(store.size().unwrap(), 0);
    assert_eq!(store.active_count(), 0);

    // A row source failing mid-stream is a population failure too.
    struct Exploding(Vec<ColumnDef>, usize);
    impl querycache_core::RowSource for Exploding {
        fn columns(&self) -> &[ColumnDef] {
            &self.0
        }
        fn next_row(&mut self) -> anyhow::Result<Option<Row>> {
            self.1 += 1;
            if self.1 > 1 {
                anyhow::bail!("connection reset");
            }
            Ok(Some(vec![Some(SqlValue::Int(1)), None]))
        }
    }
    let err = store
        .get_or_populate(
            &k,
            Some(Box::new(|| Ok(Produced::Rows(Box::new(Exploding(columns(), 0)))))),
        )
        .unwrap_err();
    assert!(matches!(err, CacheError::PopulationFailure { .. }));
    assert!(!store.exists(&k));
}

pub(crate) fn flush_semantics(store: &dyn BackingStore) {
    let a = key("SELECT a");
    let b = key("SELECT b");
    let c = key("SELECT c");
    for k in [&a, &b, &c] {
        publish(store, k);
    }
    assert_eq!(store.size().unwrap(), 3);

    assert!(store.flush_one(&b).unwrap());
    assert!(!store.flush_one(&b).unwrap());
    assert!(store.exists(&a));
    assert!(!store.exists(&b));
    assert!(store.exists(&c));
    assert_eq!(store.size().unwrap(), 2);

    store.flush_all().unwrap();
    assert_eq!(store.size().unwrap(), 0);
    assert!(!store.exists(&a));
    assert!(!store.exists(&c));
}

/// N threads race on one uncached key; the producer must run exactly once and
/// every caller must read the same rows.
pub(crate) fn at_most_one_populate(store: Arc<dyn BackingStore>) {
    const CALLERS: usize = 8;

    let k = key("SELECT slow");
    let calls = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(CALLERS));

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let store = Arc::clone(&store);
            let calls = Arc::clone(&calls);
            let barrier = Arc::clone(&barrier);
            let k = k.clone();
            thread::spawn(move || {
                barrier.wait();
                let producer: Producer<'_> = Box::new(|| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(std::time::Duration::from_millis(20));
                    Ok(VecRowSource::new(columns(), rows()).produced())
                });
                read_all(store.get_or_populate(&k, Some(producer)).unwrap())
            })
        })
        .collect();

    for h in handles {
        assert_eq!(h.join().unwrap(), rows());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.active_count(), 0);
    assert_eq!(store.size().unwrap(), 1);
}
