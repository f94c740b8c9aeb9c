//! Process-wide notification of evicted cache keys.
//!
//! [`ExpiringStore`](crate::storage::ExpiringStore) reports every key it
//! evicts to an [`ExpirationEventBus`], by default the one returned by
//! [`ExpirationEventBus::global`]. Listeners run synchronously on the evicting
//! thread, in registration order.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use querycache_core::CacheKey;

/// Subscriber to eviction events.
///
/// Used as `Arc<dyn ExpirationListener>`. Closures taking `&CacheKey`
/// implement it directly.
pub trait ExpirationListener: Send + Sync {
    /// Called once per evicted key.
    fn key_expired(&self, key: &CacheKey);
}

impl<F> ExpirationListener for F
where
    F: Fn(&CacheKey) + Send + Sync,
{
    fn key_expired(&self, key: &CacheKey) {
        self(key);
    }
}

/// Handle returned by [`ExpirationEventBus::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

static GLOBAL: LazyLock<Arc<ExpirationEventBus>> =
    LazyLock::new(|| Arc::new(ExpirationEventBus::new()));

/// Fan-out registry of [`ExpirationListener`]s.
#[derive(Default)]
pub struct ExpirationEventBus {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn ExpirationListener>)>>,
}

impl ExpirationEventBus {
    /// Creates a private bus. Most callers want [`global`](Self::global).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The bus shared by the whole process.
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    /// Registers `listener`. It is kept alive until removed or the bus is reset.
    pub fn add_listener(&self, listener: Arc<dyn ExpirationListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Unregisters a listener. Returns `false` if `id` was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Drops every listener.
    pub fn reset(&self) {
        self.listeners.write().clear();
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Notifies every listener that `key` was evicted.
    ///
    /// A panicking listener is logged and skipped; the others still run.
    pub fn key_expired(&self, key: &CacheKey) {
        // Snapshot so listeners may (un)register from inside the callback.
        let listeners: Vec<_> = self
            .listeners
            .read()
            .iter()
            .map(|(id, l)| (*id, Arc::clone(l)))
            .collect();

        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener.key_expired(key))).is_err() {
                tracing::warn!(key = %key, listener = id.0, "expiration listener panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    fn key(s: &str) -> CacheKey {
        CacheKey::parse(s).unwrap()
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, Arc<dyn ExpirationListener>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: Arc<dyn ExpirationListener> =
            Arc::new(move |k: &CacheKey| sink.lock().push(k.to_string()));
        (seen, listener)
    }

    #[test]
    fn every_listener_sees_every_key() {
        let bus = ExpirationEventBus::new();
        let (a, la) = recorder();
        let (b, lb) = recorder();
        bus.add_listener(la);
        bus.add_listener(lb);

        bus.key_expired(&key("one"));
        bus.key_expired(&key("two"));

        assert_eq!(*a.lock(), vec!["one", "two"]);
        assert_eq!(*b.lock(), vec!["one", "two"]);
    }

    #[test]
    fn panicking_listener_does_not_stop_the_rest() {
        let bus = ExpirationEventBus::new();
        bus.add_listener(Arc::new(|_: &CacheKey| panic!("listener bug")));
        let (seen, listener) = recorder();
        bus.add_listener(listener);

        bus.key_expired(&key("k"));

        assert_eq!(*seen.lock(), vec!["k"]);
    }

    #[test]
    fn removed_listener_is_not_called() {
        let bus = ExpirationEventBus::new();
        let (seen, listener) = recorder();
        let id = bus.add_listener(listener);

        assert!(bus.remove_listener(id));
        assert!(!bus.remove_listener(id));
        bus.key_expired(&key("k"));

        assert!(seen.lock().is_empty());
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn reset_clears_listeners() {
        let bus = ExpirationEventBus::new();
        bus.add_listener(recorder().1);
        bus.add_listener(recorder().1);
        assert_eq!(bus.listener_count(), 2);
        bus.reset();
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn global_is_a_single_instance() {
        assert!(Arc::ptr_eq(
            &ExpirationEventBus::global(),
            &ExpirationEventBus::global()
        ));
    }
}
