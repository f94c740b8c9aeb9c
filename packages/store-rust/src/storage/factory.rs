//! Factory resolving a [`CacheConfig`] into a shared [`BackingStore`].
//!
//! [`StoreFactory`] is the dependency injection point for the caching facade.
//! Memory stores are shared per namespace name and disk stores per root
//! directory, so every cache configured with the same location sees the same
//! entries and the same population locks.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::runtime::Handle;

use crate::config::{BackendConfig, CacheConfig, ExpirationPolicy};
use crate::error::CacheError;
use crate::storage::engine::{BackingStore, SweepableStore};
use crate::storage::engines::{DiskStore, MemoryStore};
use crate::storage::expiring::ExpiringStore;

/// Creates and remembers backing stores by location.
///
/// The expiration policy of the first configuration that names a location
/// wins; later configurations for the same location get the existing store.
pub struct StoreFactory {
    runtime: Handle,
    memory: DashMap<String, Arc<dyn BackingStore>>,
    disk: DashMap<PathBuf, Arc<dyn BackingStore>>,
}

impl StoreFactory {
    /// Creates a factory whose expiring stores run their sweeps on `runtime`.
    #[must_use]
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            memory: DashMap::new(),
            disk: DashMap::new(),
        }
    }

    /// Returns the store for `config.backend`, creating it on first use.
    ///
    /// # Errors
    ///
    /// [`CacheError::Configuration`] for an empty name or root, an unusable
    /// root directory, or an invalid expiration policy.
    pub fn store_for(&self, config: &CacheConfig) -> Result<Arc<dyn BackingStore>, CacheError> {
        let policy = config.expiration.as_ref();
        match &config.backend {
            BackendConfig::Memory { name } => {
                if name.trim().is_empty() {
                    return Err(CacheError::Configuration(
                        "memory store name must not be empty".to_string(),
                    ));
                }
                match self.memory.entry(name.clone()) {
                    Entry::Occupied(existing) => Ok(Arc::clone(existing.get())),
                    Entry::Vacant(slot) => {
                        let store = self.wrap(Arc::new(MemoryStore::new(name.clone())?), policy)?;
                        slot.insert(Arc::clone(&store));
                        Ok(store)
                    }
                }
            }
            BackendConfig::Disk { root } => {
                if root.as_os_str().is_empty() {
                    return Err(CacheError::Configuration(
                        "disk store root must not be empty".to_string(),
                    ));
                }
                match self.disk.entry(root.clone()) {
                    Entry::Occupied(existing) => Ok(Arc::clone(existing.get())),
                    Entry::Vacant(slot) => {
                        let store = self.wrap(Arc::new(DiskStore::new(root.clone())?), policy)?;
                        slot.insert(Arc::clone(&store));
                        Ok(store)
                    }
                }
            }
        }
    }

    /// Number of stores created so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.memory.len() + self.disk.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every store. Stores still referenced elsewhere stay alive; the
    /// next [`store_for`](Self::store_for) creates fresh ones.
    pub fn clear(&self) {
        self.memory.clear();
        self.disk.clear();
    }

    fn wrap<S: SweepableStore>(
        &self,
        store: Arc<S>,
        policy: Option<&ExpirationPolicy>,
    ) -> Result<Arc<dyn BackingStore>, CacheError> {
        match policy {
            Some(policy) => Ok(Arc::new(ExpiringStore::new(
                store,
                policy.clone(),
                &self.runtime,
            )?)),
            None => Ok(store),
        }
    }
}
