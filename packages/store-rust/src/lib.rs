//! querycache store: per-key locked backing stores, expiration, and the
//! caching facade.

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod locks;
pub mod storage;
pub mod worker;

pub use cache::QueryCache;
pub use config::{BackendConfig, CacheConfig, ExpirationPolicy};
pub use error::CacheError;
pub use events::{ExpirationEventBus, ExpirationListener, ListenerId};
pub use locks::{LockCoordinator, LockError, LockGuard};
pub use storage::{
    BackingStore, DiskStore, ExpiringStore, MemoryStore, Producer, StoreFactory, SweepableStore,
};
