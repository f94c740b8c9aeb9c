//! Backing stores for encoded query results.
//!
//! - [`BackingStore`] / [`SweepableStore`]: the store contracts
//! - [`engines`]: in-memory ([`MemoryStore`]) and on-disk ([`DiskStore`]) stores
//! - [`ExpiringStore`]: age/size decorator with a background sweep
//! - [`StoreFactory`]: shared stores per memory namespace or disk root

pub mod clock;
pub mod engine;
pub mod engines;
pub mod expiring;
pub mod factory;

#[cfg(test)]
pub(crate) mod test_support;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{BackingStore, EntryInfo, Producer, SweepableStore};
pub use engines::{DiskStore, MemoryStore};
pub use expiring::{ExpiringStore, ExpiringStoreBuilder, SweepReport, SweepTask};
pub use factory::StoreFactory;
