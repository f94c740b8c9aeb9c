//! Named, reference-counted mutual exclusion.
//!
//! [`LockCoordinator`] hands out exclusive holds on arbitrary names. A name is
//! present in the registry exactly while at least one caller holds it or waits
//! for it. Both the refcount increment in [`acquire`](LockCoordinator::acquire)
//! and the decrement-unlock-remove sequence in
//! [`release`](LockCoordinator::release) run under the registry shard lock for
//! that name, so a slot can never be observed unlocked with a zero count.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

/// Errors from [`LockCoordinator::release`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("lock {name:?} is not registered")]
    NotRegistered { name: String },
    #[error("lock {name:?} is registered but not held")]
    NotHeld { name: String },
}

#[derive(Default)]
struct LockEntry {
    held: Mutex<bool>,
    released: Condvar,
}

struct LockSlot {
    refcount: usize,
    entry: Arc<LockEntry>,
}

/// Registry of named locks.
#[derive(Default)]
pub struct LockCoordinator {
    slots: DashMap<String, LockSlot>,
}

impl LockCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until `name` is held exclusively by the caller.
    ///
    /// Pair with [`release`](Self::release), or use [`lock`](Self::lock) /
    /// [`with_lock`](Self::with_lock) to release automatically.
    pub fn acquire(&self, name: &str) {
        let entry = {
            let mut slot = self
                .slots
                .entry(name.to_string())
                .or_insert_with(|| LockSlot {
                    refcount: 0,
                    entry: Arc::new(LockEntry::default()),
                });
            slot.refcount += 1;
            Arc::clone(&slot.entry)
        };

        let mut held = entry.held.lock();
        while *held {
            entry.released.wait(&mut held);
        }
        *held = true;
    }

    /// Releases a hold obtained with [`acquire`](Self::acquire).
    ///
    /// # Errors
    ///
    /// [`LockError::NotRegistered`] if nobody holds or waits for `name`,
    /// [`LockError::NotHeld`] if only waiters are registered.
    pub fn release(&self, name: &str) -> Result<(), LockError> {
        match self.slots.entry(name.to_string()) {
            Entry::Vacant(_) => Err(LockError::NotRegistered {
                name: name.to_string(),
            }),
            Entry::Occupied(mut occupied) => {
                let remaining = {
                    let slot = occupied.get_mut();
                    let mut held = slot.entry.held.lock();
                    if !*held {
                        return Err(LockError::NotHeld {
                            name: name.to_string(),
                        });
                    }
                    *held = false;
                    slot.entry.released.notify_one();
                    slot.refcount -= 1;
                    slot.refcount
                };
                if remaining == 0 {
                    occupied.remove();
                }
                Ok(())
            }
        }
    }

    /// Acquires `name` and returns a guard that releases it on drop.
    #[must_use = "the lock is released as soon as the guard is dropped"]
    pub fn lock(&self, name: &str) -> LockGuard<'_> {
        self.acquire(name);
        LockGuard {
            coordinator: self,
            name: name.to_string(),
        }
    }

    /// Runs `body` while holding `name`. The hold is released on every exit
    /// path, including unwinding.
    pub fn with_lock<T>(&self, name: &str, body: impl FnOnce() -> T) -> T {
        let _guard = self.lock(name);
        body()
    }

    /// Whether `name` currently has holders or waiters.
    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// Number of names that currently have holders or waiters.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.slots.len()
    }
}

/// Hold on a named lock; released on drop.
pub struct LockGuard<'a> {
    coordinator: &'a LockCoordinator,
    name: String,
}

impl LockGuard<'_> {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.coordinator.release(&self.name) {
            tracing::warn!(lock = %self.name, error = %e, "failed to release lock");
        }
    }
}
