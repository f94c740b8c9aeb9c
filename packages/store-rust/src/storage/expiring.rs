//! Age- and size-bounded decorator over a [`SweepableStore`].
//!
//! [`ExpiringStore`] layers three mechanisms around the wrapped store:
//!
//! - a periodic sweep on a [`BackgroundWorker`] that removes every entry older
//!   than `max_age` and then, if the store still holds more than `max_size`
//!   entries, the single oldest one;
//! - an opportunistic purge of the requested key before each
//!   [`get_or_populate`](BackingStore::get_or_populate), so a stale entry is
//!   never served between sweeps;
//! - a non-blocking trigger after each request that asks the worker for a
//!   size-only sweep when no sweep is running.
//!
//! Every eviction is reported on an [`ExpirationEventBus`]. The policy can be
//! changed while the store is in use.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use arc_swap::{ArcSwap, ArcSwapOption};
use async_trait::async_trait;
use parking_lot::Mutex;
use querycache_core::{CacheKey, RowCursor};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::config::ExpirationPolicy;
use crate::error::CacheError;
use crate::events::ExpirationEventBus;
use crate::storage::clock::{Clock, SystemClock};
use crate::storage::engine::{BackingStore, Producer, SweepableStore};
use crate::worker::{BackgroundRunnable, BackgroundWorker};

// ---------------------------------------------------------------------------
// SweepTask / SweepReport
// ---------------------------------------------------------------------------

/// Work items for the sweep worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepTask {
    /// Apply both the age and the size limit.
    Full,
    /// Sweep only if the store holds more than `max_size` entries and no other
    /// sweep is running.
    IfOversized,
}

/// Evictions performed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries removed for exceeding `max_age`.
    pub expired: usize,
    /// Entries removed for exceeding `max_size` (at most one per sweep).
    pub oversized: usize,
}

#[derive(Debug, Clone, Copy)]
enum EvictionReason {
    Age,
    Size,
    Purge,
}

impl EvictionReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Age => "age",
            Self::Size => "size",
            Self::Purge => "purge",
        }
    }
}

fn is_expired(max_age: Option<Duration>, last_modified: SystemTime, now: SystemTime) -> bool {
    max_age.is_some_and(|max_age| {
        now.duration_since(last_modified)
            .is_ok_and(|age| age > max_age)
    })
}

// ---------------------------------------------------------------------------
// ExpiryCore
// ---------------------------------------------------------------------------

/// State shared between the store facade and its sweep worker.
struct ExpiryCore {
    inner: Arc<dyn SweepableStore>,
    policy: ArcSwap<ExpirationPolicy>,
    clock: Arc<dyn Clock>,
    bus: Arc<ExpirationEventBus>,
    /// Held for the whole of a sweep; at most one sweep runs at a time.
    sweep_lock: Mutex<()>,
}

impl ExpiryCore {
    fn sweep(&self) -> Result<SweepReport, CacheError> {
        let _sweeping = self.sweep_lock.lock();
        self.sweep_locked()
    }

    fn sweep_if_oversized(&self) -> Result<Option<SweepReport>, CacheError> {
        let Some(max_size) = self.policy.load().max_size else {
            return Ok(None);
        };
        let Some(_sweeping) = self.sweep_lock.try_lock() else {
            return Ok(None);
        };
        if self.inner.size()? <= max_size {
            return Ok(None);
        }
        self.sweep_locked().map(Some)
    }

    fn sweep_locked(&self) -> Result<SweepReport, CacheError> {
        let policy = self.policy.load_full();
        let now = self.clock.now();
        let mut entries = self.inner.entries()?;
        let mut report = SweepReport::default();

        if policy.max_age.is_some() {
            entries.retain(|entry| {
                if !is_expired(policy.max_age, entry.last_modified, now) {
                    return true;
                }
                if self.evict(&entry.key, EvictionReason::Age) {
                    report.expired += 1;
                }
                false
            });
        }

        if let Some(max_size) = policy.max_size {
            if entries.len() > max_size {
                let oldest = entries.iter().min_by_key(|e| e.last_modified);
                if let Some(oldest) = oldest {
                    if self.evict(&oldest.key, EvictionReason::Size) {
                        report.oversized += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    /// Removes `key` if it has outlived `max_age`.
    ///
    /// Fails if the key is stale and could not be removed, so a stale entry is
    /// never handed on to the wrapped store.
    fn purge(&self, key: &CacheKey) -> Result<(), CacheError> {
        let max_age = self.policy.load().max_age;
        if max_age.is_none() {
            return Ok(());
        }
        if let Some(last_modified) = self.inner.last_modified(key) {
            if is_expired(max_age, last_modified, self.clock.now()) {
                self.remove(key, EvictionReason::Purge)?;
            }
        }
        Ok(())
    }

    fn remove(&self, key: &CacheKey, reason: EvictionReason) -> Result<bool, CacheError> {
        let removed = self.inner.flush_one(key)?;
        if removed {
            metrics::counter!("querycache_evictions_total", "reason" => reason.as_str())
                .increment(1);
            tracing::debug!(key = %key, reason = reason.as_str(), "evicted cache entry");
            self.bus.key_expired(key);
        }
        Ok(removed)
    }

    /// Best effort: failures are logged and reported as "not evicted".
    fn evict(&self, key: &CacheKey, reason: EvictionReason) -> bool {
        self.remove(key, reason).unwrap_or_else(|e| {
            tracing::warn!(key = %key, error = %e, "failed to evict cache entry");
            false
        })
    }
}

// ---------------------------------------------------------------------------
// SweepRunnable
// ---------------------------------------------------------------------------

struct SweepRunnable {
    core: Arc<ExpiryCore>,
}

impl SweepRunnable {
    async fn sweep(&self, task: SweepTask) {
        let core = Arc::clone(&self.core);
        let outcome = tokio::task::spawn_blocking(move || match task {
            SweepTask::Full => core.sweep().map(Some),
            SweepTask::IfOversized => core.sweep_if_oversized(),
        })
        .await;

        match outcome {
            Ok(Ok(Some(report))) => {
                tracing::debug!(
                    task = ?task,
                    expired = report.expired,
                    oversized = report.oversized,
                    "cache sweep complete"
                );
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => tracing::warn!(task = ?task, error = %e, "cache sweep failed"),
            Err(e) => tracing::warn!(task = ?task, error = %e, "cache sweep panicked"),
        }
    }
}

#[async_trait]
impl BackgroundRunnable for SweepRunnable {
    type Task = SweepTask;

    async fn run(&mut self, task: SweepTask) {
        self.sweep(task).await;
    }

    async fn on_tick(&mut self) {
        self.sweep(SweepTask::Full).await;
    }

    async fn shutdown(&mut self) {
        tracing::info!("cache sweep worker stopped");
    }
}

fn spawn_sweeper(
    runtime: &Handle,
    core: &Arc<ExpiryCore>,
    gc_interval: Duration,
) -> BackgroundWorker<SweepRunnable> {
    BackgroundWorker::start(
        runtime,
        SweepRunnable {
            core: Arc::clone(core),
        },
        gc_interval,
    )
}

// ---------------------------------------------------------------------------
// ExpiringStore
// ---------------------------------------------------------------------------

/// Builder for [`ExpiringStore`].
pub struct ExpiringStoreBuilder {
    inner: Arc<dyn SweepableStore>,
    policy: ExpirationPolicy,
    clock: Arc<dyn Clock>,
    bus: Option<Arc<ExpirationEventBus>>,
}

impl ExpiringStoreBuilder {
    /// Time source for age checks. Defaults to [`SystemClock`].
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Bus that receives eviction events. Defaults to
    /// [`ExpirationEventBus::global`].
    #[must_use]
    pub fn event_bus(mut self, bus: Arc<ExpirationEventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Builds the store and starts its sweep worker on `runtime`.
    ///
    /// # Errors
    ///
    /// [`CacheError::Configuration`] if the policy is invalid.
    pub fn start(self, runtime: &Handle) -> Result<ExpiringStore, CacheError> {
        self.policy.validate()?;
        let gc_interval = self.policy.gc_interval;
        tracing::info!(
            max_age = ?self.policy.max_age,
            max_size = ?self.policy.max_size,
            gc_interval = ?gc_interval,
            "expiring cache store started"
        );
        let core = Arc::new(ExpiryCore {
            inner: self.inner,
            policy: ArcSwap::from_pointee(self.policy),
            clock: self.clock,
            bus: self.bus.unwrap_or_else(ExpirationEventBus::global),
            sweep_lock: Mutex::new(()),
        });
        let worker = spawn_sweeper(runtime, &core, gc_interval);
        Ok(ExpiringStore {
            core,
            runtime: runtime.clone(),
            trigger: ArcSwapOption::from(worker.sender().map(Arc::new)),
            worker: Mutex::new(Some(worker)),
        })
    }
}

/// [`BackingStore`] decorator enforcing an [`ExpirationPolicy`].
///
/// Dropping the store signals its sweep worker to stop;
/// [`shutdown`](Self::shutdown) also waits for it.
pub struct ExpiringStore {
    core: Arc<ExpiryCore>,
    runtime: Handle,
    /// Read on every request; swapped when the worker restarts or stops.
    trigger: ArcSwapOption<mpsc::Sender<SweepTask>>,
    worker: Mutex<Option<BackgroundWorker<SweepRunnable>>>,
}

impl ExpiringStore {
    /// Starts building a decorator around `inner`.
    #[must_use]
    pub fn builder(inner: Arc<dyn SweepableStore>, policy: ExpirationPolicy) -> ExpiringStoreBuilder {
        ExpiringStoreBuilder {
            inner,
            policy,
            clock: Arc::new(SystemClock),
            bus: None,
        }
    }

    /// Wraps `inner` with the system clock and the global event bus.
    ///
    /// # Errors
    ///
    /// [`CacheError::Configuration`] if the policy is invalid.
    pub fn new(
        inner: Arc<dyn SweepableStore>,
        policy: ExpirationPolicy,
        runtime: &Handle,
    ) -> Result<Self, CacheError> {
        Self::builder(inner, policy).start(runtime)
    }

    /// Snapshot of the policy currently in force.
    #[must_use]
    pub fn policy(&self) -> ExpirationPolicy {
        ExpirationPolicy::clone(&self.core.policy.load())
    }

    /// Changes the maximum entry age. Applies from the next request or sweep.
    pub fn set_max_age(&self, max_age: Option<Duration>) {
        self.update_policy(|policy| policy.max_age = max_age);
    }

    /// Changes the maximum entry count and asks the worker to enforce it.
    pub fn set_max_size(&self, max_size: Option<usize>) {
        self.update_policy(|policy| policy.max_size = max_size);
        self.request_size_sweep();
    }

    /// Changes the sweep interval, restarting the worker's tick. A stopped
    /// worker stays stopped; only the policy is updated.
    ///
    /// # Errors
    ///
    /// [`CacheError::Configuration`] if `gc_interval` is zero. The policy is
    /// left unchanged then.
    pub fn set_gc_interval(&self, gc_interval: Duration) -> Result<(), CacheError> {
        self.policy().with_gc_interval(gc_interval).validate()?;

        let mut worker = self.worker.lock();
        self.update_policy(|policy| policy.gc_interval = gc_interval);
        if worker.is_some() {
            let restarted = spawn_sweeper(&self.runtime, &self.core, gc_interval);
            self.trigger.store(restarted.sender().map(Arc::new));
            // Dropping the previous worker signals it to stop.
            *worker = Some(restarted);
            tracing::info!(gc_interval = ?gc_interval, "cache sweep interval changed");
        }
        Ok(())
    }

    /// Runs a full sweep on the calling thread, waiting for any sweep already
    /// in progress.
    ///
    /// # Errors
    ///
    /// [`CacheError::Storage`] if the wrapped store cannot be enumerated.
    pub fn sweep_now(&self) -> Result<SweepReport, CacheError> {
        self.core.sweep()
    }

    /// Whether the sweep worker is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|worker| worker.is_running())
    }

    /// Stops the sweep worker and waits for it to finish. Store operations keep
    /// working afterwards; only scheduled and requested sweeps stop.
    pub async fn shutdown(&self) {
        self.trigger.store(None);
        let worker = self.worker.lock().take();
        if let Some(mut worker) = worker {
            worker.stop().await;
        }
    }

    fn update_policy(&self, change: impl Fn(&mut ExpirationPolicy)) {
        self.core.policy.rcu(|current| {
            let mut next = ExpirationPolicy::clone(current);
            change(&mut next);
            next
        });
    }

    fn request_size_sweep(&self) {
        if self.core.policy.load().max_size.is_none() || self.core.sweep_lock.is_locked() {
            return;
        }
        let trigger = self.trigger.load();
        if let Some(tx) = &*trigger {
            // A full channel already has a sweep queued.
            let _ = tx.try_send(SweepTask::IfOversized);
        }
    }
}

impl BackingStore for ExpiringStore {
    fn get_or_populate(
        &self,
        key: &CacheKey,
        producer: Option<Producer<'_>>,
    ) -> Result<Option<RowCursor>, CacheError> {
        self.core.purge(key)?;
        let result = self.core.inner.get_or_populate(key, producer);
        self.request_size_sweep();
        result
    }

    fn exists(&self, key: &CacheKey) -> bool {
        self.core.inner.exists(key)
    }

    fn flush_all(&self) -> Result<(), CacheError> {
        self.core.inner.flush_all()
    }

    fn flush_one(&self, key: &CacheKey) -> Result<bool, CacheError> {
        self.core.inner.flush_one(key)
    }

    fn size(&self) -> Result<usize, CacheError> {
        self.core.inner.size()
    }

    fn active_count(&self) -> usize {
        self.core.inner.active_count()
    }

    fn is_active(&self, key: &CacheKey) -> bool {
        self.core.inner.is_active(key)
    }

    fn supports_expiration(&self) -> bool {
        true
    }
}
