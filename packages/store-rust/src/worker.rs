//! Tokio task that drives cache sweeps.
//!
//! A [`BackgroundWorker`] owns one spawned task running a [`BackgroundRunnable`]:
//! queued tasks arrive over a bounded channel and `on_tick` fires on a fixed
//! interval. The expiring store uses it for its periodic and requested sweeps.

use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

/// Capacity of the task channel. `try_send` beyond it fails with `Full`.
const TASK_CHANNEL_CAPACITY: usize = 16;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Trait for task handlers executed by `BackgroundWorker`.
///
/// Implementors define how individual tasks are processed, what happens on each
/// periodic tick, and how to clean up on shutdown.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// The type of task this runnable processes.
    type Task: Send + 'static;

    /// Process a single task.
    async fn run(&mut self, task: Self::Task);

    /// Called periodically (on each tick interval). Default is a no-op.
    async fn on_tick(&mut self) {}

    /// Called once when the worker is shutting down. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Handle to a spawned worker task.
///
/// Tasks and ticks are handled one at a time, so a runnable never sees two
/// calls overlap. `shutdown()` runs once after the stop signal or when every
/// sender is gone. Dropping the handle signals stop without waiting.
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::Sender<R::Task>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Start the background worker on `runtime` with the given tick interval.
    ///
    /// The first tick fires one full interval after start.
    ///
    /// # Panics
    ///
    /// Panics if `tick_interval` is zero.
    pub fn start(runtime: &Handle, mut runnable: R, tick_interval: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(TASK_CHANNEL_CAPACITY);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = runtime.spawn(async move {
            let mut ticks = tokio::time::interval_at(
                tokio::time::Instant::now() + tick_interval,
                tick_interval,
            );
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    task = rx.recv() => {
                        match task {
                            Some(t) => runnable.run(t).await,
                            None => break, // Channel closed.
                        }
                    }
                    _ = ticks.tick() => {
                        runnable.on_tick().await;
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }

            runnable.shutdown().await;
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// A sender for queueing tasks, or `None` once the worker is stopped.
    ///
    /// Clones outlive the worker handle but start failing once the worker
    /// task has exited.
    #[must_use]
    pub fn sender(&self) -> Option<mpsc::Sender<R::Task>> {
        self.tx.clone()
    }

    /// Whether the worker has not been stopped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the worker gracefully, waiting for the worker task to complete.
    pub async fn stop(&mut self) {
        self.signal_stop();
        // Wait for the worker task to finish.
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    fn signal_stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        // Close the task channel.
        self.tx.take();
    }
}

impl<R: BackgroundRunnable> Drop for BackgroundWorker<R> {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[derive(Default, Clone)]
    struct Counters {
        run: Arc<AtomicU32>,
        tick: Arc<AtomicU32>,
        shutdown: Arc<AtomicU32>,
    }

    struct CountingRunnable(Counters);

    #[async_trait]
    impl BackgroundRunnable for CountingRunnable {
        type Task = String;

        async fn run(&mut self, _task: String) {
            self.0.run.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_tick(&mut self) {
            self.0.tick.fetch_add(1, Ordering::SeqCst);
        }

        async fn shutdown(&mut self) {
            self.0.shutdown.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn start_submit_and_stop() {
        let counters = Counters::default();
        let mut worker = BackgroundWorker::start(
            &Handle::current(),
            CountingRunnable(counters.clone()),
            Duration::from_secs(60),
        );

        let tx = worker.sender().unwrap();
        tx.send("task-1".to_string()).await.unwrap();
        tx.send("task-2".to_string()).await.unwrap();
        assert!(tx.try_send("task-3".to_string()).is_ok());

        // Give the worker time to process tasks.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(counters.run.load(Ordering::SeqCst), 3);
        assert!(worker.is_running());

        worker.stop().await;

        assert_eq!(counters.shutdown.load(Ordering::SeqCst), 1);
        assert!(!worker.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn tick_fires_periodically() {
        let counters = Counters::default();
        let mut worker = BackgroundWorker::start(
            &Handle::current(),
            CountingRunnable(counters.clone()),
            Duration::from_millis(20),
        );

        // Paused time auto-advances while the test task sleeps.
        tokio::time::sleep(Duration::from_millis(105)).await;
        worker.stop().await;

        assert!(counters.tick.load(Ordering::SeqCst) >= 4);
    }

    #[tokio::test]
    async fn no_tick_at_startup() {
        let counters = Counters::default();
        let mut worker = BackgroundWorker::start(
            &Handle::current(),
            CountingRunnable(counters.clone()),
            Duration::from_secs(3600),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        worker.stop().await;
        assert_eq!(counters.tick.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn senders_fail_after_stop() {
        let counters = Counters::default();
        let mut worker = BackgroundWorker::start(
            &Handle::current(),
            CountingRunnable(counters.clone()),
            Duration::from_secs(60),
        );
        let held = worker.sender().unwrap();
        worker.stop().await;

        assert!(worker.sender().is_none());
        assert!(held.try_send("late-task".to_string()).is_err());
        assert!(held.send("late-task".to_string()).await.is_err());
        assert_eq!(counters.run.load(Ordering::SeqCst), 0);
        assert_eq!(counters.shutdown.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn drop_signals_shutdown() {
        let counters = Counters::default();
        let worker = BackgroundWorker::start(
            &Handle::current(),
            CountingRunnable(counters.clone()),
            Duration::from_secs(60),
        );
        drop(worker);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counters.shutdown.load(Ordering::SeqCst), 1);
    }
}
