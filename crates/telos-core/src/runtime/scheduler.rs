//! Background task scheduler
//!
//! Named periodic tasks on the tokio pool, all observing a shared shutdown
//! signal at every suspension point. Wake-ups are bounded by the task
//! interval; `shutdown` flips the signal and joins every task, so slots are
//! guaranteed to be released.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Named periodic tasks with cooperative cancellation
pub struct Scheduler {
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Create a scheduler with the shutdown signal unset
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// A receiver for the shared shutdown signal
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Whether shutdown has been requested
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Spawn a named periodic task. `work` is invoked every `interval`;
    /// the sleep between invocations is the cancellation point.
    pub fn spawn_periodic<F, Fut>(&self, name: &str, interval: Duration, work: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let mut shutdown = self.shutdown_signal();
        let task_name = name.to_string();
        let loop_name = task_name.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        work().await;
                    }
                    changed = shutdown.changed() => {
                        let stop = changed.is_err() || *shutdown.borrow();
                        if stop {
                            debug!(task = %loop_name, "background task stopping");
                            break;
                        }
                    }
                }
            }
        });

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push((task_name, handle));
        }
    }

    /// Names of the registered tasks
    pub fn task_names(&self) -> Vec<String> {
        self.tasks
            .lock()
            .map(|tasks| tasks.iter().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default()
    }

    /// Signal shutdown and join every task
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<(String, JoinHandle<()>)> = {
            let mut tasks = match self.tasks.lock() {
                Ok(t) => t,
                Err(_) => return,
            };
            tasks.drain(..).collect()
        };

        for (name, handle) in handles {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(task = %name, error = %e, "background task panicked");
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_periodic_task_fires_and_stops() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicU32::new(0));

        let task_counter = Arc::clone(&counter);
        scheduler.spawn_periodic("ticker", Duration::from_millis(5), move || {
            let counter = Arc::clone(&task_counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(40)).await;
        scheduler.shutdown().await;
        let fired = counter.load(Ordering::SeqCst);
        assert!(fired >= 2, "expected several ticks, got {fired}");

        // No more ticks after shutdown
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), fired);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_long_interval_immediately() {
        let scheduler = Scheduler::new();
        scheduler.spawn_periodic("slow", Duration::from_secs(3600), || async {});

        let started = std::time::Instant::now();
        scheduler.shutdown().await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_task_names_registered() {
        let scheduler = Scheduler::new();
        scheduler.spawn_periodic("a", Duration::from_secs(60), || async {});
        scheduler.spawn_periodic("b", Duration::from_secs(60), || async {});

        let mut names = scheduler.task_names();
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
        scheduler.shutdown().await;
    }
}
