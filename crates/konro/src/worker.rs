//! Lifecycle handle for background watcher tasks.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::{sync::Notify, task::JoinHandle};

/// Handle to a long-running background task spawned on the Tokio runtime.
///
/// The task receives a running flag and a notifier; it is expected to loop
/// while the flag is set and wake on notification. Dropping the handle
/// initiates a graceful shutdown: the flag is cleared, the task is woken so
/// it can observe the flag, and the join is detached.
pub struct WorkerHandle {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    notifier: Arc<Notify>,
}

impl WorkerHandle {
    /// Spawns a background task via `task`, which receives the shared running
    /// flag and notifier and returns the task's join handle.
    pub fn new<F>(task: F) -> Self
    where
        F: FnOnce(Arc<AtomicBool>, Arc<Notify>) -> JoinHandle<()> + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let notifier = Arc::new(Notify::new());
        let handle = task(running.clone(), notifier.clone());

        Self {
            running,
            handle: Some(handle),
            notifier,
        }
    }

    /// Wakes the background task.
    pub fn notify(&self) {
        self.notifier.notify_one();
    }

    /// Returns the shared running flag.
    pub fn running(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Clears the running flag, wakes the task so it observes the flag, and
    /// detaches the join.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.notifier.notify_one();

        if let Some(handle) = self.handle.take() {
            tokio::spawn(async move {
                let _ = handle.await;
            });
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
