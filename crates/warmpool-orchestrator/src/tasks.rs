//! Bounded pool for fire-and-forget pod operations.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Tracks every spawned create/delete so shutdown can await them.
///
/// `spawn` never blocks the caller; at most `max_concurrent` operations run
/// at once and the rest wait for a permit inside their own task.
#[derive(Clone)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
    permits: Arc<Semaphore>,
}

impl BackgroundTasks {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            tracker: TaskTracker::new(),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tracker.is_closed() {
            debug!("background pool closed, dropping task");
            return;
        }
        let permits = Arc::clone(&self.permits);
        self.tracker.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            fut.await;
        });
    }

    /// Tasks spawned and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for everything spawned so far, then accept new work again.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Stop accepting work and wait up to `grace` for in-flight tasks.
    /// Returns `false` if the grace period ran out.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tracker.close();
        let pending = self.tracker.len();
        if pending > 0 {
            debug!(pending, "waiting for background pod operations");
        }
        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    pending = self.tracker.len(),
                    "background pod operations still running at shutdown"
                );
                false
            }
        }
    }
}
