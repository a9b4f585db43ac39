//! Periodic removal of surplus warm pods.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use warmpool_metrics::PoolEvent;
use warmpool_orchestrator::LifecycleController;
use warmpool_state::PoolQueue;

/// Pops warm pods beyond `min_idle` from the tail of the queue and deletes
/// them. Warm pods are interchangeable, so tail eviction is fine.
pub struct Trimmer {
    lifecycle: LifecycleController,
    min_idle: usize,
}

impl Trimmer {
    pub fn new(lifecycle: LifecycleController, min_idle: usize) -> Self {
        Self {
            lifecycle,
            min_idle,
        }
    }

    /// One trim pass. Returns how many pods were removed from the pool.
    pub async fn trim_once(&self) -> usize {
        let store = self.lifecycle.store();
        let idle = match store.length(PoolQueue::Warm).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "store unreachable, skipping trim");
                return 0;
            }
        };

        if idle <= self.min_idle {
            debug!(idle, min_idle = self.min_idle, "nothing to trim");
            return 0;
        }

        let excess = idle - self.min_idle;
        let mut trimmed = 0;
        for _ in 0..excess {
            match store.dequeue_back(PoolQueue::Warm).await {
                Ok(Some(pod)) => {
                    self.lifecycle.delete_pod(&pod.name, &pod).await;
                    self.lifecycle.metrics().record(PoolEvent::PodTrimmed);
                    trimmed += 1;
                }
                // Drained concurrently by dispatch.
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, trimmed, "store error while trimming");
                    break;
                }
            }
        }

        info!(trimmed, idle, min_idle = self.min_idle, "trimmed warm pool");
        trimmed
    }

    /// Trim every `interval` until shutdown.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "trimmer started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.trim_once().await;
                }
                _ = shutdown.changed() => {
                    info!("trimmer shutting down");
                    break;
                }
            }
        }
    }
}
