//! Demand-driven pool reconciler.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{Notify, watch};
use tracing::{debug, info, warn};

use warmpool_orchestrator::LifecycleController;
use warmpool_state::{PoolCounts, PoolQueue, pool_counts};

/// Process-wide pool bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLimits {
    /// Warm pods to keep ready.
    pub min_idle: usize,
    /// Cap on warm + active + booting pods.
    pub max_pods: usize,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            min_idle: 3,
            max_pods: 20,
        }
    }
}

/// What a single cycle decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Store unreachable; nothing was read or created.
    StoreUnavailable,
    /// Global cap reached.
    AtCapacity { total: usize },
    /// Enough warm or booting pods already.
    Sufficient { idle: usize, booting: usize },
    /// Creates launched in the background.
    Scaling { launched: usize },
}

#[derive(Debug, Default, Clone, Copy)]
struct Unqueued {
    booting: usize,
    claimed: usize,
}

/// Non-blocking, coalescing handle that requests a reconcile cycle.
///
/// Any number of `trigger()` calls made while a cycle is running collapse
/// into one follow-up cycle.
#[derive(Clone, Default)]
pub struct ReconcileTrigger {
    notify: Arc<Notify>,
}

impl ReconcileTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.notify.notify_one();
    }

    async fn wait(&self) {
        self.notify.notified().await;
    }
}

pub struct Reconciler {
    lifecycle: LifecycleController,
    limits: PoolLimits,
    trigger: ReconcileTrigger,
}

impl Reconciler {
    pub fn new(lifecycle: LifecycleController, limits: PoolLimits) -> Self {
        Self {
            lifecycle,
            limits,
            trigger: ReconcileTrigger::new(),
        }
    }

    /// Handle for requesting cycles from other components.
    pub fn trigger(&self) -> ReconcileTrigger {
        self.trigger.clone()
    }

    pub fn limits(&self) -> PoolLimits {
        self.limits
    }

    /// Run one cycle. Creates are launched, not awaited.
    pub async fn run_cycle(&self) -> ReconcileOutcome {
        let store = self.lifecycle.store();

        if let Err(e) = store.ping().await {
            warn!(error = %e, "store unreachable, skipping reconcile");
            return ReconcileOutcome::StoreUnavailable;
        }

        let counts = match pool_counts(store.as_ref()).await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "could not read pool counts, skipping reconcile");
                return ReconcileOutcome::StoreUnavailable;
            }
        };

        let Unqueued { booting, claimed } = self.unqueued_pods().await;
        let total = counts.total() + booting + claimed;

        if total >= self.limits.max_pods {
            info!(
                idle = counts.idle,
                active = counts.active,
                booting,
                max_pods = self.limits.max_pods,
                "pool at capacity"
            );
            return ReconcileOutcome::AtCapacity { total };
        }

        let deficit = self.deficit(counts, booting, total);
        if deficit == 0 {
            debug!(idle = counts.idle, booting, "pool sufficient");
            return ReconcileOutcome::Sufficient {
                idle: counts.idle,
                booting,
            };
        }

        info!(
            idle = counts.idle,
            active = counts.active,
            booting,
            deficit,
            "scaling warm pool"
        );
        for _ in 0..deficit {
            self.lifecycle.spawn_create();
        }
        ReconcileOutcome::Scaling { launched: deficit }
    }

    fn deficit(&self, counts: PoolCounts, booting: usize, total: usize) -> usize {
        let headroom = self.limits.max_pods.saturating_sub(total);
        self.limits
            .min_idle
            .saturating_sub(counts.idle + booting)
            .min(headroom)
    }

    /// Live agent pods that are in neither queue, split into pods still
    /// booting and pods claimed by an in-flight dispatch. Zero for both if
    /// either side cannot be read.
    async fn unqueued_pods(&self) -> Unqueued {
        let pods = match self.lifecycle.orchestrator().list_pods().await {
            Ok(p) => p,
            Err(e) => {
                debug!(error = %e, "pod listing failed, ignoring booting pods");
                return Unqueued::default();
            }
        };
        if pods.is_empty() {
            return Unqueued::default();
        }

        let store = self.lifecycle.store();
        let mut queued = HashSet::new();
        for queue in [PoolQueue::Warm, PoolQueue::Active] {
            match store.members(queue).await {
                Ok(members) => queued.extend(members.into_iter().map(|d| d.name)),
                Err(e) => {
                    debug!(error = %e, %queue, "queue listing failed, ignoring booting pods");
                    return Unqueued::default();
                }
            }
        }

        let (claimed, booting): (Vec<_>, Vec<_>) = pods
            .iter()
            .filter(|name| !queued.contains(*name))
            .partition(|name| self.lifecycle.is_claimed(name));
        Unqueued {
            booting: booting.len(),
            claimed: claimed.len(),
        }
    }

    /// Serve triggers until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            min_idle = self.limits.min_idle,
            max_pods = self.limits.max_pods,
            "reconciler started"
        );

        loop {
            tokio::select! {
                _ = self.trigger.wait() => {
                    self.run_cycle().await;
                }
                _ = shutdown.changed() => {
                    info!("reconciler shutting down");
                    break;
                }
            }
        }
    }
}
