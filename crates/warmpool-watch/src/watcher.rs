use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use warmpool_metrics::{PoolEvent, PoolMetrics};
use warmpool_orchestrator::{PodEvent, SharedOrchestrator};
use warmpool_reconcile::ReconcileTrigger;
use warmpool_state::{PodDescriptor, PoolQueue, SharedStore};

const DEFAULT_RETRY: Duration = Duration::from_secs(2);
const DEFAULT_AGENT_PORT: u16 = 8080;

pub struct PodWatcher {
    store: SharedStore,
    orchestrator: SharedOrchestrator,
    trigger: ReconcileTrigger,
    metrics: Arc<PoolMetrics>,
    agent_port: u16,
    retry_delay: Duration,
}

impl PodWatcher {
    pub fn new(
        store: SharedStore,
        orchestrator: SharedOrchestrator,
        trigger: ReconcileTrigger,
    ) -> Self {
        Self {
            store,
            orchestrator,
            trigger,
            metrics: Arc::new(PoolMetrics::new()),
            agent_port: DEFAULT_AGENT_PORT,
            retry_delay: DEFAULT_RETRY,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PoolMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Port used to rebuild the endpoint of a deleted pod.
    pub fn with_agent_port(mut self, port: u16) -> Self {
        self.agent_port = port;
        self
    }

    /// Pause between a failed subscription and the next one.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Apply one event to the queues.
    pub async fn handle_event(&self, event: PodEvent) {
        let (name, pod_ip) = match event {
            PodEvent::Deleted { name, pod_ip } => (name, pod_ip),
            other => {
                trace!(?other, "ignoring pod event");
                return;
            }
        };

        // Removal matches on the pod name, so a missing IP still clears it.
        let descriptor = match pod_ip.as_deref() {
            Some(ip) => PodDescriptor::for_address(name.clone(), ip, self.agent_port),
            None => PodDescriptor::new(name.clone(), String::new()),
        };

        self.metrics.record(PoolEvent::WatchDeletion);

        for queue in [PoolQueue::Warm, PoolQueue::Active] {
            match self.store.remove(queue, &descriptor).await {
                Ok(0) => {}
                Ok(removed) => info!(pod = %name, %queue, removed, "deleted pod dropped from queue"),
                Err(e) => warn!(pod = %name, %queue, error = %e, "could not drop deleted pod"),
            }
        }

        self.trigger.trigger();
    }

    /// Watch until shutdown, resubscribing after every failure.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(retry_ms = self.retry_delay.as_millis() as u64, "pod watcher started");

        loop {
            let mut events = self.orchestrator.watch_pods();
            debug!("pod watch subscribed");

            let stopping = loop {
                tokio::select! {
                    item = events.next() => match item {
                        Some(Ok(event)) => self.handle_event(event).await,
                        Some(Err(e)) => {
                            warn!(error = %e, "pod watch failed, resubscribing");
                            break false;
                        }
                        None => {
                            debug!("pod watch stream ended, resubscribing");
                            break false;
                        }
                    },
                    _ = shutdown.changed() => break true,
                }
            };

            if stopping {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.retry_delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!("pod watcher shutting down");
    }
}
