//! Pod lifecycle controller: create and delete agent pods.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{error, info, warn};

use warmpool_metrics::{PoolEvent, PoolMetrics};
use warmpool_state::{PodDescriptor, PodName, PoolQueue, SharedStore};

use crate::error::OrchestratorResult;
use crate::orchestrator::{DeleteOutcome, SharedOrchestrator};
use crate::tasks::BackgroundTasks;
use crate::template::PodTemplate;

/// Creates and deletes pods. Cheap to clone; every clone shares the same
/// store, orchestrator, template, task pool and claim set.
///
/// A claimed pod has been taken off the warm queue by a dispatch that has
/// not finished with it yet: it sits in neither queue but is not booting.
#[derive(Clone)]
pub struct LifecycleController {
    store: SharedStore,
    orchestrator: SharedOrchestrator,
    template: Arc<PodTemplate>,
    counter_key: Arc<str>,
    tasks: BackgroundTasks,
    metrics: Arc<PoolMetrics>,
    claimed: Arc<Mutex<HashSet<PodName>>>,
}

impl LifecycleController {
    pub fn new(
        store: SharedStore,
        orchestrator: SharedOrchestrator,
        template: PodTemplate,
        counter_key: impl Into<Arc<str>>,
        tasks: BackgroundTasks,
    ) -> Self {
        Self {
            store,
            orchestrator,
            template: Arc::new(template),
            counter_key: counter_key.into(),
            tasks,
            metrics: Arc::new(PoolMetrics::new()),
            claimed: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PoolMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn orchestrator(&self) -> &SharedOrchestrator {
        &self.orchestrator
    }

    pub fn template(&self) -> &PodTemplate {
        &self.template
    }

    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    pub fn metrics(&self) -> &Arc<PoolMetrics> {
        &self.metrics
    }

    pub fn claim(&self, name: &str) {
        self.claimed_set().insert(name.to_string());
    }

    pub fn release(&self, name: &str) {
        self.claimed_set().remove(name);
    }

    pub fn is_claimed(&self, name: &str) -> bool {
        self.claimed_set().contains(name)
    }

    fn claimed_set(&self) -> MutexGuard<'_, HashSet<PodName>> {
        self.claimed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Next pod name from the store counter, or a clock-derived id when the
    /// store cannot be reached.
    pub async fn next_pod_name(&self) -> PodName {
        match self.store.incr_counter(&self.counter_key).await {
            Ok(id) => self.template.pod_name(id),
            Err(e) => {
                let id = fallback_pod_id();
                warn!(error = %e, id, "pod counter unavailable, using clock-derived pod id");
                self.template.pod_name(id)
            }
        }
    }

    /// Name and submit one pod. Readiness is not awaited: the pod registers
    /// itself once it is up. On failure nothing is enqueued.
    pub async fn create_pod(&self) -> OrchestratorResult<PodName> {
        let name = self.next_pod_name().await;
        match self.orchestrator.create_pod(&name, &self.template).await {
            Ok(()) => {
                self.metrics.record(PoolEvent::PodCreated);
                info!(pod = %name, "pod created");
                Ok(name)
            }
            Err(e) => {
                self.metrics.record(PoolEvent::PodCreateFailed);
                error!(pod = %name, error = %e, "pod create failed");
                Err(e)
            }
        }
    }

    /// Delete `name`, drop `entry` from the active queue and release any
    /// claim on it. Never fails: errors are logged and the resource may leak.
    pub async fn delete_pod(&self, name: &str, entry: &PodDescriptor) {
        match self.orchestrator.delete_pod(name).await {
            Ok(outcome) => {
                self.metrics.record(PoolEvent::PodDeleted);
                match outcome {
                    DeleteOutcome::Deleted => info!(pod = %name, "pod deleted"),
                    DeleteOutcome::AlreadyGone => info!(pod = %name, "pod already gone"),
                }
            }
            Err(e) => {
                self.metrics.record(PoolEvent::PodDeleteFailed);
                error!(pod = %name, error = %e, "pod delete failed");
            }
        }

        if let Err(e) = self.store.remove(PoolQueue::Active, entry).await {
            warn!(pod = %name, error = %e, "could not remove pod from active queue");
        }
        self.release(name);
    }

    /// `create_pod` on the background pool.
    pub fn spawn_create(&self) {
        let this = self.clone();
        self.tasks.spawn(async move {
            let _ = this.create_pod().await;
        });
    }

    /// `delete_pod` on the background pool.
    pub fn spawn_delete(&self, entry: PodDescriptor) {
        let this = self.clone();
        self.tasks.spawn(async move {
            this.delete_pod(&entry.name, &entry).await;
        });
    }
}

fn fallback_pod_id() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    (millis % 1_000_000) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use warmpool_state::{InMemoryPoolStore, PoolStore};

    use crate::testing::FakeOrchestrator;

    struct Harness {
        store: Arc<InMemoryPoolStore>,
        orchestrator: Arc<FakeOrchestrator>,
        lifecycle: LifecycleController,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryPoolStore::new());
        let orchestrator = Arc::new(FakeOrchestrator::new());
        let lifecycle = LifecycleController::new(
            store.clone(),
            orchestrator.clone(),
            PodTemplate::new("voice-agent", "agent:latest"),
            "ny-voice-next-pod",
            BackgroundTasks::new(4),
        );
        Harness {
            store,
            orchestrator,
            lifecycle,
        }
    }

    #[tokio::test]
    async fn create_uses_store_counter() {
        let h = harness();
        assert_eq!(h.lifecycle.create_pod().await.unwrap(), "voice-agent-1");
        assert_eq!(h.lifecycle.create_pod().await.unwrap(), "voice-agent-2");
        assert_eq!(h.orchestrator.created(), ["voice-agent-1", "voice-agent-2"]);
        assert_eq!(h.lifecycle.metrics().get(PoolEvent::PodCreated), 2);
    }

    #[tokio::test]
    async fn create_falls_back_to_clock_id_when_store_down() {
        let h = harness();
        h.store.set_available(false);

        let name = h.lifecycle.create_pod().await.unwrap();
        let id: u64 = name.strip_prefix("voice-agent-").unwrap().parse().unwrap();
        assert!(id < 1_000_000);
        assert_eq!(h.orchestrator.created(), [name]);
    }

    #[tokio::test]
    async fn failed_create_enqueues_nothing() {
        let h = harness();
        h.orchestrator.set_fail_creates(true);

        assert!(h.lifecycle.create_pod().await.is_err());
        assert_eq!(h.store.length(PoolQueue::Warm).await.unwrap(), 0);
        assert_eq!(h.store.length(PoolQueue::Active).await.unwrap(), 0);
        assert_eq!(h.lifecycle.metrics().get(PoolEvent::PodCreateFailed), 1);
    }

    #[tokio::test]
    async fn delete_removes_active_entry() {
        let h = harness();
        h.orchestrator.insert_pod("voice-agent-5");
        let entry = PodDescriptor::new("voice-agent-5", "http://10.0.0.5:8080");
        h.store.enqueue(PoolQueue::Active, &entry).await.unwrap();

        h.lifecycle.delete_pod(&entry.name, &entry).await;

        assert!(!h.orchestrator.pod_exists("voice-agent-5"));
        assert_eq!(h.store.length(PoolQueue::Active).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_twice_is_harmless() {
        let h = harness();
        h.orchestrator.insert_pod("voice-agent-5");
        let entry = PodDescriptor::new("voice-agent-5", "http://10.0.0.5:8080");
        h.store.enqueue(PoolQueue::Active, &entry).await.unwrap();

        h.lifecycle.delete_pod(&entry.name, &entry).await;
        h.lifecycle.delete_pod(&entry.name, &entry).await;

        assert_eq!(h.orchestrator.deleted(), ["voice-agent-5", "voice-agent-5"]);
        assert_eq!(h.lifecycle.metrics().get(PoolEvent::PodDeleteFailed), 0);
        assert_eq!(h.store.length(PoolQueue::Active).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_failure_still_clears_queue() {
        let h = harness();
        h.orchestrator.insert_pod("voice-agent-9");
        h.orchestrator.set_fail_deletes(true);
        let entry = PodDescriptor::new("voice-agent-9", "http://10.0.0.9:8080");
        h.store.enqueue(PoolQueue::Active, &entry).await.unwrap();

        h.lifecycle.delete_pod(&entry.name, &entry).await;

        assert!(h.orchestrator.pod_exists("voice-agent-9"));
        assert_eq!(h.store.length(PoolQueue::Active).await.unwrap(), 0);
        assert_eq!(h.lifecycle.metrics().get(PoolEvent::PodDeleteFailed), 1);
    }

    #[tokio::test]
    async fn delete_releases_claim() {
        let h = harness();
        h.orchestrator.insert_pod("voice-agent-3");
        h.lifecycle.claim("voice-agent-3");
        h.lifecycle.claim("voice-agent-4");
        assert!(h.lifecycle.is_claimed("voice-agent-3"));

        let entry = PodDescriptor::new("voice-agent-3", "http://10.0.0.3:8080");
        h.lifecycle.delete_pod(&entry.name, &entry).await;

        assert!(!h.lifecycle.is_claimed("voice-agent-3"));
        assert!(h.lifecycle.is_claimed("voice-agent-4"));
        // Clones share the claim set.
        h.lifecycle.clone().release("voice-agent-4");
        assert!(!h.lifecycle.is_claimed("voice-agent-4"));
    }

    #[tokio::test]
    async fn spawned_operations_complete_on_drain() {
        let h = harness();
        h.lifecycle.spawn_create();
        h.lifecycle.spawn_create();
        h.lifecycle.tasks().drain().await;
        assert_eq!(h.orchestrator.created().len(), 2);

        h.lifecycle
            .spawn_delete(PodDescriptor::new("voice-agent-1", "http://10.0.0.1:8080"));
        h.lifecycle.tasks().drain().await;
        assert!(!h.orchestrator.pod_exists("voice-agent-1"));
    }
}
