//! Call dispatcher: claim a warm pod and hand the call to it.

use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use warmpool_metrics::PoolEvent;
use warmpool_orchestrator::LifecycleController;
use warmpool_reconcile::ReconcileTrigger;
use warmpool_state::PoolQueue;

use crate::error::{DispatchError, DispatchResult};
use crate::forward::{Handoff, start_session};
use crate::models::CallRequest;

const DEFAULT_HANDOFF_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Dispatcher {
    lifecycle: LifecycleController,
    trigger: ReconcileTrigger,
    handoff_timeout: Duration,
}

impl Dispatcher {
    pub fn new(lifecycle: LifecycleController, trigger: ReconcileTrigger) -> Self {
        Self {
            lifecycle,
            trigger,
            handoff_timeout: DEFAULT_HANDOFF_TIMEOUT,
        }
    }

    pub fn with_handoff_timeout(mut self, timeout: Duration) -> Self {
        self.handoff_timeout = timeout;
        self
    }

    /// Hand `request` to a warm pod.
    ///
    /// Each claimed descriptor leaves the warm queue atomically, so no two
    /// dispatches ever see the same pod. The pod stays claimed on the
    /// lifecycle controller until it is active or deleted, which keeps the
    /// reconciler from counting it as booting. A pod that is not live or
    /// fails the hand-off is deleted and the next candidate is tried until
    /// the queue is empty.
    pub async fn dispatch(&self, request: &CallRequest) -> DispatchResult<Handoff> {
        let payload = serde_json::to_vec(request)
            .map(Bytes::from)
            .map_err(|e| DispatchError::InvalidRequest(e.to_string()))?;

        let store = self.lifecycle.store();
        let metrics = self.lifecycle.metrics();
        let mut handoff_failed = false;

        loop {
            let pod = match store.dequeue_front(PoolQueue::Warm).await {
                Ok(Some(pod)) => pod,
                Ok(None) => {
                    self.trigger.trigger();
                    metrics.record(PoolEvent::DispatchExhausted);
                    warn!(handoff_failed, "warm pool exhausted");
                    return Err(if handoff_failed {
                        DispatchError::HandoffFailed
                    } else {
                        DispatchError::NoCapacity
                    });
                }
                Err(e) => {
                    warn!(error = %e, "store unreachable, rejecting call");
                    return Err(DispatchError::StoreUnavailable(e.to_string()));
                }
            };

            self.lifecycle.claim(&pod.name);

            match self.lifecycle.orchestrator().is_alive(&pod.name).await {
                Ok(true) => {}
                Ok(false) => {
                    metrics.record(PoolEvent::DispatchDeadPod);
                    info!(pod = %pod.name, "claimed pod is not live, discarding");
                    // Terminated pods linger with restartPolicy Never.
                    self.lifecycle.spawn_delete(pod);
                    continue;
                }
                // The hand-off timeout decides instead.
                Err(e) => debug!(pod = %pod.name, error = %e, "liveness check failed"),
            }

            self.trigger.trigger();

            match start_session(&pod.endpoint, payload.clone(), self.handoff_timeout).await {
                Ok(handoff) => {
                    if let Err(e) = store.enqueue(PoolQueue::Active, &pod).await {
                        warn!(pod = %pod.name, error = %e, "could not record pod as active");
                    }
                    self.lifecycle.release(&pod.name);
                    metrics.record(PoolEvent::DispatchSucceeded);
                    info!(pod = %pod.name, phone = %request.phone_number, "call handed off");
                    return Ok(handoff);
                }
                Err(e) => {
                    metrics.record(PoolEvent::DispatchHandoffFailed);
                    warn!(pod = %pod.name, error = %e, "hand-off failed, deleting pod");
                    handoff_failed = true;
                    self.lifecycle.spawn_delete(pod);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::post;
    use serde_json::{Map, json};
    use tokio::sync::watch;

    use warmpool_orchestrator::{BackgroundTasks, FakeOrchestrator, PodTemplate};
    use warmpool_reconcile::{PoolLimits, Reconciler};
    use warmpool_state::{InMemoryPoolStore, PodDescriptor, PoolStore};

    #[derive(Clone, Copy)]
    enum Agent {
        Accept,
        Delayed,
        Slow,
        Reject,
    }

    /// Serve a fake agent pod; returns its endpoint and a hit counter.
    async fn spawn_agent(behavior: Agent) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let router = Router::new().route(
            "/start-session",
            post(move |axum::Json(body): axum::Json<serde_json::Value>| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    match behavior {
                        Agent::Accept => (
                            StatusCode::OK,
                            axum::Json(json!({"status": "started", "caller": body["phoneNumber"]})),
                        ),
                        Agent::Delayed => {
                            tokio::time::sleep(Duration::from_millis(200)).await;
                            (StatusCode::OK, axum::Json(json!({"status": "started"})))
                        }
                        Agent::Slow => {
                            tokio::time::sleep(Duration::from_secs(5)).await;
                            (StatusCode::OK, axum::Json(json!({})))
                        }
                        Agent::Reject => {
                            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(json!({})))
                        }
                    }
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (format!("http://{addr}"), hits)
    }

    struct Harness {
        store: Arc<InMemoryPoolStore>,
        orchestrator: Arc<FakeOrchestrator>,
        lifecycle: LifecycleController,
        dispatcher: Arc<Dispatcher>,
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
        let dispatcher = Dispatcher::new(lifecycle.clone(), ReconcileTrigger::new())
            .with_handoff_timeout(Duration::from_millis(300));
        Harness {
            store,
            orchestrator,
            lifecycle,
            dispatcher: Arc::new(dispatcher),
        }
    }

    async fn add_warm(h: &Harness, name: &str, endpoint: &str) -> PodDescriptor {
        let pod = PodDescriptor::new(name, endpoint);
        h.orchestrator.insert_pod(name);
        h.store.enqueue(PoolQueue::Warm, &pod).await.unwrap();
        pod
    }

    fn call() -> CallRequest {
        CallRequest {
            phone_number: "+15550100".to_string(),
            language_code: Some("en".to_string()),
            current_version_of_app: None,
            latest_version_of_app: None,
            extra: Map::new(),
        }
    }

    async fn names(h: &Harness, queue: PoolQueue) -> Vec<String> {
        h.store
            .members(queue)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect()
    }

    #[tokio::test]
    async fn scenario_b_claim_moves_one_pod_to_active() {
        let h = harness();
        let (endpoint, _) = spawn_agent(Agent::Accept).await;
        for i in 0..5 {
            add_warm(&h, &format!("voice-agent-{i}"), &endpoint).await;
        }

        let handoff = h.dispatcher.dispatch(&call()).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&handoff.body).unwrap();
        assert_eq!(body["caller"], "+15550100");

        assert_eq!(h.store.length(PoolQueue::Warm).await.unwrap(), 4);
        assert_eq!(names(&h, PoolQueue::Active).await, ["voice-agent-0"]);
        assert!(!names(&h, PoolQueue::Warm).await.contains(&"voice-agent-0".to_string()));
    }

    #[tokio::test]
    async fn concurrent_dispatches_claim_distinct_pods() {
        let h = harness();
        let (endpoint, hits) = spawn_agent(Agent::Accept).await;
        for i in 0..5 {
            add_warm(&h, &format!("voice-agent-{i}"), &endpoint).await;
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let dispatcher = Arc::clone(&h.dispatcher);
            handles.push(tokio::spawn(async move { dispatcher.dispatch(&call()).await }));
        }
        let mut ok = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(e) => assert!(matches!(e, DispatchError::NoCapacity)),
            }
        }

        assert_eq!(ok, 5);
        assert_eq!(hits.load(Ordering::SeqCst), 5);
        let active: HashSet<_> = names(&h, PoolQueue::Active).await.into_iter().collect();
        assert_eq!(active.len(), 5);
        assert_eq!(h.store.length(PoolQueue::Warm).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn scenario_c_timeout_deletes_pod_and_tries_next() {
        let h = harness();
        let (slow, _) = spawn_agent(Agent::Slow).await;
        let (good, _) = spawn_agent(Agent::Accept).await;
        add_warm(&h, "voice-agent-slow", &slow).await;
        add_warm(&h, "voice-agent-good", &good).await;

        h.dispatcher.dispatch(&call()).await.unwrap();
        h.lifecycle.tasks().drain().await;

        assert_eq!(h.orchestrator.deleted(), ["voice-agent-slow"]);
        assert!(!h.orchestrator.pod_exists("voice-agent-slow"));
        assert!(names(&h, PoolQueue::Warm).await.is_empty());
        assert_eq!(names(&h, PoolQueue::Active).await, ["voice-agent-good"]);
    }

    #[tokio::test]
    async fn dead_pod_is_discarded_without_handoff() {
        let h = harness();
        let (endpoint, hits) = spawn_agent(Agent::Accept).await;
        add_warm(&h, "voice-agent-dead", &endpoint).await;
        add_warm(&h, "voice-agent-live", &endpoint).await;
        h.orchestrator.mark_terminated("voice-agent-dead");

        h.dispatcher.dispatch(&call()).await.unwrap();
        h.lifecycle.tasks().drain().await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(h.orchestrator.deleted(), ["voice-agent-dead"]);
        assert!(!h.orchestrator.pod_exists("voice-agent-dead"));
        assert_eq!(names(&h, PoolQueue::Active).await, ["voice-agent-live"]);
        assert_eq!(h.lifecycle.metrics().get(PoolEvent::DispatchDeadPod), 1);
        assert!(!h.lifecycle.is_claimed("voice-agent-dead"));
        assert!(!h.lifecycle.is_claimed("voice-agent-live"));
    }

    #[tokio::test]
    async fn vanished_pod_delete_is_harmless() {
        let h = harness();
        let (endpoint, _) = spawn_agent(Agent::Accept).await;
        // Queued but never known to the orchestrator.
        h.store
            .enqueue(PoolQueue::Warm, &PodDescriptor::new("voice-agent-ghost", &endpoint))
            .await
            .unwrap();
        add_warm(&h, "voice-agent-live", &endpoint).await;

        h.dispatcher.dispatch(&call()).await.unwrap();
        h.lifecycle.tasks().drain().await;

        assert_eq!(h.orchestrator.deleted(), ["voice-agent-ghost"]);
        assert_eq!(h.lifecycle.metrics().get(PoolEvent::PodDeleteFailed), 0);
        assert_eq!(names(&h, PoolQueue::Active).await, ["voice-agent-live"]);
    }

    #[tokio::test]
    async fn dispatch_from_full_pool_is_replenished() {
        let h = harness();
        let (endpoint, _) = spawn_agent(Agent::Delayed).await;
        for i in 1..=3 {
            add_warm(&h, &format!("seed-{i}"), &endpoint).await;
        }
        let reconciler = Arc::new(Reconciler::new(
            h.lifecycle.clone(),
            PoolLimits {
                min_idle: 3,
                max_pods: 20,
            },
        ));
        let dispatcher = Dispatcher::new(h.lifecycle.clone(), reconciler.trigger())
            .with_handoff_timeout(Duration::from_secs(2));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let loop_handle = {
            let reconciler = Arc::clone(&reconciler);
            tokio::spawn(async move { reconciler.run(shutdown_rx).await })
        };

        dispatcher.dispatch(&call()).await.unwrap();
        // Let any trailing cycle finish before counting creates.
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        loop_handle.await.unwrap();
        h.lifecycle.tasks().drain().await;

        assert_eq!(h.store.length(PoolQueue::Warm).await.unwrap(), 2);
        assert_eq!(names(&h, PoolQueue::Active).await, ["seed-1"]);
        assert_eq!(h.orchestrator.created(), ["voice-agent-1"]);
        assert!(!h.lifecycle.is_claimed("seed-1"));
    }

    #[tokio::test]
    async fn liveness_errors_still_attempt_handoff() {
        let h = harness();
        let (endpoint, hits) = spawn_agent(Agent::Accept).await;
        add_warm(&h, "voice-agent-1", &endpoint).await;
        h.orchestrator.set_fail_lookups(true);

        h.dispatcher.dispatch(&call()).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_pool_is_no_capacity() {
        let h = harness();
        let err = h.dispatcher.dispatch(&call()).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoCapacity));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn exhausted_after_failures_is_handoff_failed() {
        let h = harness();
        let (bad, _) = spawn_agent(Agent::Reject).await;
        add_warm(&h, "voice-agent-1", &bad).await;
        add_warm(&h, "voice-agent-2", "http://127.0.0.1:1").await;

        let err = h.dispatcher.dispatch(&call()).await.unwrap_err();
        h.lifecycle.tasks().drain().await;

        assert!(matches!(err, DispatchError::HandoffFailed));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let mut deleted = h.orchestrator.deleted();
        deleted.sort();
        assert_eq!(deleted, ["voice-agent-1", "voice-agent-2"]);
        assert!(names(&h, PoolQueue::Warm).await.is_empty());
        assert!(names(&h, PoolQueue::Active).await.is_empty());
    }

    #[tokio::test]
    async fn store_outage_fails_fast() {
        let h = harness();
        h.store.set_available(false);
        let err = h.dispatcher.dispatch(&call()).await.unwrap_err();
        assert!(matches!(err, DispatchError::StoreUnavailable(_)));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn warm_and_active_never_overlap() {
        let h = harness();
        let (endpoint, _) = spawn_agent(Agent::Accept).await;
        let (bad, _) = spawn_agent(Agent::Reject).await;
        for i in 0..6 {
            let ep = if i % 2 == 0 { &endpoint } else { &bad };
            add_warm(&h, &format!("voice-agent-{i}"), ep).await;
        }

        for _ in 0..4 {
            let _ = h.dispatcher.dispatch(&call()).await;
            let warm: HashSet<_> = names(&h, PoolQueue::Warm).await.into_iter().collect();
            let active: HashSet<_> = names(&h, PoolQueue::Active).await.into_iter().collect();
            assert!(warm.is_disjoint(&active));
        }
    }
}
