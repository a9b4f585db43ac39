//! In-memory orchestrator for tests.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures::StreamExt;
use futures::channel::mpsc;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::orchestrator::{DeleteOutcome, Orchestrator, OrchestratorFuture, PodEvent, PodEventStream};
use crate::template::PodTemplate;

type EventSender = mpsc::UnboundedSender<OrchestratorResult<PodEvent>>;

/// Records every call and keeps a name → alive map of pods.
#[derive(Default)]
pub struct FakeOrchestrator {
    pods: Mutex<BTreeMap<String, bool>>,
    created: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    subscribers: Mutex<Vec<EventSender>>,
    subscriptions: AtomicUsize,
    fail_creates: AtomicBool,
    fail_deletes: AtomicBool,
    fail_lookups: AtomicBool,
}

impl FakeOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a running pod without recording a create.
    pub fn insert_pod(&self, name: &str) {
        self.pods.lock().unwrap().insert(name.to_string(), true);
    }

    /// Keep the pod object but mark it finished.
    pub fn mark_terminated(&self, name: &str) {
        if let Some(alive) = self.pods.lock().unwrap().get_mut(name) {
            *alive = false;
        }
    }

    /// Remove a pod behind the controller's back and emit the delete event.
    pub fn remove_externally(&self, name: &str, pod_ip: Option<&str>) {
        self.pods.lock().unwrap().remove(name);
        self.emit(Ok(PodEvent::Deleted {
            name: name.to_string(),
            pod_ip: pod_ip.map(str::to_string),
        }));
    }

    pub fn pod_exists(&self, name: &str) -> bool {
        self.pods.lock().unwrap().contains_key(name)
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn set_fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Make `is_alive` and `list_pods` fail.
    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    /// How many times `watch_pods` was called.
    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// Send an event to every open watch stream.
    pub fn emit(&self, event: OrchestratorResult<PodEvent>) {
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|tx| !tx.is_closed());
        for tx in subs.iter() {
            let copy = match &event {
                Ok(ev) => Ok(ev.clone()),
                Err(e) => Err(OrchestratorError::Watch(e.to_string())),
            };
            let _ = tx.unbounded_send(copy);
        }
    }

    /// End every open watch stream.
    pub fn close_watches(&self) {
        self.subscribers.lock().unwrap().clear();
    }
}

impl Orchestrator for FakeOrchestrator {
    fn create_pod<'a>(
        &'a self,
        name: &'a str,
        _template: &'a PodTemplate,
    ) -> OrchestratorFuture<'a, ()> {
        Box::pin(async move {
            if self.fail_creates.load(Ordering::SeqCst) {
                return Err(OrchestratorError::Api("injected create failure".to_string()));
            }
            self.created.lock().unwrap().push(name.to_string());
            self.pods.lock().unwrap().insert(name.to_string(), true);
            Ok(())
        })
    }

    fn delete_pod<'a>(&'a self, name: &'a str) -> OrchestratorFuture<'a, DeleteOutcome> {
        Box::pin(async move {
            if self.fail_deletes.load(Ordering::SeqCst) {
                return Err(OrchestratorError::Api("injected delete failure".to_string()));
            }
            self.deleted.lock().unwrap().push(name.to_string());
            match self.pods.lock().unwrap().remove(name) {
                Some(_) => Ok(DeleteOutcome::Deleted),
                None => Ok(DeleteOutcome::AlreadyGone),
            }
        })
    }

    fn is_alive<'a>(&'a self, name: &'a str) -> OrchestratorFuture<'a, bool> {
        Box::pin(async move {
            if self.fail_lookups.load(Ordering::SeqCst) {
                return Err(OrchestratorError::Api("injected lookup failure".to_string()));
            }
            Ok(self.pods.lock().unwrap().get(name).copied().unwrap_or(false))
        })
    }

    fn list_pods(&self) -> OrchestratorFuture<'_, Vec<String>> {
        Box::pin(async move {
            if self.fail_lookups.load(Ordering::SeqCst) {
                return Err(OrchestratorError::Api("injected list failure".to_string()));
            }
            Ok(self
                .pods
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, alive)| **alive)
                .map(|(name, _)| name.clone())
                .collect())
        })
    }

    fn watch_pods(&self) -> PodEventStream {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded();
        self.subscribers.lock().unwrap().push(tx);
        rx.boxed()
    }
}
