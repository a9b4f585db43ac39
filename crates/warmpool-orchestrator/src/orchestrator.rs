//! The `Orchestrator` seam.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::stream::BoxStream;

use crate::error::OrchestratorResult;
use crate::template::PodTemplate;

pub type OrchestratorFuture<'a, T> =
    Pin<Box<dyn Future<Output = OrchestratorResult<T>> + Send + 'a>>;

/// Pod change events, already scoped to agent pods.
pub type PodEventStream = BoxStream<'static, OrchestratorResult<PodEvent>>;

pub type SharedOrchestrator = Arc<dyn Orchestrator>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodEvent {
    /// Pod added or modified.
    Applied { name: String },
    /// Pod object removed. `pod_ip` is the last address the pod reported.
    Deleted { name: String, pod_ip: Option<String> },
    /// The watch (re)started a full listing.
    Resync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyGone,
}

/// Pod operations against the cluster.
pub trait Orchestrator: Send + Sync {
    /// Submit a pod built from `template`. Returns once the API accepted it.
    fn create_pod<'a>(&'a self, name: &'a str, template: &'a PodTemplate)
    -> OrchestratorFuture<'a, ()>;

    /// Delete a pod. A pod that no longer exists is `AlreadyGone`, not an error.
    fn delete_pod<'a>(&'a self, name: &'a str) -> OrchestratorFuture<'a, DeleteOutcome>;

    /// Whether the pod exists and can still serve a call.
    fn is_alive<'a>(&'a self, name: &'a str) -> OrchestratorFuture<'a, bool>;

    /// Names of live agent pods.
    fn list_pods(&self) -> OrchestratorFuture<'_, Vec<String>>;

    /// Subscribe to agent pod changes. The stream may end or fail at any
    /// time; callers resubscribe.
    fn watch_pods(&self) -> PodEventStream;
}
