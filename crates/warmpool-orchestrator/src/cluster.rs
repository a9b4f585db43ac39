//! Kubernetes-backed orchestrator.

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::runtime::watcher;
use kube::{Client, ResourceExt};
use tracing::{debug, info};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::orchestrator::{DeleteOutcome, Orchestrator, OrchestratorFuture, PodEvent, PodEventStream};
use crate::template::PodTemplate;

/// Pods in one namespace, restricted to one label selector.
#[derive(Clone)]
pub struct KubeOrchestrator {
    pods: Api<Pod>,
    selector: String,
}

impl KubeOrchestrator {
    /// Connect using in-cluster credentials, falling back to the local
    /// kubeconfig.
    pub async fn connect(namespace: &str, selector: impl Into<String>) -> OrchestratorResult<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| OrchestratorError::Client(e.to_string()))?;
        let selector = selector.into();
        info!(%namespace, %selector, "kubernetes client ready");
        Ok(Self::new(client, namespace, selector))
    }

    pub fn new(client: Client, namespace: &str, selector: impl Into<String>) -> Self {
        Self {
            pods: Api::namespaced(client, namespace),
            selector: selector.into(),
        }
    }
}

/// A pod can take a call while it exists, is not being deleted, and has
/// not run to completion.
pub fn pod_is_live(pod: &Pod) -> bool {
    if pod.metadata.deletion_timestamp.is_some() {
        return false;
    }
    let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
    !matches!(phase, Some("Succeeded") | Some("Failed"))
}

fn to_pod_event(event: watcher::Event<Pod>) -> PodEvent {
    match event {
        watcher::Event::Apply(pod) | watcher::Event::InitApply(pod) => PodEvent::Applied {
            name: pod.name_any(),
        },
        watcher::Event::Delete(pod) => PodEvent::Deleted {
            pod_ip: pod.status.as_ref().and_then(|s| s.pod_ip.clone()),
            name: pod.name_any(),
        },
        watcher::Event::Init | watcher::Event::InitDone => PodEvent::Resync,
    }
}

impl Orchestrator for KubeOrchestrator {
    fn create_pod<'a>(
        &'a self,
        name: &'a str,
        template: &'a PodTemplate,
    ) -> OrchestratorFuture<'a, ()> {
        Box::pin(async move {
            let pod = template.to_pod(name);
            self.pods.create(&PostParams::default(), &pod).await?;
            debug!(pod = %name, "pod submitted");
            Ok(())
        })
    }

    fn delete_pod<'a>(&'a self, name: &'a str) -> OrchestratorFuture<'a, DeleteOutcome> {
        Box::pin(async move {
            match self.pods.delete(name, &DeleteParams::default()).await {
                Ok(_) => Ok(DeleteOutcome::Deleted),
                Err(e) => match OrchestratorError::from(e) {
                    OrchestratorError::NotFound(_) => Ok(DeleteOutcome::AlreadyGone),
                    other => Err(other),
                },
            }
        })
    }

    fn is_alive<'a>(&'a self, name: &'a str) -> OrchestratorFuture<'a, bool> {
        Box::pin(async move {
            let pod = self.pods.get_opt(name).await?;
            Ok(pod.as_ref().is_some_and(pod_is_live))
        })
    }

    fn list_pods(&self) -> OrchestratorFuture<'_, Vec<String>> {
        Box::pin(async move {
            let params = ListParams::default().labels(&self.selector);
            let list = self.pods.list(&params).await?;
            Ok(list
                .items
                .iter()
                .filter(|p| pod_is_live(p))
                .map(|p| p.name_any())
                .collect())
        })
    }

    fn watch_pods(&self) -> PodEventStream {
        let config = watcher::Config::default().labels(&self.selector);
        watcher(self.pods.clone(), config)
            .map(|res| {
                res.map(to_pod_event)
                    .map_err(|e| OrchestratorError::Watch(e.to_string()))
            })
            .boxed()
    }
}
