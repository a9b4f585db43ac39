//! Typed pod template.
//!
//! Built once at startup from configuration; `to_pod` renders the
//! Kubernetes object for one pod name.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, ObjectFieldSelector, Pod, PodSpec,
    ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Name of the single container in every agent pod.
pub const CONTAINER_NAME: &str = "agent";

/// Env var receiving the pod's own name.
pub const POD_NAME_ENV: &str = "POD_NAME";

/// Env var receiving the pod's IP address.
pub const POD_IP_ENV: &str = "POD_IP";

/// CPU and memory, applied as both request and limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodResources {
    pub cpu: String,
    pub memory: String,
}

impl Default for PodResources {
    fn default() -> Self {
        Self {
            cpu: "500m".to_string(),
            memory: "512Mi".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvEntry {
    pub name: String,
    pub value: String,
}

impl EnvEntry {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodTemplate {
    /// Pod name prefix, also the value of the `app` label.
    pub name_prefix: String,
    pub image: String,
    pub container_port: u16,
    pub resources: PodResources,
    /// Literal env, in injection order. `POD_NAME`/`POD_IP` are appended
    /// by `to_pod` and must not appear here.
    pub env: Vec<EnvEntry>,
}

impl PodTemplate {
    pub fn new(name_prefix: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name_prefix: name_prefix.into(),
            image: image.into(),
            container_port: 8080,
            resources: PodResources::default(),
            env: Vec::new(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.container_port = port;
        self
    }

    pub fn with_resources(mut self, resources: PodResources) -> Self {
        self.resources = resources;
        self
    }

    /// Append an env var. A later entry with the same name replaces the
    /// earlier one in place.
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let entry = EnvEntry::new(name, value);
        match self.env.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => existing.value = entry.value,
            None => self.env.push(entry),
        }
        self
    }

    /// Label selector matching every pod built from this template.
    pub fn label_selector(&self) -> String {
        format!("app={}", self.name_prefix)
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("app".to_string(), self.name_prefix.clone())])
    }

    pub fn pod_name(&self, id: u64) -> String {
        format!("{}-{id}", self.name_prefix)
    }

    /// Render the pod object for `name`.
    pub fn to_pod(&self, name: &str) -> Pod {
        let mut env: Vec<EnvVar> = self
            .env
            .iter()
            .map(|e| EnvVar {
                name: e.name.clone(),
                value: Some(e.value.clone()),
                ..Default::default()
            })
            .collect();
        env.push(field_ref_env(POD_NAME_ENV, "metadata.name"));
        env.push(field_ref_env(POD_IP_ENV, "status.podIP"));

        let quantities = BTreeMap::from([
            ("cpu".to_string(), Quantity(self.resources.cpu.clone())),
            ("memory".to_string(), Quantity(self.resources.memory.clone())),
        ]);

        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(self.labels()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                restart_policy: Some("Never".to_string()),
                containers: vec![Container {
                    name: CONTAINER_NAME.to_string(),
                    image: Some(self.image.clone()),
                    image_pull_policy: Some("Always".to_string()),
                    ports: Some(vec![ContainerPort {
                        container_port: i32::from(self.container_port),
                        ..Default::default()
                    }]),
                    env: Some(env),
                    resources: Some(ResourceRequirements {
                        requests: Some(quantities.clone()),
                        limits: Some(quantities),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

fn field_ref_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
