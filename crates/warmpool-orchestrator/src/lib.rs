//! warmpool-orchestrator — everything that touches the pod orchestrator.
//!
//! ```text
//! PodTemplate ── built once from config, rendered per pod
//!      │
//! LifecycleController
//!   ├── create_pod()  → counter-based name, submit, never waits for readiness
//!   ├── delete_pod()  → orchestrator delete + remove from `active`
//!   └── spawn_*()     → the same, on the bounded BackgroundTasks pool
//!      │
//! Orchestrator (trait, boxed futures)
//!   ├── KubeOrchestrator — namespaced `Api<Pod>` + label-scoped watcher
//!   └── FakeOrchestrator — in-memory, behind the `test-util` feature
//! ```

pub mod error;
pub mod cluster;
pub mod lifecycle;
pub mod orchestrator;
pub mod tasks;
pub mod template;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use error::{OrchestratorError, OrchestratorResult};
pub use cluster::{KubeOrchestrator, pod_is_live};
pub use lifecycle::LifecycleController;
pub use orchestrator::{
    DeleteOutcome, Orchestrator, OrchestratorFuture, PodEvent, PodEventStream, SharedOrchestrator,
};
pub use tasks::BackgroundTasks;
pub use template::{EnvEntry, PodResources, PodTemplate};

#[cfg(any(test, feature = "test-util"))]
pub use testing::FakeOrchestrator;
