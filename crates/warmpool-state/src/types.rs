//! Domain types for the coordination store.
//!
//! Pool membership is modelled as queue membership rather than a stored
//! status field: a pod is `Warm` while its descriptor sits in the warm
//! queue, `Active` while it sits in the active queue, and absent otherwise.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Orchestrator-assigned pod name; the identity of a descriptor.
pub type PodName = String;

// ── Descriptor ────────────────────────────────────────────────────

/// A pod as it appears in the pool queues.
///
/// Stored as JSON `{"pod_name": "...", "endpoint": "http://ip:port"}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PodDescriptor {
    #[serde(rename = "pod_name")]
    pub name: PodName,
    /// Base URL the dispatcher forwards calls to.
    pub endpoint: String,
}

impl PodDescriptor {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Descriptor for a pod reachable at `ip:port` over plain HTTP.
    pub fn for_address(name: impl Into<String>, ip: &str, port: u16) -> Self {
        Self::new(name, format!("http://{ip}:{port}"))
    }

    /// Whether `other` denotes the same pod. Endpoints are not compared.
    pub fn same_pod(&self, other: &PodDescriptor) -> bool {
        self.name == other.name
    }

    /// Serialize into the queue wire format.
    pub fn encode(&self) -> StoreResult<String> {
        serde_json::to_string(self).map_err(|e| StoreError::Serialize(e.to_string()))
    }

    /// Parse a queue entry.
    pub fn decode(raw: &str) -> StoreResult<Self> {
        serde_json::from_str(raw).map_err(|e| StoreError::Deserialize(e.to_string()))
    }
}

// ── Queues ────────────────────────────────────────────────────────

/// The two pool queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolQueue {
    /// Booted and idle, ready to take a call.
    Warm,
    /// Bound to exactly one in-flight call.
    Active,
}

impl PoolQueue {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolQueue::Warm => "warm",
            PoolQueue::Active => "active",
        }
    }
}

impl fmt::Display for PoolQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store keys backing each queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    pub warm: String,
    pub active: String,
}

impl QueueKeys {
    pub fn key(&self, queue: PoolQueue) -> &str {
        match queue {
            PoolQueue::Warm => &self.warm,
            PoolQueue::Active => &self.active,
        }
    }
}

impl Default for QueueKeys {
    fn default() -> Self {
        Self {
            warm: "ny-voice-warm-pods".to_string(),
            active: "ny-voice-active-pods".to_string(),
        }
    }
}

// ── Counts ────────────────────────────────────────────────────────

/// Queue lengths read together. Always derived, never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolCounts {
    pub idle: usize,
    pub active: usize,
}

impl PoolCounts {
    pub fn total(&self) -> usize {
        self.idle + self.active
    }
}
