//! Request and response bodies.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Call-start request from the telephony driver. Forwarded to the pod as
/// JSON, unknown fields included.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallRequest {
    #[serde(rename = "phoneNumber")]
    pub phone_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version_of_app: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_version_of_app: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub pod_name: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEndedRequest {
    pub pod_name: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl StatusResponse {
    pub fn new(status: &str) -> Self {
        Self {
            status: status.to_string(),
            warning: None,
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }
}

/// `{"detail": "..."}` error body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolStatus {
    pub idle: usize,
    pub active: usize,
    pub min_idle: usize,
    pub max_pods: usize,
}
