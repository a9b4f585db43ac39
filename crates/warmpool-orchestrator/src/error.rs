use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("cluster client unavailable: {0}")]
    Client(String),

    #[error("pod not found: {0}")]
    NotFound(String),

    #[error("orchestrator api error: {0}")]
    Api(String),

    #[error("pod watch failed: {0}")]
    Watch(String),
}

impl OrchestratorError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, OrchestratorError::NotFound(_))
    }
}

impl From<kube::Error> for OrchestratorError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(resp) if resp.code == 404 => OrchestratorError::NotFound(resp.message),
            other => OrchestratorError::Api(other.to_string()),
        }
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
