use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::models::ErrorBody;

/// Failures surfaced to the call-start caller. All are retryable.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no warm capacity")]
    NoCapacity,

    #[error("hand-off failed, retry")]
    HandoffFailed,

    #[error("coordination store unavailable")]
    StoreUnavailable(String),

    #[error("invalid call request: {0}")]
    InvalidRequest(String),
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::NoCapacity | DispatchError::StoreUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            DispatchError::HandoffFailed => StatusCode::INTERNAL_SERVER_ERROR,
            DispatchError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        error_response(self.status(), &self.to_string())
    }
}

pub fn error_response(status: StatusCode, detail: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            detail: detail.to_string(),
        }),
    )
        .into_response()
}

pub type DispatchResult<T> = Result<T, DispatchError>;
