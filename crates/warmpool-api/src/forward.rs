//! Call hand-off to an agent pod.
//!
//! One POST over a fresh HTTP/1 connection, bounded by a single timeout
//! covering connect, request and body.

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderValue, Method, Request, StatusCode, Uri, header};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::debug;

pub const START_SESSION_PATH: &str = "/start-session";

/// A pod's successful answer, relayed verbatim.
#[derive(Debug, Clone)]
pub struct Handoff {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("invalid pod endpoint {0:?}")]
    InvalidEndpoint(String),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("pod answered {0}")]
    Status(StatusCode),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

struct SessionTarget {
    address: String,
    host: String,
    path: String,
}

impl SessionTarget {
    fn parse(endpoint: &str) -> Result<Self, HandoffError> {
        let invalid = || HandoffError::InvalidEndpoint(endpoint.to_string());
        let uri: Uri = endpoint.parse().map_err(|_| invalid())?;
        if uri.scheme_str() != Some("http") {
            return Err(invalid());
        }
        let authority = uri.authority().ok_or_else(invalid)?;
        let port = authority.port_u16().unwrap_or(80);

        Ok(Self {
            address: format!("{}:{port}", authority.host()),
            host: authority.as_str().to_string(),
            path: format!("{}{START_SESSION_PATH}", uri.path().trim_end_matches('/')),
        })
    }
}

/// POST `payload` to `<endpoint>/start-session`. Anything other than a 2xx
/// answer within `timeout` is an error.
pub async fn start_session(
    endpoint: &str,
    payload: Bytes,
    timeout: Duration,
) -> Result<Handoff, HandoffError> {
    let target = SessionTarget::parse(endpoint)?;

    match tokio::time::timeout(timeout, send(&target, payload)).await {
        Ok(result) => result,
        Err(_) => {
            debug!(%endpoint, "hand-off timed out");
            Err(HandoffError::Timeout(timeout))
        }
    }
}

async fn send(target: &SessionTarget, payload: Bytes) -> Result<Handoff, HandoffError> {
    let stream = TcpStream::connect(&target.address)
        .await
        .map_err(|e| HandoffError::Connect(e.to_string()))?;

    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| HandoffError::Connect(e.to_string()))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = Request::builder()
        .method(Method::POST)
        .uri(&target.path)
        .header(header::HOST, &target.host)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::USER_AGENT, "warmpool/0.1")
        .body(Full::new(payload))
        .map_err(|e| HandoffError::Request(e.to_string()))?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| HandoffError::Request(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(HandoffError::Status(status));
    }

    let content_type = resp.headers().get(header::CONTENT_TYPE).cloned();
    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| HandoffError::Request(e.to_string()))?
        .to_bytes();

    Ok(Handoff {
        status,
        content_type,
        body,
    })
}
