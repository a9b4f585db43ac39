//! warmpool-api — HTTP surface of the pool controller.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/driver/voice/connect` | Claim a warm pod and hand the call to it |
//! | POST | `/register` | Agent pod reports itself ready (joins `warm`) |
//! | POST | `/session-ended` | Agent pod reports its call finished (pod deleted) |
//! | GET | `/health` | Liveness |
//! | GET | `/pool` | Queue sizes and limits |
//! | GET | `/metrics` | Prometheus exposition |

pub mod dispatch;
pub mod error;
pub mod forward;
pub mod handlers;
pub mod models;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use warmpool_metrics::PoolMetrics;
use warmpool_orchestrator::LifecycleController;
use warmpool_reconcile::PoolLimits;

pub use dispatch::Dispatcher;
pub use error::{DispatchError, DispatchResult};
pub use forward::{Handoff, HandoffError, start_session};
pub use models::*;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub lifecycle: LifecycleController,
    pub dispatcher: Arc<Dispatcher>,
    pub limits: PoolLimits,
    pub metrics: Arc<PoolMetrics>,
}

impl ApiState {
    pub fn new(lifecycle: LifecycleController, dispatcher: Dispatcher, limits: PoolLimits) -> Self {
        let metrics = Arc::clone(lifecycle.metrics());
        Self {
            lifecycle,
            dispatcher: Arc::new(dispatcher),
            limits,
            metrics,
        }
    }
}

/// Build the complete router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/driver/voice/connect", post(handlers::connect_call))
        .route("/register", post(handlers::register_pod))
        .route("/session-ended", post(handlers::session_ended))
        .route("/health", get(handlers::health))
        .route("/pool", get(handlers::pool_status))
        .route("/metrics", get(handlers::prometheus_metrics))
        .with_state(state)
}
