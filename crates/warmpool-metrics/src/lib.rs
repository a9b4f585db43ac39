//! warmpool-metrics — observability for the warm pod pool.
//!
//! ```text
//! PoolMetrics
//!   └── record(PoolEvent) ← called by lifecycle, dispatcher, watcher, trimmer
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics
//! ```
//!
//! Queue sizes are not tracked here: they are read from the coordination
//! store at scrape time so the exposition can never drift from it.

pub mod counters;
pub mod prometheus;

pub use counters::{PoolEvent, PoolMetrics};
pub use prometheus::render_prometheus;
