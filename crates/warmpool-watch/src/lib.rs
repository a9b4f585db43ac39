//! warmpool-watch — keeps the queues honest when pods disappear.
//!
//! A single long-lived subscription to agent pod events. A deleted pod is
//! removed from the warm queue (and the active queue, should it still be
//! listed there) and a reconcile is requested so the pool refills. The
//! subscription is re-established after every error or stream end for the
//! life of the process.

pub mod watcher;

pub use watcher::PodWatcher;
