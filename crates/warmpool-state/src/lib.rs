//! warmpool-state — shared coordination store for the warm pod pool.
//!
//! Holds two ordered queues of pod descriptors (`warm`, `active`) and a
//! monotonic counter used to name new pods. The store is the single source
//! of truth for pool membership; nothing above this crate caches it.
//!
//! # Backends
//!
//! ```text
//! PoolStore (trait, boxed futures)
//!   ├── RedisPoolStore    — LPOP/RPUSH/LREM/LLEN/INCR on a shared Redis
//!   └── InMemoryPoolStore — single-process queues (tests, `memory://`)
//! ```
//!
//! Every operation maps onto one native atomic list command, so two
//! concurrent `dequeue_front` calls can never return the same entry.

pub mod error;
pub mod memory;
pub mod redis_store;
pub mod store;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryPoolStore;
pub use redis_store::RedisPoolStore;
pub use store::{PoolStore, SharedStore, StoreFuture, pool_counts};
pub use types::*;

/// URL scheme selecting the in-process backend.
pub const MEMORY_URL: &str = "memory://";

/// Open the store named by `url`.
///
/// `memory://` yields an [`InMemoryPoolStore`]; anything else is handed to
/// the Redis client. No connection is made here: the Redis backend connects
/// lazily so an unreachable store never blocks startup.
pub fn open_store(url: &str, keys: QueueKeys, timeout: Duration) -> StoreResult<SharedStore> {
    if url.starts_with(MEMORY_URL) {
        return Ok(Arc::new(InMemoryPoolStore::new()));
    }
    Ok(Arc::new(RedisPoolStore::open(url, keys, timeout)?))
}
