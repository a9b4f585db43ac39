//! The `PoolStore` seam shared by every component.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::StoreResult;
use crate::types::{PodDescriptor, PoolCounts, PoolQueue};

/// Boxed future alias for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Shared handle injected into each component.
pub type SharedStore = Arc<dyn PoolStore>;

/// Queue and counter operations on the coordination store.
///
/// Implementations must make each call atomic with respect to concurrent
/// callers; client-side read-modify-write is not acceptable.
pub trait PoolStore: Send + Sync {
    /// Append a descriptor to the back of `queue`.
    fn enqueue<'a>(&'a self, queue: PoolQueue, pod: &'a PodDescriptor) -> StoreFuture<'a, ()>;

    /// Atomically pop the front of `queue`.
    fn dequeue_front(&self, queue: PoolQueue) -> StoreFuture<'_, Option<PodDescriptor>>;

    /// Atomically pop the back of `queue`.
    fn dequeue_back(&self, queue: PoolQueue) -> StoreFuture<'_, Option<PodDescriptor>>;

    /// Remove every entry for the same pod. Returns how many were removed;
    /// removing an absent pod returns 0.
    fn remove<'a>(&'a self, queue: PoolQueue, pod: &'a PodDescriptor) -> StoreFuture<'a, usize>;

    /// Number of entries in `queue`.
    fn length(&self, queue: PoolQueue) -> StoreFuture<'_, usize>;

    /// Snapshot of the queue contents, front first.
    fn members(&self, queue: PoolQueue) -> StoreFuture<'_, Vec<PodDescriptor>>;

    /// Increment the counter at `key` and return the new value.
    fn incr_counter<'a>(&'a self, key: &'a str) -> StoreFuture<'a, u64>;

    /// Connectivity probe.
    fn ping(&self) -> StoreFuture<'_, ()>;
}

/// Read both queue lengths.
pub async fn pool_counts(store: &dyn PoolStore) -> StoreResult<PoolCounts> {
    let active = store.length(PoolQueue::Active).await?;
    let idle = store.length(PoolQueue::Warm).await?;
    Ok(PoolCounts { idle, active })
}
