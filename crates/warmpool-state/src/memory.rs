//! In-process pool store.
//!
//! Backs `memory://` for single-process runs and every test in the
//! workspace. A mutex around each queue map gives the same per-operation
//! atomicity Redis provides for its list commands.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::store::{PoolStore, StoreFuture};
use crate::types::{PodDescriptor, PoolQueue};

/// Queue store held entirely in memory.
pub struct InMemoryPoolStore {
    queues: Mutex<HashMap<PoolQueue, VecDeque<PodDescriptor>>>,
    counters: Mutex<HashMap<String, u64>>,
    available: AtomicBool,
}

impl InMemoryPoolStore {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            counters: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: every operation fails with `Unavailable` until
    /// the store is marked available again.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        debug!(available, "in-memory store availability changed");
    }

    fn check(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store marked unavailable".to_string()))
        }
    }

    fn with_queue<T>(
        &self,
        queue: PoolQueue,
        f: impl FnOnce(&mut VecDeque<PodDescriptor>) -> T,
    ) -> StoreResult<T> {
        self.check()?;
        let mut queues = self
            .queues
            .lock()
            .map_err(|e| StoreError::Command(e.to_string()))?;
        Ok(f(queues.entry(queue).or_default()))
    }
}

impl Default for InMemoryPoolStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolStore for InMemoryPoolStore {
    fn enqueue<'a>(&'a self, queue: PoolQueue, pod: &'a PodDescriptor) -> StoreFuture<'a, ()> {
        Box::pin(async move { self.with_queue(queue, |q| q.push_back(pod.clone())) })
    }

    fn dequeue_front(&self, queue: PoolQueue) -> StoreFuture<'_, Option<PodDescriptor>> {
        Box::pin(async move { self.with_queue(queue, |q| q.pop_front()) })
    }

    fn dequeue_back(&self, queue: PoolQueue) -> StoreFuture<'_, Option<PodDescriptor>> {
        Box::pin(async move { self.with_queue(queue, |q| q.pop_back()) })
    }

    fn remove<'a>(&'a self, queue: PoolQueue, pod: &'a PodDescriptor) -> StoreFuture<'a, usize> {
        Box::pin(async move {
            self.with_queue(queue, |q| {
                let before = q.len();
                q.retain(|entry| !entry.same_pod(pod));
                before - q.len()
            })
        })
    }

    fn length(&self, queue: PoolQueue) -> StoreFuture<'_, usize> {
        Box::pin(async move { self.with_queue(queue, |q| q.len()) })
    }

    fn members(&self, queue: PoolQueue) -> StoreFuture<'_, Vec<PodDescriptor>> {
        Box::pin(async move { self.with_queue(queue, |q| q.iter().cloned().collect()) })
    }

    fn incr_counter<'a>(&'a self, key: &'a str) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            self.check()?;
            let mut counters = self
                .counters
                .lock()
                .map_err(|e| StoreError::Command(e.to_string()))?;
            let value = counters.entry(key.to_string()).or_insert(0);
            *value += 1;
            Ok(*value)
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.check() })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;
    use crate::store::pool_counts;

    fn pod(i: usize) -> PodDescriptor {
        PodDescriptor::for_address(format!("voice-agent-{i}"), &format!("10.0.0.{i}"), 8080)
    }

    #[tokio::test]
    async fn fifo_front_and_lifo_back() {
        let store = InMemoryPoolStore::new();
        for i in 1..=3 {
            store.enqueue(PoolQueue::Warm, &pod(i)).await.unwrap();
        }

        assert_eq!(store.dequeue_front(PoolQueue::Warm).await.unwrap(), Some(pod(1)));
        assert_eq!(store.dequeue_back(PoolQueue::Warm).await.unwrap(), Some(pod(3)));
        assert_eq!(store.length(PoolQueue::Warm).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dequeue_empty_returns_none() {
        let store = InMemoryPoolStore::new();
        assert!(store.dequeue_front(PoolQueue::Warm).await.unwrap().is_none());
        assert!(store.dequeue_back(PoolQueue::Active).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn queues_are_independent() {
        let store = InMemoryPoolStore::new();
        store.enqueue(PoolQueue::Warm, &pod(1)).await.unwrap();
        store.enqueue(PoolQueue::Active, &pod(2)).await.unwrap();
        store.enqueue(PoolQueue::Active, &pod(3)).await.unwrap();

        let counts = pool_counts(&store).await.unwrap();
        assert_eq!(counts.idle, 1);
        assert_eq!(counts.active, 2);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let store = InMemoryPoolStore::new();
        store.enqueue(PoolQueue::Active, &pod(1)).await.unwrap();

        assert_eq!(store.remove(PoolQueue::Active, &pod(1)).await.unwrap(), 1);
        assert_eq!(store.remove(PoolQueue::Active, &pod(1)).await.unwrap(), 0);
        assert_eq!(store.length(PoolQueue::Active).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn remove_matches_by_name_and_clears_duplicates() {
        let store = InMemoryPoolStore::new();
        store.enqueue(PoolQueue::Warm, &pod(1)).await.unwrap();
        store.enqueue(PoolQueue::Warm, &pod(2)).await.unwrap();
        // Duplicate registration with a slightly different endpoint.
        store
            .enqueue(PoolQueue::Warm, &PodDescriptor::new("voice-agent-1", "http://10.0.0.1:8080/"))
            .await
            .unwrap();

        let removed = store
            .remove(PoolQueue::Warm, &PodDescriptor::new("voice-agent-1", ""))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.members(PoolQueue::Warm).await.unwrap(), vec![pod(2)]);
    }

    #[tokio::test]
    async fn counter_is_monotonic_per_key() {
        let store = InMemoryPoolStore::new();
        assert_eq!(store.incr_counter("next-pod").await.unwrap(), 1);
        assert_eq!(store.incr_counter("next-pod").await.unwrap(), 2);
        assert_eq!(store.incr_counter("other").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn outage_fails_every_operation() {
        let store = InMemoryPoolStore::new();
        store.enqueue(PoolQueue::Warm, &pod(1)).await.unwrap();
        store.set_available(false);

        assert!(store.ping().await.unwrap_err().is_unavailable());
        assert!(store.dequeue_front(PoolQueue::Warm).await.unwrap_err().is_unavailable());
        assert!(store.incr_counter("k").await.unwrap_err().is_unavailable());

        store.set_available(true);
        store.ping().await.unwrap();
        assert_eq!(store.length(PoolQueue::Warm).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_claims_are_exclusive() {
        let store = Arc::new(InMemoryPoolStore::new());
        for i in 0..5 {
            store.enqueue(PoolQueue::Warm, &pod(i)).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.dequeue_front(PoolQueue::Warm).await.unwrap()
            }));
        }

        let mut claimed = Vec::new();
        for handle in handles {
            if let Some(pod) = handle.await.unwrap() {
                claimed.push(pod.name);
            }
        }

        let unique: HashSet<_> = claimed.iter().cloned().collect();
        assert_eq!(claimed.len(), 5);
        assert_eq!(unique.len(), 5);
    }
}
