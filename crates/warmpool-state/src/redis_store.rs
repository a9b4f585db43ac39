//! Redis-backed pool store.
//!
//! Queues are Redis lists (`RPUSH` to enqueue, `LPOP`/`RPOP` to claim,
//! `LREM` to remove, `LLEN` to count); the pod counter is `INCR`. The
//! connection is a [`ConnectionManager`] created lazily on first use and
//! reconnected by the manager itself, so an unreachable Redis surfaces as
//! `StoreError::Unavailable` per call instead of failing startup.

use std::future::Future;
use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::store::{PoolStore, StoreFuture};
use crate::types::{PodDescriptor, PoolQueue, QueueKeys};

/// Pool store on a shared Redis instance.
pub struct RedisPoolStore {
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
    keys: QueueKeys,
    /// Upper bound for connecting and for each command.
    timeout: Duration,
}

impl RedisPoolStore {
    /// Validate the URL and prepare a client. Does not connect.
    pub fn open(url: &str, keys: QueueKeys, timeout: Duration) -> StoreResult<Self> {
        let client = redis::Client::open(url).map_err(|e| StoreError::Config(e.to_string()))?;
        debug!(%url, warm = %keys.warm, active = %keys.active, "redis pool store configured");
        Ok(Self {
            client,
            conn: OnceCell::new(),
            keys,
            timeout,
        })
    }

    async fn connection(&self) -> StoreResult<ConnectionManager> {
        let init = self.conn.get_or_try_init(|| async {
            ConnectionManager::new(self.client.clone())
                .await
                .map_err(StoreError::from)
        });
        match tokio::time::timeout(self.timeout, init).await {
            Ok(conn) => Ok(conn?.clone()),
            Err(_) => Err(StoreError::Unavailable(format!(
                "connect timed out after {:?}",
                self.timeout
            ))),
        }
    }

    /// Run one command under the configured timeout.
    async fn bounded<T>(
        &self,
        op: &str,
        fut: impl Future<Output = redis::RedisResult<T>>,
    ) -> StoreResult<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res.map_err(StoreError::from),
            Err(_) => Err(StoreError::Unavailable(format!(
                "{op} timed out after {:?}",
                self.timeout
            ))),
        }
    }

    async fn pop(&self, queue: PoolQueue, front: bool) -> StoreResult<Option<PodDescriptor>> {
        let key = self.keys.key(queue);
        let mut conn = self.connection().await?;
        loop {
            let raw: Option<String> = if front {
                self.bounded("lpop", conn.lpop(key, None)).await?
            } else {
                self.bounded("rpop", conn.rpop(key, None)).await?
            };
            let Some(raw) = raw else {
                return Ok(None);
            };
            match PodDescriptor::decode(&raw) {
                Ok(pod) => return Ok(Some(pod)),
                Err(e) => warn!(%queue, %raw, error = %e, "dropping undecodable queue entry"),
            }
        }
    }
}

impl PoolStore for RedisPoolStore {
    fn enqueue<'a>(&'a self, queue: PoolQueue, pod: &'a PodDescriptor) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let raw = pod.encode()?;
            let mut conn = self.connection().await?;
            let _len: i64 = self
                .bounded("rpush", conn.rpush(self.keys.key(queue), raw))
                .await?;
            Ok(())
        })
    }

    fn dequeue_front(&self, queue: PoolQueue) -> StoreFuture<'_, Option<PodDescriptor>> {
        Box::pin(self.pop(queue, true))
    }

    fn dequeue_back(&self, queue: PoolQueue) -> StoreFuture<'_, Option<PodDescriptor>> {
        Box::pin(self.pop(queue, false))
    }

    fn remove<'a>(&'a self, queue: PoolQueue, pod: &'a PodDescriptor) -> StoreFuture<'a, usize> {
        Box::pin(async move {
            let key = self.keys.key(queue);
            let raw = pod.encode()?;
            let mut conn = self.connection().await?;

            // Fast path: the entry was written with this exact encoding.
            let exact: i64 = self.bounded("lrem", conn.lrem(key, 0, raw)).await?;
            if exact > 0 {
                return Ok(exact as usize);
            }

            // Otherwise match on pod name; each LREM stays atomic, and an
            // entry claimed concurrently simply yields 0.
            let entries: Vec<String> = self.bounded("lrange", conn.lrange(key, 0, -1)).await?;
            let mut removed = 0usize;
            for entry in entries {
                let matches = PodDescriptor::decode(&entry)
                    .map(|d| d.same_pod(pod))
                    .unwrap_or(false);
                if matches {
                    let n: i64 = self.bounded("lrem", conn.lrem(key, 0, entry)).await?;
                    removed += n as usize;
                }
            }
            Ok(removed)
        })
    }

    fn length(&self, queue: PoolQueue) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let mut conn = self.connection().await?;
            let len: usize = self.bounded("llen", conn.llen(self.keys.key(queue))).await?;
            Ok(len)
        })
    }

    fn members(&self, queue: PoolQueue) -> StoreFuture<'_, Vec<PodDescriptor>> {
        Box::pin(async move {
            let mut conn = self.connection().await?;
            let entries: Vec<String> = self
                .bounded("lrange", conn.lrange(self.keys.key(queue), 0, -1))
                .await?;
            Ok(entries
                .iter()
                .filter_map(|raw| PodDescriptor::decode(raw).ok())
                .collect())
        })
    }

    fn incr_counter<'a>(&'a self, key: &'a str) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            let mut conn = self.connection().await?;
            let value: u64 = self.bounded("incr", conn.incr(key, 1u64)).await?;
            Ok(value)
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut conn = self.connection().await?;
            let _pong: String = self
                .bounded("ping", redis::cmd("PING").query_async(&mut conn))
                .await?;
            Ok(())
        })
    }
}
