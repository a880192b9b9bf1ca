use std::sync::Arc;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use tracing::{debug, instrument};

use crate::error::QueueError;

/// One dequeued message: its raw body and an opaque handle the caller
/// must present to `delete` once the message has been fully handled.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub id: String,
    pub body: Vec<u8>,
    pub receipt_handle: String,
}

/// At-least-once message transport. `receive` is a long poll: an empty
/// batch on return is not an error. `delete` with an empty handle is a
/// no-op — callers that skip deletion on purpose (to force redelivery)
/// simply don't call it.
#[async_trait]
pub trait Queue: Send + Sync {
    async fn send(&self, body: &[u8]) -> Result<(), QueueError>;
    async fn receive(&self, max_batch: u32, wait_seconds: u32) -> Result<Vec<QueueMessage>, QueueError>;
    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError>;
}

/// Redis-backed queue using the pending/processing two-list handoff:
/// `send` pushes onto `{prefix}:pending`; `receive` atomically moves an
/// item to `{prefix}:processing` via `brpoplpush` so a crash between
/// receive and delete leaves the message recoverable rather than lost.
/// `delete` removes the specific value from the processing list.
pub struct RedisQueue {
    pool: Pool,
    pending_key: String,
    processing_key: String,
}

impl RedisQueue {
    pub async fn new(redis_url: &str, queue_name: &str) -> Result<Self, QueueError> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| QueueError::Transport(e.to_string()))?;

        {
            let mut conn = pool.get().await.map_err(|e| QueueError::Transport(e.to_string()))?;
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        }

        Ok(Self {
            pool,
            pending_key: format!("{queue_name}:pending"),
            processing_key: format!("{queue_name}:processing"),
        })
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, QueueError> {
        self.pool.get().await.map_err(|e| QueueError::Transport(e.to_string()))
    }
}

#[async_trait]
impl Queue for RedisQueue {
    #[instrument(skip(self, body))]
    async fn send(&self, body: &[u8]) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let body = String::from_utf8_lossy(body).into_owned();
        let _: i64 = conn.lpush(&self.pending_key, body).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn receive(&self, max_batch: u32, wait_seconds: u32) -> Result<Vec<QueueMessage>, QueueError> {
        let mut conn = self.connection().await?;
        let mut out = Vec::new();

        for _ in 0..max_batch.max(1) {
            // The first pop in a batch blocks up to `wait_seconds`; the
            // rest are opportunistic, non-blocking drains of whatever else
            // is already pending so one receive call can return a full
            // batch without holding the connection open for `max_batch *
            // wait_seconds`.
            let wait = if out.is_empty() { wait_seconds as f64 } else { 0.01 };
            let item: Option<String> = conn
                .brpoplpush(&self.pending_key, &self.processing_key, wait)
                .await?;

            match item {
                Some(body) => out.push(QueueMessage {
                    id: uuid::Uuid::new_v4().to_string(),
                    receipt_handle: body.clone(),
                    body: body.into_bytes(),
                }),
                None => break,
            }
        }

        debug!("received {} message(s)", out.len());
        Ok(out)
    }

    #[instrument(skip(self))]
    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        if receipt_handle.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        let _: i64 = conn.lrem(&self.processing_key, 1, receipt_handle).await?;
        Ok(())
    }
}

/// In-process fake used by tests and by any code that wants a queue
/// without a live Redis instance behind it.
pub struct InMemoryQueue {
    pending: Arc<tokio::sync::Mutex<Vec<Vec<u8>>>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    async fn send(&self, body: &[u8]) -> Result<(), QueueError> {
        self.pending.lock().await.push(body.to_vec());
        Ok(())
    }

    async fn receive(&self, max_batch: u32, _wait_seconds: u32) -> Result<Vec<QueueMessage>, QueueError> {
        let mut guard = self.pending.lock().await;
        let take = max_batch.max(1) as usize;
        let drained: Vec<Vec<u8>> = if guard.len() <= take {
            std::mem::take(&mut *guard)
        } else {
            guard.drain(0..take).collect()
        };
        Ok(drained
            .into_iter()
            .map(|body| {
                let handle = uuid::Uuid::new_v4().to_string();
                QueueMessage { id: handle.clone(), receipt_handle: handle, body }
            })
            .collect())
    }

    async fn delete(&self, _receipt_handle: &str) -> Result<(), QueueError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_queue_round_trips_a_message() {
        let queue = InMemoryQueue::new();
        queue.send(b"hello").await.unwrap();
        assert_eq!(queue.len().await, 1);

        let batch = queue.receive(5, 0).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body, b"hello");
        queue.delete(&batch[0].receipt_handle).await.unwrap();
    }

    #[tokio::test]
    async fn in_memory_queue_receive_on_empty_is_not_an_error() {
        let queue = InMemoryQueue::new();
        let batch = queue.receive(5, 0).await.unwrap();
        assert!(batch.is_empty());
    }
}
