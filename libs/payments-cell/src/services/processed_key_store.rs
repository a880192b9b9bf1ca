use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::instrument;

use crate::error::PaymentsError;

/// Idempotency registry for the payment event handler. `event_kind` is
/// e.g. `"conversation.payment_succeeded.v1"`; `key` is the event's
/// idempotency key (provider_ref ∨ booking_intent_id ∨ event_id).
#[async_trait]
pub trait ProcessedKeyStore: Send + Sync {
    async fn already_processed(&self, event_kind: &str, key: &str) -> Result<bool, PaymentsError>;
    async fn mark_processed(&self, event_kind: &str, key: &str) -> Result<(), PaymentsError>;
}

const PROCESSED_KEY_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;

pub struct RedisProcessedKeyStore {
    pool: Pool,
}

impl RedisProcessedKeyStore {
    pub async fn new(redis_url: &str) -> Result<Self, PaymentsError> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1)).map_err(|e| PaymentsError::Transport(e.to_string()))?;
        Ok(Self { pool })
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, PaymentsError> {
        self.pool.get().await.map_err(|e| PaymentsError::Transport(e.to_string()))
    }

    fn key(event_kind: &str, key: &str) -> String {
        format!("processed_event:{event_kind}:{key}")
    }
}

#[async_trait]
impl ProcessedKeyStore for RedisProcessedKeyStore {
    #[instrument(skip(self))]
    async fn already_processed(&self, event_kind: &str, key: &str) -> Result<bool, PaymentsError> {
        let mut conn = self.connection().await?;
        let exists: bool = conn.exists(Self::key(event_kind, key)).await?;
        Ok(exists)
    }

    #[instrument(skip(self))]
    async fn mark_processed(&self, event_kind: &str, key: &str) -> Result<(), PaymentsError> {
        let mut conn = self.connection().await?;
        let _: () = conn.set_ex(Self::key(event_kind, key), "1", PROCESSED_KEY_TTL_SECONDS).await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryProcessedKeyStore {
    seen: Arc<RwLock<HashSet<String>>>,
}

impl InMemoryProcessedKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(event_kind: &str, key: &str) -> String {
        format!("{event_kind}:{key}")
    }
}

#[async_trait]
impl ProcessedKeyStore for InMemoryProcessedKeyStore {
    async fn already_processed(&self, event_kind: &str, key: &str) -> Result<bool, PaymentsError> {
        Ok(self.seen.read().await.contains(&Self::key(event_kind, key)))
    }

    async fn mark_processed(&self, event_kind: &str, key: &str) -> Result<(), PaymentsError> {
        self.seen.write().await.insert(Self::key(event_kind, key));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unseen_key_is_not_processed() {
        let store = InMemoryProcessedKeyStore::new();
        assert!(!store.already_processed("conversation.payment_succeeded.v1", "pi_1").await.unwrap());
    }

    #[tokio::test]
    async fn marking_processed_is_observed_on_next_check() {
        let store = InMemoryProcessedKeyStore::new();
        store.mark_processed("conversation.payment_succeeded.v1", "pi_1").await.unwrap();
        assert!(store.already_processed("conversation.payment_succeeded.v1", "pi_1").await.unwrap());
    }

    #[tokio::test]
    async fn distinct_event_kinds_do_not_share_keys() {
        let store = InMemoryProcessedKeyStore::new();
        store.mark_processed("conversation.payment_succeeded.v1", "pi_1").await.unwrap();
        assert!(!store.already_processed("conversation.payment_failed.v1", "pi_1").await.unwrap());
    }
}
