use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::instrument;

use crate::error::PaymentsError;
use crate::models::{PaymentIntent, PaymentStatus};

/// Backing store for payment intents. `has_open_deposit` is mandatory —
/// the deposit dispatcher treats its absence (an implementation that
/// doesn't support the check) as a hard rejection, never a silent skip.
#[async_trait]
pub trait PaymentIntentStore: Send + Sync {
    async fn has_open_deposit(&self, org_id: &str, lead_id: &str) -> Result<bool, PaymentsError>;
    async fn insert_pending(&self, intent: PaymentIntent) -> Result<(), PaymentsError>;
    async fn mark_paid(&self, org_id: &str, lead_id: &str) -> Result<(), PaymentsError>;
    async fn mark_failed(&self, org_id: &str, lead_id: &str) -> Result<(), PaymentsError>;
}

fn key(org_id: &str, lead_id: &str) -> String {
    format!("payment_intent:{org_id}:{lead_id}")
}

pub struct RedisPaymentIntentStore {
    pool: Pool,
}

impl RedisPaymentIntentStore {
    pub async fn new(redis_url: &str) -> Result<Self, PaymentsError> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1)).map_err(|e| PaymentsError::Transport(e.to_string()))?;
        Ok(Self { pool })
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, PaymentsError> {
        self.pool.get().await.map_err(|e| PaymentsError::Transport(e.to_string()))
    }
}

#[async_trait]
impl PaymentIntentStore for RedisPaymentIntentStore {
    #[instrument(skip(self))]
    async fn has_open_deposit(&self, org_id: &str, lead_id: &str) -> Result<bool, PaymentsError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.get(key(org_id, lead_id)).await?;
        let Some(raw) = raw else { return Ok(false) };
        let intent: PaymentIntent = serde_json::from_str(&raw)?;
        Ok(matches!(intent.status, PaymentStatus::DepositPending | PaymentStatus::DepositPaid))
    }

    #[instrument(skip(self, intent))]
    async fn insert_pending(&self, intent: PaymentIntent) -> Result<(), PaymentsError> {
        let mut conn = self.connection().await?;
        let json = serde_json::to_string(&intent)?;
        let _: () = conn.set(key(&intent.org_id, &intent.lead_id), json).await?;
        Ok(())
    }

    async fn mark_paid(&self, org_id: &str, lead_id: &str) -> Result<(), PaymentsError> {
        self.transition(org_id, lead_id, PaymentStatus::DepositPaid).await
    }

    async fn mark_failed(&self, org_id: &str, lead_id: &str) -> Result<(), PaymentsError> {
        self.transition(org_id, lead_id, PaymentStatus::Failed).await
    }
}

impl RedisPaymentIntentStore {
    async fn transition(&self, org_id: &str, lead_id: &str, status: PaymentStatus) -> Result<(), PaymentsError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.get(key(org_id, lead_id)).await?;
        let Some(raw) = raw else {
            return Err(PaymentsError::Validation(format!("no payment intent for {org_id}/{lead_id}")));
        };
        let mut intent: PaymentIntent = serde_json::from_str(&raw)?;
        intent.status = status;
        let json = serde_json::to_string(&intent)?;
        let _: () = conn.set(key(org_id, lead_id), json).await?;
        Ok(())
    }
}

/// In-process store for tests and deployments without Redis wired in.
#[derive(Default)]
pub struct InMemoryPaymentIntentStore {
    intents: Arc<RwLock<HashMap<String, PaymentIntent>>>,
}

impl InMemoryPaymentIntentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentIntentStore for InMemoryPaymentIntentStore {
    async fn has_open_deposit(&self, org_id: &str, lead_id: &str) -> Result<bool, PaymentsError> {
        let intents = self.intents.read().await;
        Ok(intents.get(&key(org_id, lead_id)).is_some_and(|i| matches!(i.status, PaymentStatus::DepositPending | PaymentStatus::DepositPaid)))
    }

    async fn insert_pending(&self, intent: PaymentIntent) -> Result<(), PaymentsError> {
        let k = key(&intent.org_id, &intent.lead_id);
        self.intents.write().await.insert(k, intent);
        Ok(())
    }

    async fn mark_paid(&self, org_id: &str, lead_id: &str) -> Result<(), PaymentsError> {
        let mut intents = self.intents.write().await;
        let intent = intents.get_mut(&key(org_id, lead_id)).ok_or_else(|| PaymentsError::Validation("no payment intent".into()))?;
        intent.status = PaymentStatus::DepositPaid;
        Ok(())
    }

    async fn mark_failed(&self, org_id: &str, lead_id: &str) -> Result<(), PaymentsError> {
        let mut intents = self.intents.write().await;
        let intent = intents.get_mut(&key(org_id, lead_id)).ok_or_else(|| PaymentsError::Validation("no payment intent".into()))?;
        intent.status = PaymentStatus::Failed;
        Ok(())
    }
}

/// A store stand-in that always errors on `has_open_deposit`, modeling a
/// backend that does not implement the duplicate guard. The dispatcher
/// must reject rather than silently proceed when wired against this.
pub struct UnsupportedDuplicateGuardStore;

#[async_trait]
impl PaymentIntentStore for UnsupportedDuplicateGuardStore {
    async fn has_open_deposit(&self, _org_id: &str, _lead_id: &str) -> Result<bool, PaymentsError> {
        Err(PaymentsError::DuplicateGuardUnavailable("has_open_deposit not supported by this backend".into()))
    }

    async fn insert_pending(&self, _intent: PaymentIntent) -> Result<(), PaymentsError> {
        Err(PaymentsError::DuplicateGuardUnavailable("unsupported".into()))
    }

    async fn mark_paid(&self, _org_id: &str, _lead_id: &str) -> Result<(), PaymentsError> {
        Err(PaymentsError::DuplicateGuardUnavailable("unsupported".into()))
    }

    async fn mark_failed(&self, _org_id: &str, _lead_id: &str) -> Result<(), PaymentsError> {
        Err(PaymentsError::DuplicateGuardUnavailable("unsupported".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_intent_means_no_open_deposit() {
        let store = InMemoryPaymentIntentStore::new();
        assert!(!store.has_open_deposit("org-1", "lead-1").await.unwrap());
    }

    #[tokio::test]
    async fn pending_intent_counts_as_open() {
        let store = InMemoryPaymentIntentStore::new();
        store.insert_pending(PaymentIntent::new_pending("pi-1", "org-1", "lead-1", "stripe", "bi-1", 5000, None)).await.unwrap();
        assert!(store.has_open_deposit("org-1", "lead-1").await.unwrap());
    }

    #[tokio::test]
    async fn marking_failed_closes_the_open_deposit() {
        let store = InMemoryPaymentIntentStore::new();
        store.insert_pending(PaymentIntent::new_pending("pi-1", "org-1", "lead-1", "stripe", "bi-1", 5000, None)).await.unwrap();
        store.mark_failed("org-1", "lead-1").await.unwrap();
        assert!(!store.has_open_deposit("org-1", "lead-1").await.unwrap());
    }
}
