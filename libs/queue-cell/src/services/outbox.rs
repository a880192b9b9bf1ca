use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use shared_database::PlatformClient;

use crate::error::QueueError;
use crate::services::publisher::Publisher;

/// A persisted domain event awaiting translation into a queue job. The
/// envelope's `event_type` is the routing key the dispatcher matches on;
/// `payload` is the event's own self-describing body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub aggregate: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl OutboxEntry {
    pub fn new(aggregate: impl Into<String>, event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            aggregate: aggregate.into(),
            event_type: event_type.into(),
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Read side of the outbox table: undispatched entries, and a way to mark
/// one dispatched once the corresponding queue job has been enqueued.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn insert(&self, entry: OutboxEntry) -> Result<(), QueueError>;
    async fn fetch_undispatched(&self, limit: u32) -> Result<Vec<OutboxEntry>, QueueError>;
    async fn mark_dispatched(&self, id: Uuid) -> Result<(), QueueError>;
}

/// In-process outbox store used by tests and any deployment that hasn't
/// wired a REST-backed one.
#[derive(Default)]
pub struct InMemoryOutboxStore {
    entries: tokio::sync::Mutex<Vec<OutboxEntry>>,
    dispatched: tokio::sync::Mutex<std::collections::HashSet<Uuid>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn insert(&self, entry: OutboxEntry) -> Result<(), QueueError> {
        self.entries.lock().await.push(entry);
        Ok(())
    }

    async fn fetch_undispatched(&self, limit: u32) -> Result<Vec<OutboxEntry>, QueueError> {
        let dispatched = self.dispatched.lock().await;
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .filter(|e| !dispatched.contains(&e.id))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn mark_dispatched(&self, id: Uuid) -> Result<(), QueueError> {
        self.dispatched.lock().await.insert(id);
        Ok(())
    }
}

/// REST-backed outbox, following `opt_out`/`inbound_store`'s shape in
/// `conversation-cell`: filtered `GET`s and a `POST`/`PATCH` against a
/// single table, behind a shared `PlatformClient`.
pub struct PlatformOutboxStore {
    client: Arc<PlatformClient>,
}

impl PlatformOutboxStore {
    pub fn new(client: Arc<PlatformClient>) -> Self {
        Self { client }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OutboxRow {
    id: Uuid,
    aggregate: String,
    event_type: String,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
    #[serde(default)]
    dispatched: bool,
}

impl From<&OutboxEntry> for OutboxRow {
    fn from(entry: &OutboxEntry) -> Self {
        Self { id: entry.id, aggregate: entry.aggregate.clone(), event_type: entry.event_type.clone(), payload: entry.payload.clone(), created_at: entry.created_at, dispatched: false }
    }
}

impl From<OutboxRow> for OutboxEntry {
    fn from(row: OutboxRow) -> Self {
        Self { id: row.id, aggregate: row.aggregate, event_type: row.event_type, payload: row.payload, created_at: row.created_at }
    }
}

#[async_trait]
impl OutboxStore for PlatformOutboxStore {
    #[instrument(skip(self, entry))]
    async fn insert(&self, entry: OutboxEntry) -> Result<(), QueueError> {
        let row = OutboxRow::from(&entry);
        let body = serde_json::to_value(&row)?;
        self.client
            .request_lenient::<serde_json::Value>(Method::POST, "/rest/v1/outbox_entries", Some(body))
            .await
            .map_err(|e| QueueError::Transport(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn fetch_undispatched(&self, limit: u32) -> Result<Vec<OutboxEntry>, QueueError> {
        let path = format!("/rest/v1/outbox_entries?dispatched=eq.false&order=created_at.asc&limit={limit}");
        let rows: Vec<OutboxRow> = self.client.request_lenient(Method::GET, &path, None).await.map_err(|e| QueueError::Transport(e.to_string()))?;
        Ok(rows.into_iter().map(OutboxEntry::from).collect())
    }

    #[instrument(skip(self))]
    async fn mark_dispatched(&self, id: Uuid) -> Result<(), QueueError> {
        let path = format!("/rest/v1/outbox_entries?id=eq.{id}");
        self.client
            .request_lenient::<serde_json::Value>(Method::PATCH, &path, Some(serde_json::json!({"dispatched": true})))
            .await
            .map_err(|e| QueueError::Transport(e.to_string()))?;
        Ok(())
    }
}

const EVT_MESSAGE_RECEIVED: &str = "messaging.message.received.v1";
const EVT_PAYMENT_SUCCEEDED: &str = "payment_succeeded.v1";
const EVT_PAYMENT_FAILED: &str = "payment_failed.v1";
const EVT_DEPOSIT_REQUESTED: &str = "payments.deposit.requested.v1";

/// Translates persisted domain events into queue jobs. This is the single
/// seam where at-least-once outbox delivery becomes at-least-once queue
/// delivery — downstream idempotency (the payment handler's processed-key
/// check) is what makes the composite effect exactly-once.
pub struct OutboxDispatcher<S: OutboxStore> {
    store: Arc<S>,
    publisher: Arc<Publisher>,
}

impl<S: OutboxStore> OutboxDispatcher<S> {
    pub fn new(store: Arc<S>, publisher: Arc<Publisher>) -> Self {
        Self { store, publisher }
    }

    /// Drains one batch of undispatched entries. Returns the number of
    /// entries processed (dispatched or deliberately ignored) so the
    /// cleanup loop can decide whether to tick again sooner.
    #[instrument(skip(self))]
    pub async fn dispatch_once(&self, batch_size: u32) -> Result<usize, QueueError> {
        let entries = self.store.fetch_undispatched(batch_size).await?;
        let count = entries.len();

        for entry in entries {
            match self.dispatch_entry(&entry).await {
                Ok(()) => self.store.mark_dispatched(entry.id).await?,
                Err(e) => {
                    // leave undispatched so the next tick retries it
                    error!(entry_id = %entry.id, event_type = %entry.event_type, error = %e, "outbox dispatch failed, will retry");
                }
            }
        }

        Ok(count)
    }

    async fn dispatch_entry(&self, entry: &OutboxEntry) -> Result<(), QueueError> {
        match entry.event_type.as_str() {
            EVT_MESSAGE_RECEIVED => {
                // Inbound messages are dispatched directly by the webhook
                // that wrote this event; re-dispatching here would fire
                // the LLM a second time for the same turn.
                debug!("ignoring {} (already dispatched inline)", EVT_MESSAGE_RECEIVED);
                Ok(())
            }
            EVT_DEPOSIT_REQUESTED => {
                debug!("ignoring {} (audit only)", EVT_DEPOSIT_REQUESTED);
                Ok(())
            }
            EVT_PAYMENT_SUCCEEDED => {
                self.publisher.enqueue_payment_succeeded(entry.payload.clone()).await?;
                Ok(())
            }
            EVT_PAYMENT_FAILED => {
                self.publisher.enqueue_payment_failed(entry.payload.clone()).await?;
                Ok(())
            }
            other => {
                warn!("unhandled outbox event type: {other}");
                Err(QueueError::Processing(format!("unhandled outbox event type: {other}")))
            }
        }
    }

    /// Runs `dispatch_once` on an interval until cancelled. Mirrors the
    /// teacher's cleanup-loop shape: tick, do work, log, repeat.
    pub async fn run(&self, interval: StdDuration, batch_size: u32, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.dispatch_once(batch_size).await {
                        Ok(n) if n > 0 => debug!("dispatched {n} outbox entries"),
                        Ok(_) => {}
                        Err(e) => error!("outbox dispatch loop error: {e}"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::job_store::InMemoryJobStore;
    use crate::services::queue::InMemoryQueue;

    fn dispatcher() -> (OutboxDispatcher<InMemoryOutboxStore>, Arc<InMemoryQueue>) {
        let store = Arc::new(InMemoryOutboxStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let job_store = Arc::new(InMemoryJobStore::new());
        let publisher = Arc::new(Publisher::new(queue.clone(), job_store, chrono::Duration::hours(1)));
        (OutboxDispatcher::new(store, publisher), queue)
    }

    #[tokio::test]
    async fn message_received_events_enqueue_nothing() {
        let (dispatcher, queue) = dispatcher();
        dispatcher.store.insert(OutboxEntry::new("conversation", EVT_MESSAGE_RECEIVED, serde_json::json!({}))).await.unwrap();
        let n = dispatcher.dispatch_once(10).await.unwrap();
        assert_eq!(n, 1);
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn payment_succeeded_events_enqueue_an_untracked_payment_job() {
        let (dispatcher, queue) = dispatcher();
        dispatcher.store.insert(OutboxEntry::new("payment", EVT_PAYMENT_SUCCEEDED, serde_json::json!({"event_id": "evt-1"}))).await.unwrap();
        dispatcher.dispatch_once(10).await.unwrap();
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn unhandled_event_types_stay_undispatched_for_retry() {
        let (dispatcher, _queue) = dispatcher();
        dispatcher.store.insert(OutboxEntry::new("other", "unknown.v1", serde_json::json!({}))).await.unwrap();
        dispatcher.dispatch_once(10).await.unwrap();
        let still_pending = dispatcher.store.fetch_undispatched(10).await.unwrap();
        assert_eq!(still_pending.len(), 1);
    }
}
