use std::sync::Arc;

use chrono::Duration;
use tracing::instrument;

use crate::error::QueueError;
use crate::models::{JobKind, JobRecord, QueuePayload};
use crate::services::job_store::JobStore;
use crate::services::queue::Queue;

/// Enqueues typed jobs. Ordering matters here: for a tracked job the
/// pending row is written *before* the queue send, so a caller polling
/// the job store immediately after publish never sees a 404.
pub struct Publisher {
    queue: Arc<dyn Queue>,
    job_store: Arc<dyn JobStore>,
    job_ttl: Duration,
}

impl Publisher {
    pub fn new(queue: Arc<dyn Queue>, job_store: Arc<dyn JobStore>, job_ttl: Duration) -> Self {
        Self { queue, job_store, job_ttl }
    }

    #[instrument(skip(self, body))]
    pub async fn enqueue_start(&self, body: serde_json::Value) -> Result<String, QueueError> {
        self.enqueue_tracked(JobKind::Start, body).await
    }

    #[instrument(skip(self, body))]
    pub async fn enqueue_message(&self, body: serde_json::Value) -> Result<String, QueueError> {
        self.enqueue_tracked(JobKind::Message, body).await
    }

    /// Payment events are never tracked: their idempotency key lives on
    /// the event itself (`PaymentEventHandler::already_processed`), not on
    /// a job row.
    #[instrument(skip(self, body))]
    pub async fn enqueue_payment_succeeded(&self, body: serde_json::Value) -> Result<String, QueueError> {
        self.enqueue_untracked(JobKind::Payment, body).await
    }

    #[instrument(skip(self, body))]
    pub async fn enqueue_payment_failed(&self, body: serde_json::Value) -> Result<String, QueueError> {
        self.enqueue_untracked(JobKind::PaymentFailed, body).await
    }

    async fn enqueue_tracked(&self, kind: JobKind, body: serde_json::Value) -> Result<String, QueueError> {
        let payload = QueuePayload::new_tracked(kind, body.clone());
        let job_id = payload.job_id();

        let record = JobRecord::new_pending(job_id.clone(), kind, body, self.job_ttl);
        self.job_store.put_pending(record).await?;

        let encoded = serde_json::to_vec(&payload)?;
        self.queue.send(&encoded).await?;
        Ok(job_id)
    }

    async fn enqueue_untracked(&self, kind: JobKind, body: serde_json::Value) -> Result<String, QueueError> {
        let payload = QueuePayload::new_untracked(kind, body);
        let job_id = payload.job_id();
        let encoded = serde_json::to_vec(&payload)?;
        self.queue.send(&encoded).await?;
        Ok(job_id)
    }
}
