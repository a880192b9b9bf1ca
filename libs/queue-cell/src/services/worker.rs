use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use crate::error::QueueError;
use crate::models::{JobKind, QueuePayload};
use crate::services::job_store::JobStore;
use crate::services::queue::Queue;

/// Outcome of handling one job: an optional response to record on the job
/// row, and an optional conversation id the job store should index by.
pub struct JobOutcome {
    pub response: Option<serde_json::Value>,
    pub conversation_id: Option<String>,
}

impl JobOutcome {
    pub fn empty() -> Self {
        Self { response: None, conversation_id: None }
    }

    pub fn new(response: serde_json::Value, conversation_id: Option<String>) -> Self {
        Self { response: Some(response), conversation_id }
    }
}

/// Capability the worker pool dispatches to by `JobKind`. Implemented by
/// the conversation/payments crates; the queue-cell itself never knows
/// what a "message" or "payment" means beyond routing it.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle_start(&self, request: serde_json::Value) -> Result<JobOutcome, QueueError>;
    async fn handle_message(&self, request: serde_json::Value) -> Result<JobOutcome, QueueError>;
    async fn handle_payment(&self, event: serde_json::Value) -> Result<JobOutcome, QueueError>;
    async fn handle_payment_failed(&self, event: serde_json::Value) -> Result<JobOutcome, QueueError>;
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_count: usize,
    pub receive_batch_size: u32,
    pub receive_wait_seconds: u32,
    pub job_timeout: Duration,
    pub health_check_interval: Duration,
    pub graceful_shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            receive_batch_size: 5,
            receive_wait_seconds: 2,
            job_timeout: Duration::from_secs(120),
            health_check_interval: Duration::from_secs(60),
            graceful_shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Validates and clamps the `receive_batch_size` knob per the broker's
/// documented bounds: zero is rejected outright (a worker that never asks
/// for any messages is a misconfiguration, not a valid "off" state), and
/// anything above the broker's per-call ceiling is silently clamped to it
/// rather than rejected, since a clinic raising this value is just asking
/// for more throughput than the broker allows per call.
pub fn normalize_receive_batch_size(requested: u32) -> Result<u32, QueueError> {
    if requested == 0 {
        return Err(QueueError::Validation("receive_batch_size must be at least 1".into()));
    }
    Ok(requested.min(10))
}

/// Long-polling worker pool. Each of `worker_count` loops independently
/// receives a batch, dispatches every message in it by `kind`, and
/// acknowledges (deletes) only on a terminal outcome it is safe to stop
/// redelivering — see `process_message` for the exact rules.
///
/// The shutdown flag is a single shared `Arc<RwLock<bool>>`: every worker
/// loop observes the same flag, so a `shutdown()` call reliably stops all
/// of them rather than only the loop that happens to hold the call.
pub struct WorkerPool<H: JobHandler> {
    config: WorkerConfig,
    queue: Arc<dyn Queue>,
    job_store: Arc<dyn JobStore>,
    handler: Arc<H>,
    is_shutdown: Arc<RwLock<bool>>,
}

impl<H: JobHandler + 'static> WorkerPool<H> {
    pub fn new(config: WorkerConfig, queue: Arc<dyn Queue>, job_store: Arc<dyn JobStore>, handler: Arc<H>) -> Self {
        Self {
            config,
            queue,
            job_store,
            handler,
            is_shutdown: Arc::new(RwLock::new(false)),
        }
    }

    #[instrument(skip(self))]
    pub async fn start(&self) {
        let mut tasks = Vec::new();

        for worker_index in 0..self.config.worker_count {
            let queue = self.queue.clone();
            let job_store = self.job_store.clone();
            let handler = self.handler.clone();
            let config = self.config.clone();
            let is_shutdown = self.is_shutdown.clone();

            tasks.push(tokio::spawn(async move {
                worker_loop(worker_index, queue, job_store, handler, config, is_shutdown).await;
            }));
        }

        {
            let is_shutdown = self.is_shutdown.clone();
            let interval = self.config.health_check_interval;
            tasks.push(tokio::spawn(async move {
                health_check_loop(interval, is_shutdown).await;
            }));
        }

        futures::future::join_all(tasks).await;
    }

    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        {
            let mut flag = self.is_shutdown.write().await;
            *flag = true;
        }
        tokio::time::sleep(self.config.graceful_shutdown_timeout).await;
    }
}

async fn worker_loop<H: JobHandler>(
    worker_index: usize,
    queue: Arc<dyn Queue>,
    job_store: Arc<dyn JobStore>,
    handler: Arc<H>,
    config: WorkerConfig,
    is_shutdown: Arc<RwLock<bool>>,
) {
    info!("worker {worker_index} started");

    const BACKOFF_FLOOR: Duration = Duration::from_secs(1);
    const BACKOFF_CEILING: Duration = Duration::from_secs(5);
    let mut backoff = BACKOFF_FLOOR;

    loop {
        if *is_shutdown.read().await {
            info!("worker {worker_index} shutting down");
            break;
        }

        let batch = match queue.receive(config.receive_batch_size, config.receive_wait_seconds).await {
            Ok(batch) => batch,
            Err(e) => {
                error!("worker {worker_index} receive error: {e}, backing off {backoff:?}");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(BACKOFF_CEILING);
                continue;
            }
        };
        backoff = BACKOFF_FLOOR;

        if batch.is_empty() {
            tokio::time::sleep(Duration::from_millis(100)).await;
            continue;
        }

        for message in batch {
            process_message(&*handler, &*job_store, &*queue, &message.body, &message.receipt_handle, config.job_timeout).await;
        }
    }
}

async fn process_message<H: JobHandler>(
    handler: &H,
    job_store: &dyn JobStore,
    queue: &dyn Queue,
    body: &[u8],
    receipt_handle: &str,
    job_timeout: Duration,
) {
    let payload: QueuePayload = match serde_json::from_slice(body) {
        Ok(p) => p,
        Err(e) => {
            // malformed payloads can never succeed on redelivery either;
            // drop them rather than spin forever.
            error!("dropping undecodable job payload: {e}");
            if let Err(e) = queue.delete(receipt_handle).await {
                error!("failed to delete poison-pill message: {e}");
            }
            return;
        }
    };

    let job_id = payload.job_id();
    let dispatch = tokio::time::timeout(job_timeout, dispatch_job(handler, &payload)).await;

    match dispatch {
        Ok(Ok(outcome)) => {
            if payload.track_status {
                if let Err(e) = job_store.mark_completed(&job_id, outcome.response, outcome.conversation_id).await {
                    error!(job_id, "failed to mark job completed: {e}");
                }
            }
            if let Err(e) = queue.delete(receipt_handle).await {
                error!(job_id, "failed to delete processed message: {e}");
            }
        }
        Ok(Err(e)) => {
            warn!(job_id, "job handler failed: {e}");
            if payload.track_status {
                if let Err(store_err) = job_store.mark_failed(&job_id, &e.to_string()).await {
                    error!(job_id, "failed to mark job failed: {store_err}");
                }
            }
            // do not delete: let the broker redeliver
        }
        Err(_) => {
            warn!(job_id, "job handler timed out after {:?}", job_timeout);
            if payload.track_status {
                let msg = format!("timed out after {}s", job_timeout.as_secs());
                if let Err(store_err) = job_store.mark_failed(&job_id, &msg).await {
                    error!(job_id, "failed to mark job failed after timeout: {store_err}");
                }
            }
            // do not delete: let the broker redeliver
        }
    }
}

async fn dispatch_job<H: JobHandler>(handler: &H, payload: &QueuePayload) -> Result<JobOutcome, QueueError> {
    match payload.kind {
        JobKind::Start => {
            let body = payload.start.clone().ok_or_else(|| QueueError::Validation("start job missing body".into()))?;
            handler.handle_start(body).await
        }
        JobKind::Message => {
            let body = payload.message.clone().ok_or_else(|| QueueError::Validation("message job missing body".into()))?;
            handler.handle_message(body).await
        }
        JobKind::Payment => {
            let body = payload.payment.clone().ok_or_else(|| QueueError::Validation("payment job missing body".into()))?;
            handler.handle_payment(body).await
        }
        JobKind::PaymentFailed => {
            let body = payload.payment.clone().ok_or_else(|| QueueError::Validation("payment_failed job missing body".into()))?;
            handler.handle_payment_failed(body).await
        }
    }
}

async fn health_check_loop(interval: Duration, is_shutdown: Arc<RwLock<bool>>) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if *is_shutdown.read().await {
            break;
        }
        debug!("queue worker pool health check: alive");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::job_store::InMemoryJobStore;
    use crate::services::queue::InMemoryQueue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: AtomicUsize,
        fail_message: bool,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn handle_start(&self, _request: serde_json::Value) -> Result<JobOutcome, QueueError> {
            Ok(JobOutcome::empty())
        }

        async fn handle_message(&self, _request: serde_json::Value) -> Result<JobOutcome, QueueError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_message {
                return Err(QueueError::Processing("boom".into()));
            }
            Ok(JobOutcome::new(serde_json::json!({"ok": true}), Some("sms:org:123".into())))
        }

        async fn handle_payment(&self, _event: serde_json::Value) -> Result<JobOutcome, QueueError> {
            Ok(JobOutcome::empty())
        }

        async fn handle_payment_failed(&self, _event: serde_json::Value) -> Result<JobOutcome, QueueError> {
            Ok(JobOutcome::empty())
        }
    }

    #[tokio::test]
    async fn successful_job_marks_completed_and_deletes() {
        let queue = InMemoryQueue::new();
        let job_store = InMemoryJobStore::new();
        let handler = CountingHandler { calls: AtomicUsize::new(0), fail_message: false };

        let payload = QueuePayload::new_tracked(JobKind::Message, serde_json::json!({"body": "hi"}));
        let job_id = payload.job_id();
        job_store
            .put_pending(crate::models::JobRecord::new_pending(job_id.clone(), JobKind::Message, serde_json::json!({}), chrono::Duration::hours(1)))
            .await
            .unwrap();

        let body = serde_json::to_vec(&payload).unwrap();
        process_message(&handler, &job_store, &queue, &body, "handle-1", Duration::from_secs(5)).await;

        let job = job_store.get_job(&job_id).await.unwrap();
        assert_eq!(job.status, crate::models::JobStatus::Completed);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_job_marks_failed_and_does_not_delete() {
        let queue = InMemoryQueue::new();
        let job_store = InMemoryJobStore::new();
        let handler = CountingHandler { calls: AtomicUsize::new(0), fail_message: true };

        let payload = QueuePayload::new_tracked(JobKind::Message, serde_json::json!({"body": "hi"}));
        let job_id = payload.job_id();
        job_store
            .put_pending(crate::models::JobRecord::new_pending(job_id.clone(), JobKind::Message, serde_json::json!({}), chrono::Duration::hours(1)))
            .await
            .unwrap();

        queue.send(&serde_json::to_vec(&payload).unwrap()).await.unwrap();
        let batch = queue.receive(1, 0).await.unwrap();

        process_message(&handler, &job_store, &queue, &batch[0].body, &batch[0].receipt_handle, Duration::from_secs(5)).await;

        let job = job_store.get_job(&job_id).await.unwrap();
        assert_eq!(job.status, crate::models::JobStatus::Failed);
        // message must still be receivable (not deleted) so it is redelivered
        let redelivered = queue.receive(1, 0).await.unwrap();
        assert_eq!(redelivered.len(), 1);
    }

    #[test]
    fn receive_batch_size_zero_is_rejected() {
        assert!(normalize_receive_batch_size(0).is_err());
    }

    #[test]
    fn receive_batch_size_above_ceiling_is_clamped() {
        assert_eq!(normalize_receive_batch_size(999).unwrap(), 10);
    }

    #[tokio::test]
    async fn undecodable_payload_is_dropped_not_redelivered() {
        let queue = InMemoryQueue::new();
        let job_store = InMemoryJobStore::new();
        let handler = CountingHandler { calls: AtomicUsize::new(0), fail_message: false };

        queue.send(b"not json").await.unwrap();
        let batch = queue.receive(1, 0).await.unwrap();
        process_message(&handler, &job_store, &queue, &batch[0].body, &batch[0].receipt_handle, Duration::from_secs(5)).await;

        let redelivered = queue.receive(1, 0).await.unwrap();
        assert!(redelivered.is_empty());
    }
}
