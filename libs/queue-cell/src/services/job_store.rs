use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::instrument;

use crate::error::QueueError;
use crate::models::{JobRecord, JobStatus};

/// Per-request lifecycle record store. `put_pending` is conditional on
/// absence — a second insert for the same `job_id` is a no-op success,
/// not an overwrite, so retried publishers never clobber an in-flight
/// record.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn put_pending(&self, job: JobRecord) -> Result<(), QueueError>;
    async fn mark_completed(
        &self,
        job_id: &str,
        response: Option<serde_json::Value>,
        conversation_id: Option<String>,
    ) -> Result<(), QueueError>;
    async fn mark_failed(&self, job_id: &str, error_message: &str) -> Result<(), QueueError>;
    async fn get_job(&self, job_id: &str) -> Result<JobRecord, QueueError>;
}

const JOB_KEY_PREFIX: &str = "booking_job:";

pub struct RedisJobStore {
    pool: Pool,
}

impl RedisJobStore {
    pub async fn new(redis_url: &str) -> Result<Self, QueueError> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| QueueError::Transport(e.to_string()))?;
        Ok(Self { pool })
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, QueueError> {
        self.pool.get().await.map_err(|e| QueueError::Transport(e.to_string()))
    }

    fn key(job_id: &str) -> String {
        format!("{JOB_KEY_PREFIX}{job_id}")
    }

    async fn load(&self, job_id: &str) -> Result<Option<JobRecord>, QueueError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.hget(Self::key(job_id), "record").await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn store(&self, job: &JobRecord) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let json = serde_json::to_string(job)?;
        let ttl_secs = (job.expires_at - chrono::Utc::now()).num_seconds().max(1);
        let key = Self::key(&job.job_id);
        let _: () = conn.hset(&key, "record", json).await?;
        let _: () = conn.expire(&key, ttl_secs).await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    #[instrument(skip(self, job))]
    async fn put_pending(&self, job: JobRecord) -> Result<(), QueueError> {
        if job.job_id.is_empty() {
            return Err(QueueError::Validation("job_id must not be empty".into()));
        }
        if self.load(&job.job_id).await?.is_some() {
            // already inserted by a prior (possibly retried) publish call
            return Ok(());
        }
        self.store(&job).await
    }

    #[instrument(skip(self, response))]
    async fn mark_completed(
        &self,
        job_id: &str,
        response: Option<serde_json::Value>,
        conversation_id: Option<String>,
    ) -> Result<(), QueueError> {
        self.transition(job_id, JobStatus::Completed, response, conversation_id, None).await
    }

    #[instrument(skip(self))]
    async fn mark_failed(&self, job_id: &str, error_message: &str) -> Result<(), QueueError> {
        self.transition(job_id, JobStatus::Failed, None, None, Some(error_message.to_string())).await
    }

    async fn get_job(&self, job_id: &str) -> Result<JobRecord, QueueError> {
        if job_id.is_empty() {
            return Err(QueueError::Validation("job_id must not be empty".into()));
        }
        self.load(job_id).await?.ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))
    }
}

impl RedisJobStore {
    async fn transition(
        &self,
        job_id: &str,
        next: JobStatus,
        response: Option<serde_json::Value>,
        conversation_id: Option<String>,
        error: Option<String>,
    ) -> Result<(), QueueError> {
        let mut job = self.get_job(job_id).await?;
        if !job.status.can_transition_to(next) {
            // idempotent re-delivery landing on an already-terminal job is
            // not an error: the first delivery already recorded the result.
            if job.status == next {
                return Ok(());
            }
            return Err(QueueError::InvalidStatusTransition {
                from: format!("{:?}", job.status),
                to: format!("{next:?}"),
            });
        }
        job.status = next;
        job.response = response;
        job.conversation_id = conversation_id.or(job.conversation_id);
        job.error = error;
        job.updated_at = chrono::Utc::now();
        self.store(&job).await
    }
}

/// In-process fake for tests.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Arc<RwLock<HashMap<String, JobRecord>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn put_pending(&self, job: JobRecord) -> Result<(), QueueError> {
        if job.job_id.is_empty() {
            return Err(QueueError::Validation("job_id must not be empty".into()));
        }
        let mut jobs = self.jobs.write().await;
        jobs.entry(job.job_id.clone()).or_insert(job);
        Ok(())
    }

    async fn mark_completed(
        &self,
        job_id: &str,
        response: Option<serde_json::Value>,
        conversation_id: Option<String>,
    ) -> Result<(), QueueError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(job_id).ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
        if !job.status.can_transition_to(JobStatus::Completed) && job.status != JobStatus::Completed {
            return Err(QueueError::InvalidStatusTransition {
                from: format!("{:?}", job.status),
                to: "Completed".into(),
            });
        }
        job.status = JobStatus::Completed;
        job.response = response;
        job.conversation_id = conversation_id.or(job.conversation_id.clone());
        job.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn mark_failed(&self, job_id: &str, error_message: &str) -> Result<(), QueueError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(job_id).ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
        if !job.status.can_transition_to(JobStatus::Failed) && job.status != JobStatus::Failed {
            return Err(QueueError::InvalidStatusTransition {
                from: format!("{:?}", job.status),
                to: "Failed".into(),
            });
        }
        job.status = JobStatus::Failed;
        job.error = Some(error_message.to_string());
        job.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<JobRecord, QueueError> {
        if job_id.is_empty() {
            return Err(QueueError::Validation("job_id must not be empty".into()));
        }
        let jobs = self.jobs.read().await;
        jobs.get(job_id).cloned().ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobKind;

    fn sample_job(job_id: &str) -> JobRecord {
        JobRecord::new_pending(job_id.to_string(), JobKind::Message, serde_json::json!({}), chrono::Duration::hours(1))
    }

    #[tokio::test]
    async fn put_pending_is_idempotent() {
        let store = InMemoryJobStore::new();
        store.put_pending(sample_job("job-1")).await.unwrap();
        store.put_pending(sample_job("job-1")).await.unwrap();
        let job = store.get_job("job-1").await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn status_cannot_regress() {
        let store = InMemoryJobStore::new();
        store.put_pending(sample_job("job-2")).await.unwrap();
        store.mark_completed("job-2", None, None).await.unwrap();
        let err = store.mark_failed("job-2", "too late").await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidStatusTransition { .. }));
    }

    #[tokio::test]
    async fn get_missing_job_errors() {
        let store = InMemoryJobStore::new();
        assert!(matches!(store.get_job("missing").await, Err(QueueError::JobNotFound(_))));
    }
}
