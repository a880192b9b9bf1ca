use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of work a queue message carries. One variant per handler the
/// worker pool dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Start,
    Message,
    Payment,
    PaymentFailed,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Start => "start",
            JobKind::Message => "message",
            JobKind::Payment => "payment",
            JobKind::PaymentFailed => "payment_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Completed,
    Failed,
}

impl JobStatus {
    /// Mirrors the monotonic transition table a booking job's status
    /// follows: pending may move to either terminal state; terminal
    /// states never move again.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Completed) | (JobStatus::Pending, JobStatus::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Queue payload body. `track_status = false` is used for payment events,
/// which should never create a job row (the payment's own idempotency key
/// is the tracking mechanism, not the queue job).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuePayload {
    pub id: Uuid,
    pub kind: JobKind,
    pub track_status: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment: Option<serde_json::Value>,
}

impl QueuePayload {
    pub fn new_tracked(kind: JobKind, body: serde_json::Value) -> Self {
        let id = Uuid::new_v4();
        let mut payload = Self {
            id,
            kind,
            track_status: true,
            start: None,
            message: None,
            payment: None,
        };
        match kind {
            JobKind::Start => payload.start = Some(body),
            JobKind::Message => payload.message = Some(body),
            JobKind::Payment | JobKind::PaymentFailed => payload.payment = Some(body),
        }
        payload
    }

    pub fn new_untracked(kind: JobKind, body: serde_json::Value) -> Self {
        let mut payload = Self::new_tracked(kind, body);
        payload.track_status = false;
        payload
    }

    pub fn job_id(&self) -> String {
        self.id.to_string()
    }
}

/// Per-request lifecycle record. Insertion is conditional on absence (see
/// `JobStore::put_pending`); `status` only ever moves pending -> terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub request_snapshot: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new_pending(job_id: String, kind: JobKind, request_snapshot: serde_json::Value, ttl: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            kind,
            status: JobStatus::Pending,
            request_snapshot,
            response: None,
            conversation_id: None,
            error: None,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_are_one_way() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn payload_routes_body_by_kind() {
        let payload = QueuePayload::new_tracked(JobKind::Message, serde_json::json!({"body": "hi"}));
        assert!(payload.message.is_some());
        assert!(payload.start.is_none());
        assert!(payload.track_status);
    }

    #[test]
    fn untracked_payload_disables_job_row() {
        let payload = QueuePayload::new_untracked(JobKind::Payment, serde_json::json!({}));
        assert!(!payload.track_status);
    }
}
