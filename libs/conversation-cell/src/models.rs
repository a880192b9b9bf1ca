use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use scheduling_cell::TimeSelectionResponse;
use shared_models::error::AppError;

/// The surface a patient reached the clinic through. Selects the
/// messenger/reply-pipeline branch by data — see `reply_pipeline` — never
/// by runtime type inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Sms,
    Instagram,
    WebChat,
    Voice,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "sms",
            Channel::Instagram => "instagram",
            Channel::WebChat => "webchat",
            Channel::Voice => "voice",
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sms" => Ok(Channel::Sms),
            "instagram" => Ok(Channel::Instagram),
            "webchat" | "web_chat" => Ok(Channel::WebChat),
            "voice" => Ok(Channel::Voice),
            other => Err(AppError::ValidationError(format!("unknown channel: {other}"))),
        }
    }
}

/// A conversation's lifecycle. Transitions are monotonic forward in the
/// `Active -> AwaitingTimeSelection -> Booked -> Ended` sense, except
/// that `DepositPaid` is exempt — a payment webhook can land at any point
/// in that sequence, so it is always reachable and never itself blocks a
/// later forward move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    AwaitingTimeSelection,
    DepositPaid,
    Booked,
    Ended,
}

impl ConversationStatus {
    fn rank(&self) -> u8 {
        match self {
            ConversationStatus::Active => 0,
            ConversationStatus::AwaitingTimeSelection => 1,
            ConversationStatus::DepositPaid => 1,
            ConversationStatus::Booked => 2,
            ConversationStatus::Ended => 3,
        }
    }

    pub fn can_transition_to(&self, next: ConversationStatus) -> bool {
        if *self == next {
            return true;
        }
        if next == ConversationStatus::Ended || next == ConversationStatus::DepositPaid {
            return true;
        }
        next.rank() >= self.rank()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub org_id: String,
    pub lead_id: String,
    pub status: ConversationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: impl Into<String>, org_id: impl Into<String>, lead_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            org_id: org_id.into(),
            lead_id: lead_id.into(),
            status: ConversationStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptRole {
    User,
    Assistant,
    System,
}

/// What kind of assistant message this was — drives neither behavior nor
/// formatting on its own, but lets operators and tests distinguish an AI
/// reply from a deposit link or a payment confirmation in the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptKind {
    AiReply,
    DepositLink,
    PaymentConfirmation,
    VoiceReply,
    TimeSelection,
    BookingFallback,
    InstagramReply,
    WebchatReply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Failed,
    Suppressed,
}

/// Invariant: every assistant message actually sent to an external
/// channel appears exactly once here with a non-empty (non-`Suppressed`,
/// unless deliberately suppressed) status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub conversation_id: String,
    pub role: TranscriptRole,
    pub body: String,
    pub kind: TranscriptKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
    pub status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

impl TranscriptEntry {
    pub fn new(conversation_id: impl Into<String>, role: TranscriptRole, body: impl Into<String>, kind: TranscriptKind, status: DeliveryStatus) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            role,
            body: body.into(),
            kind,
            timestamp: Utc::now(),
            provider_message_id: None,
            status,
            error_reason: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    pub org_id: String,
    pub lead_id: String,
    pub conversation_id: String,
    pub channel: Channel,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRequest {
    pub org_id: String,
    pub lead_id: String,
    pub conversation_id: String,
    pub channel: Channel,
    pub from: String,
    pub to: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl MessageRequest {
    /// `scheduled_for` is read from either `scheduled_for` or
    /// `scheduledFor` in metadata, RFC3339 — the deposit dispatcher
    /// consults this when the `DepositIntent` itself carries none.
    pub fn scheduled_for(&self) -> Option<DateTime<Utc>> {
        self.metadata
            .get("scheduled_for")
            .or_else(|| self.metadata.get("scheduledFor"))
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Emitted by the processor when the turn resulted in a deposit offer.
/// The deposit dispatcher (`payments-cell`) is the sole consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositIntent {
    pub amount_cents: u64,
    pub success_url: String,
    pub cancel_url: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preloaded_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preloaded_payment_id: Option<String>,
}

/// The contract the (externally-implemented, LLM-backed) conversation
/// processor returns to the worker. `reply_text` is what the reply
/// pipeline sends; `deposit_intent` and `time_selection` are optional
/// side-channel instructions the worker acts on after delivery.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_kind: Option<TranscriptKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deposit_intent: Option<DepositIntent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_selection: Option<TimeSelectionResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl Response {
    pub fn reply_kind_or_default(&self) -> TranscriptKind {
        self.reply_kind.unwrap_or(TranscriptKind::AiReply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_allows_deposit_paid_out_of_order() {
        assert!(ConversationStatus::AwaitingTimeSelection.can_transition_to(ConversationStatus::DepositPaid));
        assert!(ConversationStatus::DepositPaid.can_transition_to(ConversationStatus::Booked));
    }

    #[test]
    fn status_rejects_backward_moves_other_than_deposit_paid() {
        assert!(!ConversationStatus::Booked.can_transition_to(ConversationStatus::Active));
    }

    #[test]
    fn status_allows_ended_from_any_state() {
        assert!(ConversationStatus::Active.can_transition_to(ConversationStatus::Ended));
        assert!(ConversationStatus::Booked.can_transition_to(ConversationStatus::Ended));
    }

    #[test]
    fn message_request_reads_scheduled_for_camel_or_snake_case() {
        let req = MessageRequest {
            org_id: "org-1".into(),
            lead_id: "lead-1".into(),
            conversation_id: "sms:org-1:15551234567".into(),
            channel: Channel::Sms,
            from: "+15551234567".into(),
            to: "+15557654321".into(),
            body: "ok".into(),
            provider_message_id: None,
            metadata: serde_json::json!({"scheduledFor": "2025-01-02T15:04:00Z"}),
        };
        assert!(req.scheduled_for().is_some());
    }
}
