use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A voice call's status machine: ringing -> active -> (ended | sms_handoff).
/// Once terminal (`Ended` or `SmsHandoff`) the status never moves again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Ringing,
    Active,
    Ended,
    SmsHandoff,
}

impl CallStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Ended | CallStatus::SmsHandoff)
    }
}

/// One turn of the voice call transcript. Voice replies are never sent as
/// SMS (the voice webhook returns text synchronously to the caller) so
/// this is the only durable record of what was said.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceTranscriptEntry {
    pub role: String,
    pub body: String,
    pub at: DateTime<Utc>,
}

impl VoiceTranscriptEntry {
    pub fn new(role: impl Into<String>, body: impl Into<String>) -> Self {
        Self { role: role.into(), body: body.into(), at: Utc::now() }
    }
}

/// Per-call state. TTL is 24h from `last_activity_at`; the store refreshes
/// the TTL on every write so an active call never expires mid-conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceCallState {
    pub call_id: String,
    pub org_id: String,
    pub caller_phone: String,
    pub clinic_phone: String,
    pub conversation_id: Option<String>,
    pub lead_id: Option<String>,
    pub status: CallStatus,
    pub turn_count: u32,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    pub sms_handoff_sent: bool,
}

impl VoiceCallState {
    pub fn new(call_id: impl Into<String>, org_id: impl Into<String>, caller_phone: impl Into<String>, clinic_phone: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            call_id: call_id.into(),
            org_id: org_id.into(),
            caller_phone: caller_phone.into(),
            clinic_phone: clinic_phone.into(),
            conversation_id: None,
            lead_id: None,
            status: CallStatus::Ringing,
            turn_count: 0,
            started_at: now,
            last_activity_at: now,
            outcome: None,
            sms_handoff_sent: false,
        }
    }
}
