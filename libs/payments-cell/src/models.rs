use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `Payment Intent (external table)` from the data model: at most one row
/// per `(org_id, lead_id)` with status in `{DepositPending, DepositPaid}`
/// at any time — enforced by the duplicate guard in the deposit
/// dispatcher, not by this type itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    DepositPending,
    DepositPaid,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub org_id: String,
    pub lead_id: String,
    pub provider: String,
    pub booking_intent_id: String,
    pub amount_cents: u64,
    pub status: PaymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl PaymentIntent {
    pub fn new_pending(id: impl Into<String>, org_id: impl Into<String>, lead_id: impl Into<String>, provider: impl Into<String>, booking_intent_id: impl Into<String>, amount_cents: u64, scheduled_for: Option<DateTime<Utc>>) -> Self {
        Self {
            id: id.into(),
            org_id: org_id.into(),
            lead_id: lead_id.into(),
            provider: provider.into(),
            booking_intent_id: booking_intent_id.into(),
            amount_cents,
            status: PaymentStatus::DepositPending,
            scheduled_for,
        }
    }
}

/// Payload carried by a `payment` queue job, decoded from the outbox
/// event `payment_succeeded.v1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSucceededV1 {
    pub event_id: String,
    pub org_id: String,
    pub lead_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_intent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
    pub phone: String,
    /// Service name and provider preference the lead expressed during
    /// qualification; carried on the event because this crate has no
    /// lead store of its own (that is `patient-cell`'s concern, out of
    /// scope here). Used only on the Stripe+Moxie fast path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_provider: Option<String>,
}

impl PaymentSucceededV1 {
    /// Idempotency key = provider_ref ∨ booking_intent_id ∨ event_id, in
    /// that priority order — the provider's own reference is the
    /// strongest guarantee of uniqueness, falling back to the weakest
    /// (our own event id) only when upstream gave us nothing better.
    pub fn idempotency_key(&self) -> &str {
        self.provider_ref.as_deref().or(self.booking_intent_id.as_deref()).unwrap_or(&self.event_id)
    }
}

/// Payload carried by a `payment_failed` queue job, decoded from the
/// outbox event `payment_failed.v1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentFailedV1 {
    pub event_id: String,
    pub org_id: String,
    pub lead_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_intent_id: Option<String>,
    pub phone: String,
}

impl PaymentFailedV1 {
    pub fn idempotency_key(&self) -> &str {
        self.provider_ref.as_deref().or(self.booking_intent_id.as_deref()).unwrap_or(&self.event_id)
    }
}

/// The outbox event this crate produces: `payments.deposit.requested.v1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRequestedV1 {
    pub event_id: String,
    pub org_id: String,
    pub lead_id: String,
    pub amount_cents: u64,
    pub booking_intent_id: String,
    pub requested_at: DateTime<Utc>,
    pub checkout_url: String,
    pub provider: String,
}

/// A fully resolved checkout link, either freshly created or consumed
/// from the preloader cache.
#[derive(Debug, Clone)]
pub struct CheckoutLink {
    pub url: String,
    pub provider_payment_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_prefers_provider_ref() {
        let event = PaymentSucceededV1 {
            event_id: "evt-1".into(),
            org_id: "org-1".into(),
            lead_id: "lead-1".into(),
            provider_ref: Some("pi_123".into()),
            booking_intent_id: Some("bi_456".into()),
            scheduled_for: None,
            phone: "+15551234567".into(),
            requested_service: None,
            preferred_provider: None,
        };
        assert_eq!(event.idempotency_key(), "pi_123");
    }

    #[test]
    fn idempotency_key_falls_back_to_event_id() {
        let event = PaymentFailedV1 {
            event_id: "evt-1".into(),
            org_id: "org-1".into(),
            lead_id: "lead-1".into(),
            provider_ref: None,
            booking_intent_id: None,
            phone: "+15551234567".into(),
        };
        assert_eq!(event.idempotency_key(), "evt-1");
    }
}
