use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::error::PaymentsError;

/// Generic booking confirmation collaborator. §4.9 step 2 calls this
/// before attempting the Moxie-specific fast path (step 3) — every
/// payment confirmation confirms the booking generically, regardless of
/// which booking platform the clinic runs.
#[async_trait]
pub trait BookingConfirmation: Send + Sync {
    async fn confirm_booking(&self, org_id: &str, lead_id: &str, scheduled_for: Option<DateTime<Utc>>) -> Result<(), PaymentsError>;
}

/// "no-preference" sentinel for `provider_id` when the patient never
/// named a specific provider.
pub const NO_PREFERENCE_PROVIDER: &str = "no-preference";

pub const MOXIE_APPOINTMENT_DURATION: Duration = Duration::minutes(45);

#[derive(Debug, Clone)]
pub struct CreateAppointmentRequest {
    pub org_id: String,
    pub lead_id: String,
    pub service_menu_item_id: String,
    pub provider_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl CreateAppointmentRequest {
    pub fn new(org_id: impl Into<String>, lead_id: impl Into<String>, service_menu_item_id: impl Into<String>, provider_id: impl Into<String>, start: DateTime<Utc>) -> Self {
        Self { org_id: org_id.into(), lead_id: lead_id.into(), service_menu_item_id: service_menu_item_id.into(), provider_id: provider_id.into(), start, end: start + MOXIE_APPOINTMENT_DURATION }
    }
}

#[derive(Debug, Clone)]
pub struct MoxieAppointmentResult {
    pub session_id: String,
}

/// Moxie's `CreateAppointment` GraphQL call. Wire details stay outside
/// this crate; this is the contract the payment event handler consumes
/// for its Stripe+Moxie fast path.
#[async_trait]
pub trait MoxieBookingClient: Send + Sync {
    async fn create_appointment(&self, request: CreateAppointmentRequest) -> Result<MoxieAppointmentResult, PaymentsError>;
}

/// No-op stand-in for deployments whose booking platform has no
/// generic confirmation step of its own (the Moxie fast path in
/// `payment_event_handler` covers platforms that do). Logs and succeeds.
pub struct LoggingBookingConfirmation;

#[async_trait]
impl BookingConfirmation for LoggingBookingConfirmation {
    async fn confirm_booking(&self, org_id: &str, lead_id: &str, scheduled_for: Option<DateTime<Utc>>) -> Result<(), PaymentsError> {
        info!(org_id, lead_id, ?scheduled_for, "booking confirmed (generic)");
        Ok(())
    }
}

#[cfg(test)]
pub mod fakes {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    pub struct FakeBookingConfirmation {
        pub confirmed: AtomicBool,
    }

    #[async_trait]
    impl BookingConfirmation for FakeBookingConfirmation {
        async fn confirm_booking(&self, _org_id: &str, _lead_id: &str, _scheduled_for: Option<DateTime<Utc>>) -> Result<(), PaymentsError> {
            self.confirmed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeMoxieBookingClient {
        pub fail: bool,
    }

    #[async_trait]
    impl MoxieBookingClient for FakeMoxieBookingClient {
        async fn create_appointment(&self, _request: CreateAppointmentRequest) -> Result<MoxieAppointmentResult, PaymentsError> {
            if self.fail {
                return Err(PaymentsError::BookingFailed("moxie booking failed".into()));
            }
            Ok(MoxieAppointmentResult { session_id: "session-1".into() })
        }
    }
}
