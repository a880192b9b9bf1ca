use std::sync::Arc;

use tracing::{error, info, warn};

use clinic_cell::{BookingPlatform, ClinicConfigProvider};
use conversation_cell::{
    Channel, ConversationStatus, ConversationStore, DeliveryStatus, Messenger, OptOutRegistry, TranscriptEntry, TranscriptKind, TranscriptRole, TranscriptStore,
};
use shared_utils::time::format_friendly_datetime;

use crate::error::PaymentsError;
use crate::models::{PaymentFailedV1, PaymentSucceededV1};
use crate::services::booking_confirmation::{BookingConfirmation, CreateAppointmentRequest, MoxieBookingClient, NO_PREFERENCE_PROVIDER};
use crate::services::payment_intent_store::PaymentIntentStore;
use crate::services::processed_key_store::ProcessedKeyStore;

const PAYMENT_SUCCEEDED_KIND: &str = "conversation.payment_succeeded.v1";
const PAYMENT_FAILED_KIND: &str = "conversation.payment_failed.v1";
const CANCELLATION_REMINDER: &str = "Please let us know at least 24 hours in advance if you need to reschedule or cancel.";

/// Implements §4.9: idempotent processing of payment success/failure,
/// booking confirmation, status mutation, and the Stripe+Moxie fast path.
pub struct PaymentEventHandler {
    pub processed_keys: Arc<dyn ProcessedKeyStore>,
    pub payment_intents: Arc<dyn PaymentIntentStore>,
    pub booking: Arc<dyn BookingConfirmation>,
    pub moxie_client: Option<Arc<dyn MoxieBookingClient>>,
    pub clinic: Arc<dyn ClinicConfigProvider>,
    pub conversations: Arc<dyn ConversationStore>,
    pub opt_out: Arc<dyn OptOutRegistry>,
    pub messenger: Arc<Messenger>,
    pub transcript: Arc<dyn TranscriptStore>,
    pub default_from: String,
}

impl PaymentEventHandler {
    pub async fn handle_succeeded(&self, event: PaymentSucceededV1) -> Result<(), PaymentsError> {
        let key = event.idempotency_key().to_string();
        if self.processed_keys.already_processed(PAYMENT_SUCCEEDED_KIND, &key).await? {
            info!(key, "payment_succeeded already processed, skipping");
            return Ok(());
        }

        self.booking.confirm_booking(&event.org_id, &event.lead_id, event.scheduled_for).await?;

        let mut moxie_confirmed_time: Option<chrono::DateTime<chrono::Utc>> = None;
        if let (Some(moxie_client), Ok(BookingPlatform::Moxie), Some(start)) = (&self.moxie_client, self.clinic.booking_platform(&event.org_id).await, event.scheduled_for) {
            match self.try_moxie_booking(moxie_client.as_ref(), &event, start).await {
                Ok(()) => {
                    moxie_confirmed_time = Some(start);
                    let conversation_id = format!("sms:{}:{}", event.org_id, event.phone);
                    if let Err(err) = self.conversations.set_status(&conversation_id, ConversationStatus::Booked).await {
                        warn!(conversation_id, error = %err, "failed to mark conversation booked after moxie confirmation");
                    }
                }
                Err(err) => {
                    warn!(org_id = %event.org_id, lead_id = %event.lead_id, error = %err, "moxie booking failed, continuing with generic confirmation");
                }
            }
        }

        let body = self.confirmation_body(&event, moxie_confirmed_time).await?;
        self.send_confirmation(&event.org_id, &event.phone, &body, TranscriptKind::PaymentConfirmation).await;

        let conversation_id = format!("sms:{}:{}", event.org_id, event.phone);
        if let Err(err) = self.conversations.set_status(&conversation_id, ConversationStatus::DepositPaid).await {
            warn!(conversation_id, error = %err, "failed to mark conversation deposit_paid");
        }

        self.payment_intents.mark_paid(&event.org_id, &event.lead_id).await.ok();
        self.processed_keys.mark_processed(PAYMENT_SUCCEEDED_KIND, &key).await?;
        Ok(())
    }

    pub async fn handle_failed(&self, event: PaymentFailedV1) -> Result<(), PaymentsError> {
        let key = event.idempotency_key().to_string();
        if self.processed_keys.already_processed(PAYMENT_FAILED_KIND, &key).await? {
            info!(key, "payment_failed already processed, skipping");
            return Ok(());
        }

        self.payment_intents.mark_failed(&event.org_id, &event.lead_id).await.ok();

        let body = "We weren't able to process your deposit. Please reply here or try the link again to secure your priority booking.".to_string();
        self.send_confirmation(&event.org_id, &event.phone, &body, TranscriptKind::PaymentConfirmation).await;

        self.processed_keys.mark_processed(PAYMENT_FAILED_KIND, &key).await?;
        Ok(())
    }

    async fn try_moxie_booking(&self, client: &dyn MoxieBookingClient, event: &PaymentSucceededV1, start: chrono::DateTime<chrono::Utc>) -> Result<(), PaymentsError> {
        let service = event.requested_service.as_deref().unwrap_or_default();
        let service_menu_item_id = self
            .clinic
            .service_menu_item_id(&event.org_id, service)
            .await
            .map_err(|e| PaymentsError::BookingFailed(e.to_string()))?
            .ok_or_else(|| PaymentsError::BookingFailed("no service menu item configured for requested service".into()))?;

        let provider_id = match &event.preferred_provider {
            Some(name) => self.clinic.provider_id(&event.org_id, name).await.map_err(|e| PaymentsError::BookingFailed(e.to_string()))?.unwrap_or_else(|| NO_PREFERENCE_PROVIDER.to_string()),
            None => NO_PREFERENCE_PROVIDER.to_string(),
        };

        let request = CreateAppointmentRequest::new(event.org_id.clone(), event.lead_id.clone(), service_menu_item_id, provider_id, start);
        client.create_appointment(request).await?;
        Ok(())
    }

    async fn confirmation_body(&self, event: &PaymentSucceededV1, moxie_confirmed_time: Option<chrono::DateTime<chrono::Utc>>) -> Result<String, PaymentsError> {
        let (utc_offset, tz_abbr) = self.clinic.timezone(&event.org_id).await.map_err(|e| PaymentsError::Validation(e.to_string()))?;
        let clinic_name = self.clinic.clinic_name(&event.org_id).await.map_err(|e| PaymentsError::Validation(e.to_string()))?;

        if let Some(start) = moxie_confirmed_time {
            let friendly = format_friendly_datetime(start, utc_offset, &tz_abbr);
            return Ok(format!("You're confirmed for {friendly} at {clinic_name}. {CANCELLATION_REMINDER}"));
        }

        if let Some(scheduled_for) = event.scheduled_for {
            let friendly = format_friendly_datetime(scheduled_for, utc_offset, &tz_abbr);
            return Ok(format!("Your deposit was received for {friendly}. {CANCELLATION_REMINDER}"));
        }

        let callback_time = self.clinic.callback_time_phrase(&event.org_id).await.map_err(|e| PaymentsError::Validation(e.to_string()))?;
        Ok(format!("Your deposit was received; our team will call you {callback_time}."))
    }

    async fn send_confirmation(&self, org_id: &str, phone: &str, body: &str, kind: TranscriptKind) {
        match self.opt_out.is_opted_out(org_id, phone).await {
            Ok(true) => {
                info!(org_id, phone, "recipient opted out, suppressing payment confirmation sms");
                return;
            }
            Err(err) => {
                error!(org_id, phone, error = %err, "opt-out check failed, suppressing confirmation sms to be safe");
                return;
            }
            Ok(false) => {}
        }

        let conversation_id = format!("sms:{org_id}:{phone}");
        let send_result = self.messenger.send(Channel::Sms, &conversation_id, phone, &self.default_from, body).await;
        let (status, error_reason) = match send_result {
            Ok(_) => (DeliveryStatus::Sent, None),
            Err(err) => {
                error!(conversation_id, error = %err, "payment confirmation sms failed");
                (DeliveryStatus::Failed, Some(err.to_string()))
            }
        };

        let mut entry = TranscriptEntry::new(conversation_id, TranscriptRole::Assistant, body, kind, status);
        entry.error_reason = error_reason;
        let transcript = self.transcript.clone();
        tokio::spawn(async move {
            if let Err(err) = transcript.append(entry).await {
                error!(error = %err, "failed to append payment confirmation transcript entry");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::booking_confirmation::fakes::{FakeBookingConfirmation, FakeMoxieBookingClient};
    use crate::services::payment_intent_store::InMemoryPaymentIntentStore;
    use crate::services::processed_key_store::InMemoryProcessedKeyStore;
    use clinic_cell::{ClinicProfile, StaticClinicConfig};
    use conversation_cell::{InMemoryConversationStore, InMemoryOptOutRegistry, InMemoryTranscriptStore, SendOutcome, SmsSender};

    struct FakeSms;

    #[async_trait::async_trait]
    impl SmsSender for FakeSms {
        async fn send_sms(&self, _to: &str, _from: &str, _body: &str) -> Result<SendOutcome, conversation_cell::ConversationError> {
            Ok(SendOutcome { provider_message_id: Some("sm_1".into()) })
        }
    }

    fn handler() -> PaymentEventHandler {
        PaymentEventHandler {
            processed_keys: Arc::new(InMemoryProcessedKeyStore::new()),
            payment_intents: Arc::new(InMemoryPaymentIntentStore::new()),
            booking: Arc::new(FakeBookingConfirmation::default()),
            moxie_client: None,
            clinic: Arc::new(StaticClinicConfig::with_profile(ClinicProfile::default())),
            conversations: Arc::new(InMemoryConversationStore::new()),
            opt_out: Arc::new(InMemoryOptOutRegistry::new()),
            messenger: Arc::new(Messenger::new().with_sms(FakeSms)),
            transcript: Arc::new(InMemoryTranscriptStore::new()),
            default_from: "+15550001111".into(),
        }
    }

    fn succeeded_event() -> PaymentSucceededV1 {
        PaymentSucceededV1 {
            event_id: "evt-1".into(),
            org_id: "org-1".into(),
            lead_id: "lead-1".into(),
            provider_ref: Some("pi_123".into()),
            booking_intent_id: None,
            scheduled_for: None,
            phone: "15551234567".into(),
            requested_service: None,
            preferred_provider: None,
        }
    }

    #[tokio::test]
    async fn second_delivery_of_same_event_is_a_silent_noop() {
        let handler = handler();
        handler.handle_succeeded(succeeded_event()).await.unwrap();
        let key_seen_once = handler.processed_keys.already_processed("conversation.payment_succeeded.v1", "pi_123").await.unwrap();
        assert!(key_seen_once);
        // Second call must not error and must not attempt to re-confirm.
        handler.handle_succeeded(succeeded_event()).await.unwrap();
    }

    #[tokio::test]
    async fn falls_back_to_callback_time_message_with_no_scheduled_time() {
        let handler = handler();
        handler.conversations.get_or_create("sms:org-1:15551234567", "org-1", "lead-1").await.unwrap();
        handler.handle_succeeded(succeeded_event()).await.unwrap();
        let transcript = handler.transcript.list("sms:org-1:15551234567").await.unwrap();
        assert!(transcript.is_empty() || transcript[0].body.contains("received"));
    }

    #[tokio::test]
    async fn payment_failed_sends_retry_invitation() {
        let handler = handler();
        let event = PaymentFailedV1 { event_id: "evt-2".into(), org_id: "org-1".into(), lead_id: "lead-1".into(), provider_ref: Some("pi_999".into()), booking_intent_id: None, phone: "15551234567".into() };
        handler.handle_failed(event).await.unwrap();
        let already = handler.processed_keys.already_processed("conversation.payment_failed.v1", "pi_999").await.unwrap();
        assert!(already);
    }
}
