use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use clinic_cell::ClinicConfigProvider;
use conversation_cell::{Channel, DeliveryStatus, MessageRequest, Messenger, TranscriptEntry, TranscriptKind, TranscriptRole};
use queue_cell::{OutboxEntry, OutboxStore};

use crate::error::PaymentsError;
use crate::models::{DepositRequestedV1, PaymentIntent};
use crate::services::checkout_provider::CheckoutProvider;
use crate::services::payment_intent_store::PaymentIntentStore;
use crate::services::preloader::DepositPreloader;

const MESSENGER_SEND_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_PRELOAD_WAIT_BUDGET: Duration = Duration::from_secs(2);

fn format_cents_as_dollars(amount_cents: u64) -> String {
    format!("${}.{:02}", amount_cents / 100, amount_cents % 100)
}

/// Outcome of one dispatch attempt. `Skipped` covers the duplicate-guard
/// short-circuit — it is success, not an error, per §4.7 step 3.
pub enum DepositDispatchOutcome {
    Sent { checkout_url: String },
    Skipped { reason: String },
}

/// Implements §4.7's at-most-once-effective, at-least-once-safe protocol
/// for issuing a deposit checkout link and its accompanying SMS.
pub struct DepositDispatcher<S> {
    pub payment_intent_store: Arc<dyn PaymentIntentStore>,
    pub checkout_provider: Arc<dyn CheckoutProvider>,
    pub preloader: Arc<DepositPreloader<S>>,
    pub clinic: Arc<dyn ClinicConfigProvider>,
    pub messenger: Arc<Messenger>,
    pub transcript: Arc<dyn conversation_cell::TranscriptStore>,
    pub outbox: Arc<dyn OutboxStore>,
    /// How long to wait for a preloaded checkout link before falling back
    /// to building one synchronously. Defaults to `DEFAULT_PRELOAD_WAIT_BUDGET`.
    pub preload_wait_budget: Duration,
}

impl<S: CheckoutProvider + 'static> DepositDispatcher<S> {
    pub async fn dispatch(
        &self,
        request: &MessageRequest,
        amount_cents: u64,
        success_url: &str,
        cancel_url: &str,
        description: &str,
        intent_scheduled_for: Option<DateTime<Utc>>,
        default_from: &str,
    ) -> Result<DepositDispatchOutcome, PaymentsError> {
        // Step 1: resolve scheduled_for (intent -> message metadata; absence is fine).
        let scheduled_for = intent_scheduled_for.or_else(|| request.scheduled_for());

        // Step 2: validate identifiers.
        if request.org_id.is_empty() || request.lead_id.is_empty() {
            return Err(PaymentsError::Validation("org_id and lead_id must be non-empty".into()));
        }

        // Step 3: duplicate guard — fail safe on error, mandatory on unsupported.
        let has_open = self.payment_intent_store.has_open_deposit(&request.org_id, &request.lead_id).await?;
        if has_open {
            info!(org_id = %request.org_id, lead_id = %request.lead_id, "open deposit already exists, skipping new link");
            return Ok(DepositDispatchOutcome::Skipped { reason: "open deposit already exists".into() });
        }

        // Step 4: consume preloaded checkout, or create a new one. The
        // pre_payment_id the cache was keyed with — not the provider's own
        // payment id — becomes the real intent's booking_intent_id, per
        // §4.8: the preloaded id and the final intent must agree.
        let (checkout_url, booking_intent_id) = match self.preloader.wait_for_preloaded(&request.conversation_id, self.preload_wait_budget).await {
            Some(preloaded) if preloaded.url.is_some() => {
                self.preloader.clear_preloaded(&request.conversation_id).await;
                (preloaded.url.unwrap(), preloaded.pre_payment_id)
            }
            _ => {
                self.preloader.clear_preloaded(&request.conversation_id).await;
                let link = self.checkout_provider.create_checkout(&request.org_id, &request.lead_id, amount_cents, success_url, cancel_url, description).await?;
                (link.url, link.provider_payment_id)
            }
        };

        let intent = PaymentIntent::new_pending(Uuid::new_v4().to_string(), request.org_id.clone(), request.lead_id.clone(), "default", booking_intent_id.clone(), amount_cents, scheduled_for);
        self.payment_intent_store.insert_pending(intent).await?;

        // Step 5: build SMS body.
        let amount_display = format_cents_as_dollars(amount_cents);
        let body = format!(
            "To secure priority booking, please place a refundable {amount_display} deposit: {checkout_url}\n\nNote: This reserves your priority spot, not a confirmed time. Our team will call to finalize your exact appointment."
        );

        // Step 6: resolve the From number.
        let from = if !request.to.is_empty() { request.to.as_str() } else { default_from };

        // Step 7: send with 5s timeout; record transcript regardless of outcome.
        let send_result = tokio::time::timeout(MESSENGER_SEND_TIMEOUT, self.messenger.send(Channel::Sms, &request.conversation_id, &request.from, from, &body)).await;

        let (status, error_reason) = match send_result {
            Ok(Ok(_)) => (DeliveryStatus::Sent, None),
            Ok(Err(err)) => {
                error!(conversation_id = %request.conversation_id, error = %err, "deposit sms send failed");
                (DeliveryStatus::Failed, Some(err.to_string()))
            }
            Err(_) => {
                error!(conversation_id = %request.conversation_id, "deposit sms send timed out");
                (DeliveryStatus::Failed, Some("deposit sms send timed out".to_string()))
            }
        };

        let mut entry = TranscriptEntry::new(request.conversation_id.clone(), TranscriptRole::Assistant, body.clone(), TranscriptKind::DepositLink, status);
        entry.error_reason = error_reason;
        let transcript = self.transcript.clone();
        tokio::spawn(async move {
            if let Err(err) = transcript.append(entry).await {
                error!(error = %err, "failed to append deposit link transcript entry");
            }
        });

        // Step 8: outbox event insert, logged but non-fatal on failure.
        let event = DepositRequestedV1 {
            event_id: Uuid::new_v4().to_string(),
            org_id: request.org_id.clone(),
            lead_id: request.lead_id.clone(),
            amount_cents,
            booking_intent_id,
            requested_at: Utc::now(),
            checkout_url: checkout_url.clone(),
            provider: "default".to_string(),
        };
        let payload = serde_json::to_value(&event).map_err(PaymentsError::from)?;
        if let Err(err) = self.outbox.insert(OutboxEntry::new("payment", "payments.deposit.requested.v1", payload)).await {
            warn!(conversation_id = %request.conversation_id, error = %err, "outbox insert for deposit request failed, patient already has link");
        }

        Ok(DepositDispatchOutcome::Sent { checkout_url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::checkout_provider::fakes::FakeCheckoutProvider;
    use crate::services::payment_intent_store::InMemoryPaymentIntentStore;
    use conversation_cell::{InMemoryTranscriptStore, SendOutcome, SmsSender};
    use queue_cell::InMemoryOutboxStore;

    struct FakeSms;

    #[async_trait::async_trait]
    impl SmsSender for FakeSms {
        async fn send_sms(&self, _to: &str, _from: &str, _body: &str) -> Result<SendOutcome, conversation_cell::ConversationError> {
            Ok(SendOutcome { provider_message_id: Some("sm_1".into()) })
        }
    }

    fn request() -> MessageRequest {
        MessageRequest {
            org_id: "org-1".into(),
            lead_id: "lead-1".into(),
            conversation_id: "sms:org-1:15551234567".into(),
            channel: Channel::Sms,
            from: "+15551234567".into(),
            to: "+15557654321".into(),
            body: "yes please".into(),
            provider_message_id: None,
            metadata: serde_json::Value::Null,
        }
    }

    fn dispatcher() -> DepositDispatcher<FakeCheckoutProvider> {
        DepositDispatcher {
            payment_intent_store: Arc::new(InMemoryPaymentIntentStore::new()),
            checkout_provider: Arc::new(FakeCheckoutProvider::default()),
            preloader: Arc::new(DepositPreloader::new(Arc::new(FakeCheckoutProvider::default()))),
            clinic: Arc::new(clinic_cell::StaticClinicConfig::with_profile(clinic_cell::ClinicProfile::default())),
            messenger: Arc::new(Messenger::new().with_sms(FakeSms)),
            transcript: Arc::new(InMemoryTranscriptStore::new()),
            outbox: Arc::new(InMemoryOutboxStore::new()),
            preload_wait_budget: DEFAULT_PRELOAD_WAIT_BUDGET,
        }
    }

    #[tokio::test]
    async fn issues_a_fresh_checkout_link_when_none_open() {
        let dispatcher = dispatcher();
        let outcome = dispatcher.dispatch(&request(), 5000, "https://ok", "https://cancel", "deposit", None, "+15550001111").await.unwrap();
        assert!(matches!(outcome, DepositDispatchOutcome::Sent { .. }));
    }

    #[tokio::test]
    async fn skips_when_an_open_deposit_already_exists() {
        let dispatcher = dispatcher();
        dispatcher.payment_intent_store.insert_pending(PaymentIntent::new_pending("pi-1", "org-1", "lead-1", "stripe", "bi-1", 5000, None)).await.unwrap();
        let outcome = dispatcher.dispatch(&request(), 5000, "https://ok", "https://cancel", "deposit", None, "+15550001111").await.unwrap();
        assert!(matches!(outcome, DepositDispatchOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn consumes_a_preloaded_checkout_when_present() {
        let dispatcher = dispatcher();
        dispatcher.preloader.start_preload(&request().conversation_id, "org-1", "lead-1", 5000, "https://ok", "https://cancel", "deposit").await;
        // give the background task a moment to complete
        tokio::time::sleep(Duration::from_millis(20)).await;
        let preloaded = dispatcher.preloader.wait_for_preloaded(&request().conversation_id, Duration::from_secs(1)).await.unwrap();

        let outcome = dispatcher.dispatch(&request(), 5000, "https://ok", "https://cancel", "deposit", None, "+15550001111").await.unwrap();
        assert!(matches!(outcome, DepositDispatchOutcome::Sent { .. }));

        let undispatched = dispatcher.outbox.fetch_undispatched(10).await.unwrap();
        let event: DepositRequestedV1 = serde_json::from_value(undispatched[0].payload.clone()).unwrap();
        assert_eq!(event.booking_intent_id, preloaded.pre_payment_id);
    }

    #[test]
    fn formats_cents_as_dollars() {
        assert_eq!(format_cents_as_dollars(5000), "$50.00");
        assert_eq!(format_cents_as_dollars(1099), "$10.99");
        assert_eq!(format_cents_as_dollars(5), "$0.05");
    }
}
