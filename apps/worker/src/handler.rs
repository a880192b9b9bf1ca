use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, instrument, warn};

use clinic_cell::ClinicConfigProvider;
use conversation_cell::{ConversationProcessor, ConversationStatus, ConversationStore, MessageRequest, ReplyPipeline, StartRequest};
use payments_cell::{DepositDispatchOutcome, DepositDispatcher, DepositPreloader, PaymentEventHandler, PaymentFailedV1, PaymentSucceededV1};
use queue_cell::{JobHandler, JobOutcome, QueueError};

/// Dispatches queue jobs to the conversation/payments collaborators by
/// `JobKind`. Holds a concrete checkout-provider type parameter only
/// because `DepositDispatcher<S>`'s preloader field needs one; every other
/// collaborator stays behind a trait object.
pub struct CoreJobHandler<C> {
    pub processor: Arc<dyn ConversationProcessor>,
    pub conversations: Arc<dyn ConversationStore>,
    pub reply_pipeline: Arc<ReplyPipeline>,
    pub deposit_dispatcher: Arc<DepositDispatcher<C>>,
    pub payment_handler: Arc<PaymentEventHandler>,
    pub clinic: Arc<dyn ClinicConfigProvider>,
    pub default_from: String,
}

fn to_queue_error(err: impl std::fmt::Display) -> QueueError {
    QueueError::Processing(err.to_string())
}

impl<C: payments_cell::CheckoutProvider + 'static> CoreJobHandler<C> {
    async fn run_start(&self, request: StartRequest) -> Result<JobOutcome, QueueError> {
        self.conversations.get_or_create(&request.conversation_id, &request.org_id, &request.lead_id).await.map_err(to_queue_error)?;

        let response = self.processor.start_conversation(request.clone()).await.map_err(to_queue_error)?;

        let message_request = MessageRequest {
            org_id: request.org_id,
            lead_id: request.lead_id,
            conversation_id: request.conversation_id.clone(),
            channel: request.channel,
            from: request.from,
            to: request.to,
            body: String::new(),
            provider_message_id: None,
            metadata: request.metadata,
        };

        let outcome = self.reply_pipeline.deliver(&message_request, response.reply_text.as_deref(), response.reply_kind_or_default()).await.map_err(to_queue_error)?;

        Ok(JobOutcome::new(serde_json::json!({"sent": outcome.sent_text}), Some(request.conversation_id)))
    }

    /// Kicks off a speculative checkout-link build before the (potentially
    /// slow) processor call, so its latency is hidden rather than added on
    /// top of the deposit dispatch that usually follows an affirmative
    /// reply. Best-effort: clinic config lookup failures just skip preload,
    /// the dispatcher falls back to creating the link synchronously.
    async fn maybe_preload_deposit(&self, request: &MessageRequest) {
        if !DepositPreloader::<C>::should_preload_deposit(&request.body) {
            return;
        }

        let amount_cents = match self.clinic.deposit_amount_cents(&request.org_id).await {
            Ok(v) => v,
            Err(e) => {
                warn!(org_id = %request.org_id, error = %e, "skipping deposit preload, could not resolve deposit amount");
                return;
            }
        };
        let booking_url = match self.clinic.booking_url(&request.org_id).await {
            Ok(v) => v,
            Err(e) => {
                warn!(org_id = %request.org_id, error = %e, "skipping deposit preload, could not resolve booking url");
                return;
            }
        };

        let success_url = format!("{booking_url}?status=success");
        let cancel_url = format!("{booking_url}?status=cancel");
        self.deposit_dispatcher
            .preloader
            .start_preload(&request.conversation_id, &request.org_id, &request.lead_id, amount_cents, &success_url, &cancel_url, "Booking deposit")
            .await;
    }

    async fn run_message(&self, request: MessageRequest) -> Result<JobOutcome, QueueError> {
        self.conversations.get_or_create(&request.conversation_id, &request.org_id, &request.lead_id).await.map_err(to_queue_error)?;

        self.maybe_preload_deposit(&request).await;

        let response = self.processor.process_message(request.clone()).await.map_err(to_queue_error)?;

        let outcome = self.reply_pipeline.deliver(&request, response.reply_text.as_deref(), response.reply_kind_or_default()).await.map_err(to_queue_error)?;

        if response.time_selection.as_ref().is_some_and(|t| !t.slots.is_empty() && t.selected_slot.is_none()) {
            if let Err(e) = self.conversations.set_status(&request.conversation_id, ConversationStatus::AwaitingTimeSelection).await {
                warn!(conversation_id = %request.conversation_id, error = %e, "failed to mark conversation awaiting_time_selection");
            }
        }

        // Blocked turns must never trigger the deposit side-effect, even if
        // the processor asked for one alongside the (suppressed) reply.
        if !outcome.blocked {
            if let Some(intent) = response.deposit_intent {
                match self
                    .deposit_dispatcher
                    .dispatch(&request, intent.amount_cents, &intent.success_url, &intent.cancel_url, &intent.description, intent.scheduled_for, &self.default_from)
                    .await
                {
                    Ok(DepositDispatchOutcome::Sent { checkout_url }) => {
                        info!(conversation_id = %request.conversation_id, checkout_url, "deposit checkout link sent");
                    }
                    Ok(DepositDispatchOutcome::Skipped { reason }) => {
                        info!(conversation_id = %request.conversation_id, reason, "deposit dispatch skipped");
                    }
                    Err(e) => {
                        error!(conversation_id = %request.conversation_id, error = %e, "deposit dispatch failed");
                        return Err(to_queue_error(e));
                    }
                }
            }
        }

        Ok(JobOutcome::new(serde_json::json!({"sent": outcome.sent_text, "blocked": outcome.blocked}), Some(request.conversation_id)))
    }
}

#[async_trait]
impl<C: payments_cell::CheckoutProvider + 'static> JobHandler for CoreJobHandler<C> {
    #[instrument(skip(self, request))]
    async fn handle_start(&self, request: serde_json::Value) -> Result<JobOutcome, QueueError> {
        let request: StartRequest = serde_json::from_value(request)?;
        self.run_start(request).await
    }

    #[instrument(skip(self, request))]
    async fn handle_message(&self, request: serde_json::Value) -> Result<JobOutcome, QueueError> {
        let request: MessageRequest = serde_json::from_value(request)?;
        self.run_message(request).await
    }

    #[instrument(skip(self, event))]
    async fn handle_payment(&self, event: serde_json::Value) -> Result<JobOutcome, QueueError> {
        let event: PaymentSucceededV1 = serde_json::from_value(event)?;
        self.payment_handler.handle_succeeded(event).await.map_err(to_queue_error)?;
        Ok(JobOutcome::empty())
    }

    #[instrument(skip(self, event))]
    async fn handle_payment_failed(&self, event: serde_json::Value) -> Result<JobOutcome, QueueError> {
        let event: PaymentFailedV1 = serde_json::from_value(event)?;
        self.payment_handler.handle_failed(event).await.map_err(to_queue_error)?;
        Ok(JobOutcome::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    use clinic_cell::{BookingPlatform, StaticClinicConfig};
    use conversation_cell::{
        Channel, FailOpenSupervisor, InMemoryConversationStore, InMemoryInboundMessageStore, InMemoryOptOutRegistry, InMemoryTranscriptStore, LoggingSmsSender, Messenger, NoopSupervisor,
        OutputLeakGuard, ReplyPipeline, Response,
    };
    use payments_cell::{InMemoryPaymentIntentStore, InMemoryProcessedKeyStore, LoggingBookingConfirmation, PlaceholderCheckoutProvider};
    use scheduling_cell::PlaceholderAvailabilityProvider;
    use shared_config::SupervisorMode;

    use crate::processor::PassthroughProcessor;

    /// Fake processor whose `process_message` response is fixed at
    /// construction time, so `run_message`'s status-transition logic can be
    /// exercised without a real availability provider.
    struct FixedResponseProcessor(Response);

    #[async_trait]
    impl ConversationProcessor for FixedResponseProcessor {
        async fn start_conversation(&self, _request: StartRequest) -> Result<Response, conversation_cell::ConversationError> {
            Ok(self.0.clone())
        }

        async fn process_message(&self, _request: MessageRequest) -> Result<Response, conversation_cell::ConversationError> {
            Ok(self.0.clone())
        }
    }

    fn presented_slot(index: u32) -> scheduling_cell::PresentedSlot {
        scheduling_cell::PresentedSlot { index, datetime: chrono::Utc::now(), display_string: "Monday at 10:00 AM".into(), service: "botox".into(), available: true }
    }

    fn handler_with_processor(processor: Arc<dyn ConversationProcessor>) -> CoreJobHandler<PlaceholderCheckoutProvider> {
        let mut handler = handler();
        handler.processor = processor;
        handler
    }

    fn handler() -> CoreJobHandler<PlaceholderCheckoutProvider> {
        let clinic: Arc<dyn ClinicConfigProvider> = Arc::new(StaticClinicConfig::with_profile(clinic_cell::ClinicProfile {
            platform: BookingPlatform::Generic,
            ..clinic_cell::ClinicProfile::default()
        }));
        let checkout_provider = Arc::new(PlaceholderCheckoutProvider);
        let messenger = Arc::new(Messenger::new().with_sms(LoggingSmsSender));
        let transcript = Arc::new(InMemoryTranscriptStore::new());
        let opt_out = Arc::new(InMemoryOptOutRegistry::new());

        let reply_pipeline = Arc::new(ReplyPipeline {
            opt_out: opt_out.clone(),
            inbound_existence: Arc::new(InMemoryInboundMessageStore::new()),
            supervisor: Arc::new(FailOpenSupervisor::new(NoopSupervisor)),
            supervisor_mode: SupervisorMode::Warn,
            leak_guard: Arc::new(OutputLeakGuard::new()),
            messenger: messenger.clone(),
            transcript: transcript.clone(),
        });

        let deposit_dispatcher = Arc::new(DepositDispatcher {
            payment_intent_store: Arc::new(InMemoryPaymentIntentStore::new()),
            checkout_provider: checkout_provider.clone(),
            preloader: Arc::new(DepositPreloader::new(checkout_provider.clone())),
            clinic: clinic.clone(),
            messenger: messenger.clone(),
            transcript: transcript.clone(),
            outbox: Arc::new(queue_cell::InMemoryOutboxStore::new()),
            preload_wait_budget: StdDuration::from_secs(2),
        });

        let payment_handler = Arc::new(PaymentEventHandler {
            processed_keys: Arc::new(InMemoryProcessedKeyStore::new()),
            payment_intents: Arc::new(InMemoryPaymentIntentStore::new()),
            booking: Arc::new(LoggingBookingConfirmation),
            moxie_client: None,
            clinic: clinic.clone(),
            conversations: Arc::new(InMemoryConversationStore::new()),
            opt_out,
            messenger,
            transcript,
            default_from: "+15550001111".to_string(),
        });

        CoreJobHandler {
            processor: Arc::new(PassthroughProcessor::new(Arc::new(PlaceholderAvailabilityProvider), clinic.clone())),
            conversations: Arc::new(InMemoryConversationStore::new()),
            reply_pipeline,
            deposit_dispatcher,
            payment_handler,
            clinic,
            default_from: "+15550001111".to_string(),
        }
    }

    fn message(body: &str) -> MessageRequest {
        MessageRequest {
            org_id: "org-1".into(),
            lead_id: "lead-1".into(),
            conversation_id: "sms:org-1:15551234567".into(),
            channel: Channel::Sms,
            from: "+15551234567".into(),
            to: "+15557654321".into(),
            body: body.to_string(),
            provider_message_id: None,
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn affirmative_deposit_reply_starts_a_preload() {
        let handler = handler();
        handler.maybe_preload_deposit(&message("yes I'll pay the deposit")).await;
        let preloaded = handler.deposit_dispatcher.preloader.wait_for_preloaded("sms:org-1:15551234567", StdDuration::from_millis(500)).await;
        assert!(preloaded.is_some());
        assert!(preloaded.unwrap().url.is_some());
    }

    #[tokio::test]
    async fn ordinary_reply_does_not_start_a_preload() {
        let handler = handler();
        handler.maybe_preload_deposit(&message("what days are you open?")).await;
        let preloaded = handler.deposit_dispatcher.preloader.wait_for_preloaded("sms:org-1:15551234567", StdDuration::from_millis(100)).await;
        assert!(preloaded.is_none());
    }

    #[tokio::test]
    async fn presented_unresolved_slots_mark_conversation_awaiting_selection() {
        let response = Response {
            reply_text: Some("pick a time".into()),
            time_selection: Some(scheduling_cell::TimeSelectionResponse {
                slots: vec![presented_slot(1), presented_slot(2)],
                sms_body: Some("pick a time".into()),
                disambiguation_question: None,
                selected_slot: None,
            }),
            ..Default::default()
        };
        let handler = handler_with_processor(Arc::new(FixedResponseProcessor(response)));
        handler.run_message(message("tuesday afternoon")).await.unwrap();

        let conversation = handler.conversations.get_or_create("sms:org-1:15551234567", "org-1", "lead-1").await.unwrap();
        assert_eq!(conversation.status, ConversationStatus::AwaitingTimeSelection);
    }

    #[tokio::test]
    async fn an_already_resolved_selection_does_not_mark_awaiting_selection() {
        let response = Response {
            reply_text: Some("you're booked for Monday".into()),
            time_selection: Some(scheduling_cell::TimeSelectionResponse {
                slots: vec![presented_slot(1)],
                sms_body: None,
                disambiguation_question: None,
                selected_slot: Some(presented_slot(1)),
            }),
            ..Default::default()
        };
        let handler = handler_with_processor(Arc::new(FixedResponseProcessor(response)));
        handler.run_message(message("1")).await.unwrap();

        let conversation = handler.conversations.get_or_create("sms:org-1:15551234567", "org-1", "lead-1").await.unwrap();
        assert_eq!(conversation.status, ConversationStatus::Active);
    }
}
