use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use clinic_cell::ClinicConfigProvider;
use conversation_cell::{Channel, ConversationError, ConversationProcessor, MessageRequest, Response, StartRequest, TranscriptKind};
use scheduling_cell::{extract_time_preferences, AvailabilityOutcome, AvailabilityProvider, TimeSelectionEngine};

const GREETING: &str = "Hi! Thanks for reaching out. What service are you interested in, and do you have a day or time in mind?";
const FALLBACK_REPLY: &str = "Got it, thanks! Our team will follow up shortly to confirm details.";
const DEFAULT_SERVICE: &str = "general";

/// Canned stand-in for the LLM-backed conversation processor: qualification,
/// RAG retrieval, and prompt construction live entirely outside this crate.
/// This implementation still drives the real time-selection engine so a
/// deployment with no processor wired in produces plausible scheduling
/// replies instead of a static string for every turn.
pub struct PassthroughProcessor {
    engine: TimeSelectionEngine,
}

impl PassthroughProcessor {
    pub fn new(availability: Arc<dyn AvailabilityProvider>, clinic: Arc<dyn ClinicConfigProvider>) -> Self {
        Self { engine: TimeSelectionEngine::new(availability, clinic) }
    }
}

#[async_trait]
impl ConversationProcessor for PassthroughProcessor {
    #[instrument(skip(self, _request))]
    async fn start_conversation(&self, _request: StartRequest) -> Result<Response, ConversationError> {
        Ok(Response { reply_text: Some(GREETING.to_string()), reply_kind: Some(TranscriptKind::AiReply), ..Default::default() })
    }

    #[instrument(skip(self, request))]
    async fn process_message(&self, request: MessageRequest) -> Result<Response, ConversationError> {
        if request.channel == Channel::Voice {
            return Ok(Response { reply_text: Some(FALLBACK_REPLY.to_string()), reply_kind: Some(TranscriptKind::VoiceReply), ..Default::default() });
        }

        let prefs = extract_time_preferences(&request.body);
        if prefs.is_empty() {
            return Ok(Response { reply_text: Some(FALLBACK_REPLY.to_string()), reply_kind: Some(TranscriptKind::AiReply), ..Default::default() });
        }

        let outcome = self
            .engine
            .fetch_availability(&request.org_id, DEFAULT_SERVICE, &prefs, None)
            .await
            .map_err(|e| ConversationError::Processor(e.to_string()))?;

        let candidates = match outcome {
            AvailabilityOutcome::NeedsRelaxationChoice => {
                let time_selection = self.engine.build_disambiguation_response();
                return Ok(Response {
                    reply_text: time_selection.disambiguation_question.clone(),
                    reply_kind: Some(TranscriptKind::TimeSelection),
                    time_selection: Some(time_selection),
                    ..Default::default()
                });
            }
            AvailabilityOutcome::Candidates(slots) => slots,
        };

        let presented = self.engine.assemble_and_present(&request.org_id, candidates, &prefs).await;
        if presented.is_empty() {
            return Ok(Response {
                reply_text: Some("I couldn't find anything open in that window — want me to widen the search?".to_string()),
                reply_kind: Some(TranscriptKind::BookingFallback),
                ..Default::default()
            });
        }

        let sms_body = self.engine.render_sms(DEFAULT_SERVICE, &presented);
        let time_selection = self.engine.build_response(presented, DEFAULT_SERVICE);

        Ok(Response { reply_text: Some(sms_body), reply_kind: Some(TranscriptKind::TimeSelection), time_selection: Some(time_selection), ..Default::default() })
    }
}
