use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use shared_config::SupervisorMode;

use crate::error::ConversationError;
use crate::models::{Channel, DeliveryStatus, MessageRequest, TranscriptEntry, TranscriptKind, TranscriptRole};
use crate::services::inbound_store::InboundMessageExistenceCheck;
use crate::services::leak_guard::OutputLeakGuard;
use crate::services::messenger::Messenger;
use crate::services::opt_out::OptOutRegistry;
use crate::services::supervisor::{Supervisor, SupervisorAction, SupervisorRequest};
use crate::services::transcript_store::TranscriptStore;

const MESSENGER_SEND_TIMEOUT: Duration = Duration::from_secs(5);
const CANNED_FALLBACK: &str = "Thanks for your message! Our team will follow up shortly.";

/// Outcome of running the reply pipeline for one turn. `blocked` tells
/// the caller (the worker, ahead of the deposit dispatcher) whether the
/// supervisor blocked this turn's reply — blocked turns must skip the
/// deposit side-effect even though a reply (the fallback) may still have
/// been sent.
pub struct PipelineOutcome {
    pub blocked: bool,
    pub sent_text: Option<String>,
}

impl PipelineOutcome {
    fn not_sent() -> Self {
        Self { blocked: false, sent_text: None }
    }
}

/// Runs the eight ordered steps of §4.6 against one processor reply. All
/// collaborators are injected so the pipeline itself stays free of
/// transport/provider specifics.
pub struct ReplyPipeline {
    pub opt_out: Arc<dyn OptOutRegistry>,
    pub inbound_existence: Arc<dyn InboundMessageExistenceCheck>,
    pub supervisor: Arc<dyn Supervisor>,
    pub supervisor_mode: SupervisorMode,
    pub leak_guard: Arc<OutputLeakGuard>,
    pub messenger: Arc<Messenger>,
    pub transcript: Arc<dyn TranscriptStore>,
}

impl ReplyPipeline {
    /// `reply_text` is the processor's draft; empty means step 1 applies.
    pub async fn deliver(&self, request: &MessageRequest, reply_text: Option<&str>, reply_kind: TranscriptKind) -> Result<PipelineOutcome, ConversationError> {
        // Step 1: empty-message short-circuit.
        let Some(draft) = reply_text.filter(|t| !t.is_empty()) else {
            return Ok(PipelineOutcome::not_sent());
        };

        // Step 2: channel dispatch. Voice is recorded only, never sent as SMS.
        if request.channel == Channel::Voice {
            self.append_transcript(&request.conversation_id, draft, reply_kind, DeliveryStatus::Sent, None, None).await;
            return Ok(PipelineOutcome { blocked: false, sent_text: Some(draft.to_string()) });
        }
        if request.channel == Channel::Sms && (request.from.is_empty() || request.to.is_empty()) {
            return Err(ConversationError::Validation("sms reply requires non-empty from/to".into()));
        }

        // Step 3: opt-out check.
        if self.opt_out.is_opted_out(&request.org_id, &request.from).await? {
            info!(conversation_id = %request.conversation_id, "recipient opted out, suppressing reply");
            return Ok(PipelineOutcome::not_sent());
        }

        // Step 4: inbound existence check, SMS only.
        if request.channel == Channel::Sms {
            if let Some(provider_message_id) = &request.provider_message_id {
                if !self.inbound_existence.exists(provider_message_id).await? {
                    info!(conversation_id = %request.conversation_id, "inbound message rolled back, suppressing reply");
                    return Ok(PipelineOutcome::not_sent());
                }
            }
        }

        // Step 5: supervisor review.
        let verdict = self
            .supervisor
            .review(SupervisorRequest { conversation_id: request.conversation_id.clone(), channel: request.channel, draft_text: draft.to_string() })
            .await?;

        let mut blocked = false;
        let final_text = match self.supervisor_mode {
            SupervisorMode::Warn => {
                if verdict.action != SupervisorAction::Allow {
                    warn!(conversation_id = %request.conversation_id, action = ?verdict.action, "supervisor flagged reply in warn mode, not mutating");
                }
                draft.to_string()
            }
            SupervisorMode::Block => match verdict.action {
                SupervisorAction::Block => {
                    blocked = true;
                    CANNED_FALLBACK.to_string()
                }
                SupervisorAction::Edited => verdict.edited_text.clone().unwrap_or_else(|| draft.to_string()),
                SupervisorAction::Allow => draft.to_string(),
            },
            SupervisorMode::Edit => match verdict.action {
                SupervisorAction::Edited => verdict.edited_text.clone().unwrap_or_else(|| draft.to_string()),
                SupervisorAction::Block => {
                    // A block verdict is a deterministic override regardless of
                    // mode: the fallback goes out and the deposit side-effect
                    // is suppressed (see error handling taxonomy).
                    blocked = true;
                    CANNED_FALLBACK.to_string()
                }
                SupervisorAction::Allow => draft.to_string(),
            },
        };

        // Step 6: output leak guard.
        let sanitized = self.leak_guard.scan_and_sanitize(&final_text, &request.conversation_id).unwrap_or_else(|| CANNED_FALLBACK.to_string());

        // Step 7: messenger dispatch, bounded 5s.
        let send_result = tokio::time::timeout(
            MESSENGER_SEND_TIMEOUT,
            self.messenger.send(request.channel, &request.conversation_id, &request.from, &request.to, &sanitized),
        )
        .await;

        let (status, provider_message_id, error_reason) = match send_result {
            Ok(Ok(outcome)) => (DeliveryStatus::Sent, outcome.provider_message_id, None),
            Ok(Err(err)) => {
                error!(conversation_id = %request.conversation_id, error = %err, "messenger dispatch failed");
                (DeliveryStatus::Failed, None, Some(err.to_string()))
            }
            Err(_) => {
                error!(conversation_id = %request.conversation_id, "messenger dispatch timed out");
                (DeliveryStatus::Failed, None, Some("messenger dispatch timed out".to_string()))
            }
        };

        // Step 8: transcript append, background context.
        self.append_transcript(&request.conversation_id, &sanitized, reply_kind, status, error_reason, provider_message_id).await;

        Ok(PipelineOutcome { blocked, sent_text: Some(sanitized) })
    }

    async fn append_transcript(
        &self,
        conversation_id: &str,
        body: &str,
        kind: TranscriptKind,
        status: DeliveryStatus,
        error_reason: Option<String>,
        provider_message_id: Option<String>,
    ) {
        let mut entry = TranscriptEntry::new(conversation_id, TranscriptRole::Assistant, body, kind, status);
        entry.error_reason = error_reason;
        entry.provider_message_id = provider_message_id;
        let transcript = self.transcript.clone();
        let entry_for_task = entry;
        // Background context: the append must survive cancellation of whatever
        // caller triggered this delivery, so it is spawned rather than awaited inline.
        tokio::spawn(async move {
            if let Err(err) = transcript.append(entry_for_task).await {
                error!(error = %err, "failed to append transcript entry");
            }
        });
    }
}
