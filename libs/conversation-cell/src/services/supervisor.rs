use async_trait::async_trait;
use tracing::warn;

use crate::error::ConversationError;
use crate::models::Channel;

/// What the supervisor decided to do with a draft reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorAction {
    Allow,
    Block,
    Edited,
}

#[derive(Debug, Clone)]
pub struct SupervisorVerdict {
    pub action: SupervisorAction,
    /// Present when `action` is `Edited`; the replacement text to send
    /// instead of the original draft.
    pub edited_text: Option<String>,
    pub reason: Option<String>,
}

impl SupervisorVerdict {
    pub fn allow() -> Self {
        Self { action: SupervisorAction::Allow, edited_text: None, reason: None }
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorRequest {
    pub conversation_id: String,
    pub channel: Channel,
    pub draft_text: String,
}

/// Reviews a draft reply before it reaches a patient. Deployments can
/// wire in a human-review queue, a second LLM pass, or a no-op reviewer;
/// the reply pipeline only depends on this trait.
///
/// Per the runtime's `warn`/`block`/`edit` mode: a `Supervisor`
/// implementation itself always attempts review and can return any
/// verdict. Whether a `Block` verdict is actually honored, or merely
/// logged, is decided by the caller (the reply pipeline) using the
/// configured `SupervisorMode` — not by this trait. A supervisor error
/// always defaults to `Allow`, regardless of mode: a broken review path
/// must never itself block patient communication.
#[async_trait]
pub trait Supervisor: Send + Sync {
    async fn review(&self, request: SupervisorRequest) -> Result<SupervisorVerdict, ConversationError>;
}

/// Always allows. The safe default when no review backend is configured
/// — matches the "supervisor errors default to allow" invariant by
/// construction rather than by catching an error.
pub struct NoopSupervisor;

#[async_trait]
impl Supervisor for NoopSupervisor {
    async fn review(&self, _request: SupervisorRequest) -> Result<SupervisorVerdict, ConversationError> {
        Ok(SupervisorVerdict::allow())
    }
}

/// Wraps a fallible `Supervisor` and normalizes any error it returns into
/// an `Allow` verdict, logging the failure. Use this to adapt a real
/// review backend without scattering the "errors mean allow" rule across
/// every call site.
pub struct FailOpenSupervisor<S> {
    inner: S,
}

impl<S: Supervisor> FailOpenSupervisor<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S: Supervisor> Supervisor for FailOpenSupervisor<S> {
    async fn review(&self, request: SupervisorRequest) -> Result<SupervisorVerdict, ConversationError> {
        let conversation_id = request.conversation_id.clone();
        match self.inner.review(request).await {
            Ok(verdict) => Ok(verdict),
            Err(err) => {
                warn!(conversation_id, error = %err, "supervisor review failed, defaulting to allow");
                Ok(SupervisorVerdict::allow())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysErrors;

    #[async_trait]
    impl Supervisor for AlwaysErrors {
        async fn review(&self, _request: SupervisorRequest) -> Result<SupervisorVerdict, ConversationError> {
            Err(ConversationError::Supervisor("unreachable".into()))
        }
    }

    #[tokio::test]
    async fn noop_supervisor_always_allows() {
        let supervisor = NoopSupervisor;
        let verdict = supervisor
            .review(SupervisorRequest { conversation_id: "sms:org-1:1".into(), channel: Channel::Sms, draft_text: "hi".into() })
            .await
            .unwrap();
        assert_eq!(verdict.action, SupervisorAction::Allow);
    }

    #[tokio::test]
    async fn fail_open_supervisor_defaults_to_allow_on_error() {
        let supervisor = FailOpenSupervisor::new(AlwaysErrors);
        let verdict = supervisor
            .review(SupervisorRequest { conversation_id: "sms:org-1:1".into(), channel: Channel::Sms, draft_text: "hi".into() })
            .await
            .unwrap();
        assert_eq!(verdict.action, SupervisorAction::Allow);
    }
}
