use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use tokio::sync::RwLock;
use tracing::instrument;

use shared_database::PlatformClient;

use crate::error::ConversationError;

/// Step 4 of the reply pipeline (SMS only): if the original provider
/// message id was supposed to exist but the row is missing from the
/// provider message store, the inbound was rolled back and the reply
/// must be suppressed rather than sent against a message that, from the
/// patient's perspective, never arrived.
#[async_trait]
pub trait InboundMessageExistenceCheck: Send + Sync {
    async fn exists(&self, provider_message_id: &str) -> Result<bool, ConversationError>;
}

pub struct PlatformInboundMessageStore {
    client: Arc<PlatformClient>,
}

impl PlatformInboundMessageStore {
    pub fn new(client: Arc<PlatformClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl InboundMessageExistenceCheck for PlatformInboundMessageStore {
    #[instrument(skip(self))]
    async fn exists(&self, provider_message_id: &str) -> Result<bool, ConversationError> {
        let path = format!("/rest/v1/inbound_messages?provider_message_id=eq.{provider_message_id}");
        let rows: Vec<serde_json::Value> = self
            .client
            .request_lenient(Method::GET, &path, None)
            .await
            .map_err(|e| ConversationError::Transport(e.to_string()))?;
        Ok(!rows.is_empty())
    }
}

/// In-process fake. Defaults to "exists" for any id not explicitly
/// removed, matching the common case where nothing was rolled back.
#[derive(Default)]
pub struct InMemoryInboundMessageStore {
    rolled_back: Arc<RwLock<HashSet<String>>>,
}

impl InMemoryInboundMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mark_rolled_back(&self, provider_message_id: &str) {
        self.rolled_back.write().await.insert(provider_message_id.to_string());
    }
}

#[async_trait]
impl InboundMessageExistenceCheck for InMemoryInboundMessageStore {
    async fn exists(&self, provider_message_id: &str) -> Result<bool, ConversationError> {
        Ok(!self.rolled_back.read().await.contains(provider_message_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unmarked_messages_are_treated_as_existing() {
        let store = InMemoryInboundMessageStore::new();
        assert!(store.exists("msg-1").await.unwrap());
    }

    #[tokio::test]
    async fn rolled_back_messages_report_missing() {
        let store = InMemoryInboundMessageStore::new();
        store.mark_rolled_back("msg-1").await;
        assert!(!store.exists("msg-1").await.unwrap());
    }
}
