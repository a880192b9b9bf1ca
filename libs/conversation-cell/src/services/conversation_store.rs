use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::instrument;

use crate::error::ConversationError;
use crate::models::{Conversation, ConversationStatus};

/// Status mutation for a conversation, keyed by its `"{channel}:{org}:{digits}"`
/// id. Callers must respect `ConversationStatus::can_transition_to` before
/// calling `set_status`; the store itself does not re-derive the rule so
/// that a forced correction (an operator override) remains possible.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get_or_create(&self, id: &str, org_id: &str, lead_id: &str) -> Result<Conversation, ConversationError>;
    async fn set_status(&self, id: &str, status: ConversationStatus) -> Result<(), ConversationError>;
    /// Looks a conversation up by the patient's phone number rather than
    /// its full id — the payment event handler only has a phone number
    /// from the provider webhook, not the channel-qualified conversation id.
    async fn find_by_phone(&self, org_id: &str, phone: &str) -> Result<Option<Conversation>, ConversationError>;
}

const CONVERSATION_KEY_PREFIX: &str = "conversation:";

pub struct RedisConversationStore {
    pool: Pool,
}

impl RedisConversationStore {
    pub async fn new(redis_url: &str) -> Result<Self, ConversationError> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1)).map_err(|e| ConversationError::Transport(e.to_string()))?;
        Ok(Self { pool })
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, ConversationError> {
        self.pool.get().await.map_err(|e| ConversationError::Transport(e.to_string()))
    }

    fn key(id: &str) -> String {
        format!("{CONVERSATION_KEY_PREFIX}{id}")
    }
}

#[async_trait]
impl ConversationStore for RedisConversationStore {
    #[instrument(skip(self))]
    async fn get_or_create(&self, id: &str, org_id: &str, lead_id: &str) -> Result<Conversation, ConversationError> {
        let mut conn = self.connection().await?;
        let existing: Option<String> = conn.get(Self::key(id)).await?;
        if let Some(raw) = existing {
            return Ok(serde_json::from_str(&raw)?);
        }
        let conversation = Conversation::new(id, org_id, lead_id);
        let json = serde_json::to_string(&conversation)?;
        let _: () = conn.set(Self::key(id), json).await?;
        Ok(conversation)
    }

    #[instrument(skip(self))]
    async fn set_status(&self, id: &str, status: ConversationStatus) -> Result<(), ConversationError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.get(Self::key(id)).await?;
        let Some(raw) = raw else {
            return Err(ConversationError::Validation(format!("conversation not found: {id}")));
        };
        let mut conversation: Conversation = serde_json::from_str(&raw)?;
        conversation.status = status;
        conversation.updated_at = chrono::Utc::now();
        let json = serde_json::to_string(&conversation)?;
        let _: () = conn.set(Self::key(id), json).await?;
        Ok(())
    }

    async fn find_by_phone(&self, org_id: &str, phone: &str) -> Result<Option<Conversation>, ConversationError> {
        let id = format!("sms:{org_id}:{phone}");
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.get(Self::key(&id)).await?;
        raw.map(|r| serde_json::from_str(&r).map_err(ConversationError::from)).transpose()
    }
}

#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: Arc<RwLock<HashMap<String, Conversation>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get_or_create(&self, id: &str, org_id: &str, lead_id: &str) -> Result<Conversation, ConversationError> {
        let mut map = self.conversations.write().await;
        if let Some(existing) = map.get(id) {
            return Ok(existing.clone());
        }
        let conversation = Conversation::new(id, org_id, lead_id);
        map.insert(id.to_string(), conversation.clone());
        Ok(conversation)
    }

    async fn set_status(&self, id: &str, status: ConversationStatus) -> Result<(), ConversationError> {
        let mut map = self.conversations.write().await;
        let conversation = map.get_mut(id).ok_or_else(|| ConversationError::Validation(format!("conversation not found: {id}")))?;
        conversation.status = status;
        conversation.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn find_by_phone(&self, org_id: &str, phone: &str) -> Result<Option<Conversation>, ConversationError> {
        let id = format!("sms:{org_id}:{phone}");
        Ok(self.conversations.read().await.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let store = InMemoryConversationStore::new();
        let first = store.get_or_create("sms:org-1:1", "org-1", "lead-1").await.unwrap();
        let second = store.get_or_create("sms:org-1:1", "org-1", "lead-1").await.unwrap();
        assert_eq!(first.created_at, second.created_at);
    }

    #[tokio::test]
    async fn set_status_on_missing_conversation_fails() {
        let store = InMemoryConversationStore::new();
        let result = store.set_status("sms:org-1:missing", ConversationStatus::Ended).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn find_by_phone_locates_existing_conversation() {
        let store = InMemoryConversationStore::new();
        store.get_or_create("sms:org-1:15551234567", "org-1", "lead-1").await.unwrap();
        let found = store.find_by_phone("org-1", "15551234567").await.unwrap();
        assert!(found.is_some());
    }
}
