use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::instrument;

use crate::error::ConversationError;
use crate::models::TranscriptEntry;

/// Append-only transcript, one list per conversation. Appends must
/// survive cancellation of the request that triggered them (a reply send
/// timing out must not lose the audit record) — callers append under a
/// background context/task, not the caller's own cancellable one.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    async fn append(&self, entry: TranscriptEntry) -> Result<(), ConversationError>;
    async fn list(&self, conversation_id: &str) -> Result<Vec<TranscriptEntry>, ConversationError>;
}

const TRANSCRIPT_KEY_PREFIX: &str = "conversation_transcript:";

pub struct RedisTranscriptStore {
    pool: Pool,
}

impl RedisTranscriptStore {
    pub async fn new(redis_url: &str) -> Result<Self, ConversationError> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1)).map_err(|e| ConversationError::Transport(e.to_string()))?;
        Ok(Self { pool })
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, ConversationError> {
        self.pool.get().await.map_err(|e| ConversationError::Transport(e.to_string()))
    }

    fn key(conversation_id: &str) -> String {
        format!("{TRANSCRIPT_KEY_PREFIX}{conversation_id}")
    }
}

#[async_trait]
impl TranscriptStore for RedisTranscriptStore {
    #[instrument(skip(self, entry))]
    async fn append(&self, entry: TranscriptEntry) -> Result<(), ConversationError> {
        if entry.conversation_id.is_empty() {
            return Err(ConversationError::Validation("conversation_id must not be empty".into()));
        }
        let mut conn = self.connection().await?;
        let json = serde_json::to_string(&entry)?;
        let _: i64 = conn.rpush(Self::key(&entry.conversation_id), json).await?;
        Ok(())
    }

    async fn list(&self, conversation_id: &str) -> Result<Vec<TranscriptEntry>, ConversationError> {
        let mut conn = self.connection().await?;
        let raw: Vec<String> = conn.lrange(Self::key(conversation_id), 0, -1).await?;
        raw.iter().map(|s| serde_json::from_str(s).map_err(ConversationError::from)).collect()
    }
}

/// In-process fake used by tests and by any deployment without a live
/// transcript backend wired in yet.
#[derive(Default)]
pub struct InMemoryTranscriptStore {
    entries: Arc<RwLock<HashMap<String, Vec<TranscriptEntry>>>>,
}

impl InMemoryTranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TranscriptStore for InMemoryTranscriptStore {
    async fn append(&self, entry: TranscriptEntry) -> Result<(), ConversationError> {
        if entry.conversation_id.is_empty() {
            return Err(ConversationError::Validation("conversation_id must not be empty".into()));
        }
        self.entries.write().await.entry(entry.conversation_id.clone()).or_default().push(entry);
        Ok(())
    }

    async fn list(&self, conversation_id: &str) -> Result<Vec<TranscriptEntry>, ConversationError> {
        Ok(self.entries.read().await.get(conversation_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeliveryStatus, TranscriptKind, TranscriptRole};

    #[tokio::test]
    async fn append_then_list_preserves_order() {
        let store = InMemoryTranscriptStore::new();
        store
            .append(TranscriptEntry::new("sms:org-1:1", TranscriptRole::User, "hi", TranscriptKind::AiReply, DeliveryStatus::Sent))
            .await
            .unwrap();
        store
            .append(TranscriptEntry::new("sms:org-1:1", TranscriptRole::Assistant, "hello", TranscriptKind::AiReply, DeliveryStatus::Sent))
            .await
            .unwrap();

        let entries = store.list("sms:org-1:1").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].role, TranscriptRole::User);
    }

    #[tokio::test]
    async fn rejects_empty_conversation_id() {
        let store = InMemoryTranscriptStore::new();
        let entry = TranscriptEntry::new("", TranscriptRole::User, "hi", TranscriptKind::AiReply, DeliveryStatus::Sent);
        assert!(store.append(entry).await.is_err());
    }
}
