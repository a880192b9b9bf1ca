use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::instrument;

use crate::error::VoiceError;
use crate::models::{CallStatus, VoiceCallState, VoiceTranscriptEntry};

const CALL_TTL_SECONDS: i64 = 24 * 3600;

/// TTL-bounded per-call state and transcript. `get_call_state` returning
/// `None` is not an error — a caller probing for an unknown call simply
/// treats it as "no such call yet", the same way `Queue::receive`
/// returning an empty batch isn't an error.
#[async_trait]
pub trait VoiceCallStore: Send + Sync {
    async fn save_call_state(&self, state: VoiceCallState) -> Result<(), VoiceError>;
    async fn get_call_state(&self, call_id: &str) -> Result<Option<VoiceCallState>, VoiceError>;
    async fn increment_turn(&self, call_id: &str) -> Result<VoiceCallState, VoiceError>;
    async fn end_call(&self, call_id: &str, outcome: Option<String>) -> Result<VoiceCallState, VoiceError>;
    async fn append_transcript(&self, call_id: &str, entry: VoiceTranscriptEntry) -> Result<(), VoiceError>;
    async fn get_transcript(&self, call_id: &str) -> Result<Vec<VoiceTranscriptEntry>, VoiceError>;
}

const CALL_KEY_PREFIX: &str = "voice_call:";
const TRANSCRIPT_KEY_PREFIX: &str = "voice_transcript:";

pub struct RedisVoiceCallStore {
    pool: Pool,
}

impl RedisVoiceCallStore {
    pub async fn new(redis_url: &str) -> Result<Self, VoiceError> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1)).map_err(|e| VoiceError::Transport(e.to_string()))?;
        Ok(Self { pool })
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, VoiceError> {
        self.pool.get().await.map_err(|e| VoiceError::Transport(e.to_string()))
    }

    fn call_key(call_id: &str) -> String {
        format!("{CALL_KEY_PREFIX}{call_id}")
    }

    fn transcript_key(call_id: &str) -> String {
        format!("{TRANSCRIPT_KEY_PREFIX}{call_id}")
    }

    async fn load(&self, call_id: &str) -> Result<Option<VoiceCallState>, VoiceError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.get(Self::call_key(call_id)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn store(&self, state: &VoiceCallState) -> Result<(), VoiceError> {
        let mut conn = self.connection().await?;
        let json = serde_json::to_string(state)?;
        let key = Self::call_key(&state.call_id);
        let _: () = conn.set_ex(&key, json, CALL_TTL_SECONDS as u64).await?;
        // refresh the transcript's TTL too, so it doesn't outlive the call it describes.
        let tkey = Self::transcript_key(&state.call_id);
        let _: bool = conn.expire(&tkey, CALL_TTL_SECONDS).await.unwrap_or(false);
        Ok(())
    }
}

#[async_trait]
impl VoiceCallStore for RedisVoiceCallStore {
    #[instrument(skip(self, state))]
    async fn save_call_state(&self, state: VoiceCallState) -> Result<(), VoiceError> {
        if state.call_id.is_empty() {
            return Err(VoiceError::Validation("call_id must not be empty".into()));
        }
        self.store(&state).await
    }

    async fn get_call_state(&self, call_id: &str) -> Result<Option<VoiceCallState>, VoiceError> {
        if call_id.is_empty() {
            return Err(VoiceError::Validation("call_id must not be empty".into()));
        }
        self.load(call_id).await
    }

    #[instrument(skip(self))]
    async fn increment_turn(&self, call_id: &str) -> Result<VoiceCallState, VoiceError> {
        let mut state = self.load(call_id).await?.ok_or_else(|| VoiceError::CallNotFound(call_id.to_string()))?;
        state.turn_count += 1;
        state.last_activity_at = Utc::now();
        self.store(&state).await?;
        Ok(state)
    }

    #[instrument(skip(self))]
    async fn end_call(&self, call_id: &str, outcome: Option<String>) -> Result<VoiceCallState, VoiceError> {
        let mut state = self.load(call_id).await?.ok_or_else(|| VoiceError::CallNotFound(call_id.to_string()))?;
        state.status = if state.sms_handoff_sent { CallStatus::SmsHandoff } else { CallStatus::Ended };
        state.outcome = outcome;
        state.last_activity_at = Utc::now();
        self.store(&state).await?;
        Ok(state)
    }

    #[instrument(skip(self, entry))]
    async fn append_transcript(&self, call_id: &str, entry: VoiceTranscriptEntry) -> Result<(), VoiceError> {
        if call_id.is_empty() {
            return Err(VoiceError::Validation("call_id must not be empty".into()));
        }
        let mut conn = self.connection().await?;
        let json = serde_json::to_string(&entry)?;
        let key = Self::transcript_key(call_id);
        let _: i64 = conn.rpush(&key, json).await?;
        let _: bool = conn.expire(&key, CALL_TTL_SECONDS).await?;
        Ok(())
    }

    async fn get_transcript(&self, call_id: &str) -> Result<Vec<VoiceTranscriptEntry>, VoiceError> {
        let mut conn = self.connection().await?;
        let raw: Vec<String> = conn.lrange(Self::transcript_key(call_id), 0, -1).await?;
        raw.iter().map(|s| serde_json::from_str(s).map_err(VoiceError::from)).collect()
    }
}

/// In-process fake for tests and for deployments without a live Redis.
#[derive(Default)]
pub struct InMemoryVoiceCallStore {
    calls: Arc<RwLock<HashMap<String, VoiceCallState>>>,
    transcripts: Arc<RwLock<HashMap<String, Vec<VoiceTranscriptEntry>>>>,
}

impl InMemoryVoiceCallStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VoiceCallStore for InMemoryVoiceCallStore {
    async fn save_call_state(&self, state: VoiceCallState) -> Result<(), VoiceError> {
        if state.call_id.is_empty() {
            return Err(VoiceError::Validation("call_id must not be empty".into()));
        }
        self.calls.write().await.insert(state.call_id.clone(), state);
        Ok(())
    }

    async fn get_call_state(&self, call_id: &str) -> Result<Option<VoiceCallState>, VoiceError> {
        if call_id.is_empty() {
            return Err(VoiceError::Validation("call_id must not be empty".into()));
        }
        Ok(self.calls.read().await.get(call_id).cloned())
    }

    async fn increment_turn(&self, call_id: &str) -> Result<VoiceCallState, VoiceError> {
        let mut calls = self.calls.write().await;
        let state = calls.get_mut(call_id).ok_or_else(|| VoiceError::CallNotFound(call_id.to_string()))?;
        state.turn_count += 1;
        state.last_activity_at = Utc::now();
        Ok(state.clone())
    }

    async fn end_call(&self, call_id: &str, outcome: Option<String>) -> Result<VoiceCallState, VoiceError> {
        let mut calls = self.calls.write().await;
        let state = calls.get_mut(call_id).ok_or_else(|| VoiceError::CallNotFound(call_id.to_string()))?;
        state.status = if state.sms_handoff_sent { CallStatus::SmsHandoff } else { CallStatus::Ended };
        state.outcome = outcome;
        state.last_activity_at = Utc::now();
        Ok(state.clone())
    }

    async fn append_transcript(&self, call_id: &str, entry: VoiceTranscriptEntry) -> Result<(), VoiceError> {
        if call_id.is_empty() {
            return Err(VoiceError::Validation("call_id must not be empty".into()));
        }
        self.transcripts.write().await.entry(call_id.to_string()).or_default().push(entry);
        Ok(())
    }

    async fn get_transcript(&self, call_id: &str) -> Result<Vec<VoiceTranscriptEntry>, VoiceError> {
        Ok(self.transcripts.read().await.get(call_id).cloned().unwrap_or_default())
    }
}
