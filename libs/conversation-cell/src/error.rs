use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConversationError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("messenger send failed: {0}")]
    SendFailed(String),

    #[error("supervisor error: {0}")]
    Supervisor(String),

    #[error("processor error: {0}")]
    Processor(String),
}
