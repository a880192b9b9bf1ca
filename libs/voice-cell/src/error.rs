use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("call not found: {0}")]
    CallNotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),
}
