use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue transport error: {0}")]
    Transport(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("invalid status transition: {from:?} -> {to:?}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("job handler timed out after {timeout_seconds}s")]
    HandlerTimeout { timeout_seconds: u64 },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("processing error: {0}")]
    Processing(String),
}
