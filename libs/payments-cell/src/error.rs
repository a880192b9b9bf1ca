use thiserror::Error;

#[derive(Error, Debug)]
pub enum PaymentsError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("duplicate-guard check unavailable: {0}")]
    DuplicateGuardUnavailable(String),

    #[error("checkout provider error: {0}")]
    CheckoutProvider(String),

    #[error("booking confirmation failed: {0}")]
    BookingFailed(String),
}
