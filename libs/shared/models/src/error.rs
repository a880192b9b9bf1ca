use thiserror::Error;

/// Cross-cutting error type shared by every core crate.
///
/// There is no HTTP layer in this repo, so this enum carries no transport
/// mapping of its own. Each crate that needs one (the worker's job
/// dispatcher, the payment handler) matches on these variants directly and
/// decides redelivery / logging per variant, per its own error handling
/// rules.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("External service error: {0}")]
    ExternalService(String),
}

impl AppError {
    /// True for errors that must never be treated as retryable without
    /// risking a duplicate side effect (a second deposit link, a second
    /// booking confirmation).
    pub fn is_safety(&self) -> bool {
        matches!(self, AppError::Conflict(_) | AppError::Internal(_))
    }
}
