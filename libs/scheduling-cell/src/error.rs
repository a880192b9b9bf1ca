use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulingError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("availability provider error: {0}")]
    Provider(String),

    #[error("strategy not supported by this availability adapter: {0}")]
    NotSupported(String),

    #[error("no availability found for the requested window")]
    NoAvailability,
}
