pub mod error;
pub mod models;
pub mod services;

pub use error::PaymentsError;
pub use models::*;
pub use services::*;
