pub mod availability;
pub mod engine;
pub mod preferences;
pub mod selection;

pub use availability::{AvailabilityProvider, PlaceholderAvailabilityProvider};
pub use engine::TimeSelectionEngine;
pub use preferences::extract_time_preferences;
pub use selection::detect_time_selection;
