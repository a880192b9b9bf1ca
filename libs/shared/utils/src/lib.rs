pub mod phone;
pub mod time;

pub use phone::{display_phone, normalize_phone_digits};
