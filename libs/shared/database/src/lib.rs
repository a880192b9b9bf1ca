pub mod platform;

pub use platform::PlatformClient;
