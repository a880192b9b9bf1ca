pub mod voice_store;

pub use voice_store::{InMemoryVoiceCallStore, RedisVoiceCallStore, VoiceCallStore};
