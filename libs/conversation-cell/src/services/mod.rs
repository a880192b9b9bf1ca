pub mod conversation_store;
pub mod inbound_store;
pub mod leak_guard;
pub mod messenger;
pub mod opt_out;
pub mod processor;
pub mod reply_pipeline;
pub mod supervisor;
pub mod transcript_store;

pub use conversation_store::{ConversationStore, InMemoryConversationStore, RedisConversationStore};
pub use inbound_store::{InMemoryInboundMessageStore, InboundMessageExistenceCheck, PlatformInboundMessageStore};
pub use leak_guard::{LeakGuardResult, OutputLeakGuard, TelemetryEvent};
pub use messenger::{InstagramSender, LoggingInstagramSender, LoggingSmsSender, LoggingWebChatSender, Messenger, SendOutcome, SmsSender, WebChatSender};
pub use opt_out::{InMemoryOptOutRegistry, OptOutRegistry, PlatformOptOutRegistry};
pub use processor::ConversationProcessor;
pub use reply_pipeline::{PipelineOutcome, ReplyPipeline};
pub use supervisor::{FailOpenSupervisor, NoopSupervisor, Supervisor, SupervisorAction, SupervisorRequest, SupervisorVerdict};
pub use transcript_store::{InMemoryTranscriptStore, RedisTranscriptStore, TranscriptStore};
