pub mod job_store;
pub mod outbox;
pub mod publisher;
pub mod queue;
pub mod worker;

pub use job_store::{InMemoryJobStore, JobStore, RedisJobStore};
pub use outbox::{InMemoryOutboxStore, OutboxDispatcher, OutboxEntry, OutboxStore, PlatformOutboxStore};
pub use publisher::Publisher;
pub use queue::{InMemoryQueue, Queue, QueueMessage, RedisQueue};
pub use worker::{normalize_receive_batch_size, JobHandler, JobOutcome, WorkerConfig, WorkerPool};
