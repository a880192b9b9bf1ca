mod handler;
mod processor;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clinic_cell::{ClinicConfigProvider, StaticClinicConfig};
use conversation_cell::{
    FailOpenSupervisor, InMemoryInboundMessageStore, InMemoryOptOutRegistry, InboundMessageExistenceCheck, LoggingInstagramSender, LoggingSmsSender, LoggingWebChatSender, Messenger,
    NoopSupervisor, OptOutRegistry, OutputLeakGuard, PlatformInboundMessageStore, PlatformOptOutRegistry, RedisConversationStore, RedisTranscriptStore, ReplyPipeline, TranscriptStore,
};
use payments_cell::{
    DepositDispatcher, DepositPreloader, LoggingBookingConfirmation, PaymentEventHandler, PaymentIntentStore, PlaceholderCheckoutProvider, ProcessedKeyStore, RedisPaymentIntentStore,
    RedisProcessedKeyStore,
};
use queue_cell::{
    normalize_receive_batch_size, InMemoryOutboxStore, OutboxDispatcher, OutboxStore, PlatformOutboxStore, Publisher, Queue, RedisJobStore, RedisQueue, WorkerConfig, WorkerPool,
};
use scheduling_cell::PlaceholderAvailabilityProvider;
use shared_config::{ClinicRuntimeConfig, PlatformConfig};
use shared_database::PlatformClient;

use handler::CoreJobHandler;
use processor::PassthroughProcessor;

const QUEUE_NAME: &str = "clinic_booking_jobs";
const OUTBOX_BATCH_SIZE: u32 = 25;
const OUTBOX_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

/// Composition root: wires the Redis-backed queue plane to the
/// REST-backed (or in-memory, if unconfigured) domain stores and starts
/// the worker pool and outbox dispatcher side by side. No HTTP surface
/// lives here — inbound webhooks are someone else's binary; this process
/// only drains the queue the webhooks and the outbox feed.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into())))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting clinic booking worker");

    let runtime = ClinicRuntimeConfig::from_env();
    let platform = PlatformConfig::from_env();
    let default_from = std::env::var("DEFAULT_FROM_NUMBER").unwrap_or_else(|_| {
        warn!("DEFAULT_FROM_NUMBER not set, using placeholder");
        "+10000000000".to_string()
    });

    let queue: Arc<dyn Queue> = Arc::new(RedisQueue::new(&runtime.redis_url, QUEUE_NAME).await?);
    let job_store = Arc::new(RedisJobStore::new(&runtime.redis_url).await?);
    let job_ttl = chrono::Duration::from_std(runtime.job_ttl).unwrap_or_else(|_| chrono::Duration::hours(72));
    let publisher = Arc::new(Publisher::new(queue.clone(), job_store.clone(), job_ttl));

    let conversations: Arc<dyn conversation_cell::ConversationStore> = Arc::new(RedisConversationStore::new(&runtime.redis_url).await?);
    let transcript: Arc<dyn TranscriptStore> = Arc::new(RedisTranscriptStore::new(&runtime.redis_url).await?);
    let payment_intents: Arc<dyn PaymentIntentStore> = Arc::new(RedisPaymentIntentStore::new(&runtime.redis_url).await?);
    let processed_keys: Arc<dyn ProcessedKeyStore> = Arc::new(RedisProcessedKeyStore::new(&runtime.redis_url).await?);

    let platform_client = platform.is_configured().then(|| Arc::new(PlatformClient::new(&platform)));

    let opt_out: Arc<dyn OptOutRegistry> = match &platform_client {
        Some(client) => Arc::new(PlatformOptOutRegistry::new(client.clone())),
        None => {
            warn!("platform store not configured, opt-out registry running in-memory");
            Arc::new(InMemoryOptOutRegistry::new())
        }
    };

    let inbound_existence: Arc<dyn InboundMessageExistenceCheck> = match &platform_client {
        Some(client) => Arc::new(PlatformInboundMessageStore::new(client.clone())),
        None => {
            warn!("platform store not configured, inbound message existence check running in-memory");
            Arc::new(InMemoryInboundMessageStore::new())
        }
    };

    let clinic: Arc<dyn ClinicConfigProvider> = Arc::new(StaticClinicConfig::from_env());
    let availability = Arc::new(PlaceholderAvailabilityProvider);
    let checkout_provider = Arc::new(PlaceholderCheckoutProvider);

    // Built once and shared: the deposit dispatcher inserts entries the
    // outbox dispatcher below must see, so both need the same store
    // instance, not two independently-constructed ones.
    let platform_outbox = platform_client.as_ref().map(|client| Arc::new(PlatformOutboxStore::new(client.clone())));
    let in_memory_outbox = platform_outbox.is_none().then(|| {
        warn!("platform store not configured, outbox running against a process-local store");
        Arc::new(InMemoryOutboxStore::new())
    });
    let outbox: Arc<dyn OutboxStore> = match (&platform_outbox, &in_memory_outbox) {
        (Some(store), _) => store.clone(),
        (None, Some(store)) => store.clone(),
        (None, None) => unreachable!("exactly one outbox store is constructed above"),
    };

    let messenger = Arc::new(Messenger::new().with_sms(LoggingSmsSender).with_instagram(LoggingInstagramSender).with_webchat(LoggingWebChatSender));

    let supervisor = Arc::new(FailOpenSupervisor::new(NoopSupervisor));

    let reply_pipeline = Arc::new(ReplyPipeline {
        opt_out: opt_out.clone(),
        inbound_existence,
        supervisor,
        supervisor_mode: runtime.supervisor_mode,
        leak_guard: Arc::new(OutputLeakGuard::new()),
        messenger: messenger.clone(),
        transcript: transcript.clone(),
    });

    let preloader = Arc::new(DepositPreloader::new(checkout_provider.clone()));

    let deposit_dispatcher = Arc::new(DepositDispatcher {
        payment_intent_store: payment_intents.clone(),
        checkout_provider: checkout_provider.clone(),
        preloader,
        clinic: clinic.clone(),
        messenger: messenger.clone(),
        transcript: transcript.clone(),
        outbox,
        preload_wait_budget: runtime.deposit_preload_wait,
    });

    let payment_handler = Arc::new(PaymentEventHandler {
        processed_keys,
        payment_intents,
        booking: Arc::new(LoggingBookingConfirmation),
        moxie_client: None,
        clinic: clinic.clone(),
        conversations: conversations.clone(),
        opt_out,
        messenger,
        transcript,
        default_from: default_from.clone(),
    });

    let processor = Arc::new(PassthroughProcessor::new(availability, clinic.clone()));

    let job_handler = Arc::new(CoreJobHandler {
        processor,
        conversations,
        reply_pipeline,
        deposit_dispatcher,
        payment_handler,
        clinic,
        default_from,
    });

    let receive_batch_size = normalize_receive_batch_size(runtime.receive_batch_size).unwrap_or_else(|e| {
        warn!(error = %e, "invalid RECEIVE_BATCH_SIZE, falling back to default");
        WorkerConfig::default().receive_batch_size
    });
    let worker_config = WorkerConfig {
        worker_count: runtime.worker_count,
        receive_batch_size,
        receive_wait_seconds: runtime.receive_wait_seconds,
        ..WorkerConfig::default()
    };
    let worker_pool = Arc::new(WorkerPool::new(worker_config, queue, job_store, job_handler));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let outbox_task = match (platform_outbox, in_memory_outbox) {
        (Some(store), _) => tokio::spawn(run_outbox(store, publisher, shutdown_rx)),
        (None, Some(store)) => tokio::spawn(run_outbox(store, publisher, shutdown_rx)),
        (None, None) => unreachable!("exactly one outbox store is constructed above"),
    };

    let pool_for_run = worker_pool.clone();
    let worker_task = tokio::spawn(async move { pool_for_run.start().await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    worker_pool.shutdown().await;
    let _ = worker_task.await;
    let _ = outbox_task.await;

    Ok(())
}

async fn run_outbox<S: OutboxStore + 'static>(store: Arc<S>, publisher: Arc<Publisher>, shutdown: watch::Receiver<bool>) {
    let dispatcher = OutboxDispatcher::new(store, publisher);
    dispatcher.run(OUTBOX_POLL_INTERVAL, OUTBOX_BATCH_SIZE, shutdown).await;
}
