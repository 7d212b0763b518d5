//! Worker service assembly
//!
//! Builds the full dependency graph up front (store clients, engines,
//! router, dispatcher, handler) and runs the three long-lived loops: the
//! broker consumer, the notification worker and the batch sweeper, plus the
//! rule-cache invalidation watcher. Nothing connects lazily from the event
//! path; shutdown is cooperative through one cancellation token.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Settings;
use crate::engine::llm::{
    BatchSweeper, LlmBackend, LlmEngine, OpenAiClient, TriggerModeManager, TriggerModeStore,
};
use crate::engine::RuleRouter;
use crate::error::Result;
use crate::messaging::{BrokerConsumer, EventHandler};
use crate::notification::{
    default_channels, NotificationDispatcher, NotificationLimiter, NotificationWorker,
};
use crate::storage::{
    ContextStore, DedupStore, IdempotencyStore, KeySpace, KvStore, LlmCacheStore,
    NotificationQueue, RateStore, RedisStore, RuleCache, RuleStore,
};

pub struct WorkerService {
    cancel: CancellationToken,
    consumer: BrokerConsumer,
    notification_worker: NotificationWorker,
    sweeper: BatchSweeper,
    rule_cache: Arc<RuleCache>,
}

impl WorkerService {
    /// Connect to the shared store and assemble the worker with the
    /// OpenAI-compatible backend from settings.
    pub async fn connect(settings: Settings) -> Result<Self> {
        let kv: Arc<dyn KvStore> = Arc::new(RedisStore::connect(&settings.redis_url).await?);
        let backend: Arc<dyn LlmBackend> = Arc::new(OpenAiClient::new(&settings)?);
        Self::assemble(settings, kv, backend)
    }

    /// Assemble the dependency graph over any store and backend.
    pub fn assemble(
        settings: Settings,
        kv: Arc<dyn KvStore>,
        backend: Arc<dyn LlmBackend>,
    ) -> Result<Self> {
        let keys = KeySpace::new(settings.key_prefix.clone());
        let window = Duration::from_secs(settings.context_window_seconds);

        let context = ContextStore::new(
            kv.clone(),
            keys.clone(),
            window,
            settings.context_max_events,
        );
        let idempotency = IdempotencyStore::new(kv.clone(), keys.clone());
        let rule_store = RuleStore::new(kv.clone(), keys.clone());
        let rule_cache = Arc::new(RuleCache::new(rule_store.clone()));

        let llm = LlmEngine::new(
            backend,
            LlmCacheStore::new(kv.clone(), keys.clone()),
            context.clone(),
        );
        let trigger_mode = TriggerModeManager::new(TriggerModeStore::new(kv.clone(), keys.clone()));
        let router = RuleRouter::new(llm.clone(), trigger_mode.clone());

        let queue = NotificationQueue::new(kv.clone(), keys.clone());
        let limiter = NotificationLimiter::new(
            DedupStore::new(kv.clone(), keys.clone()),
            RateStore::new(kv.clone(), keys.clone()),
        );
        let dispatcher = NotificationDispatcher::new(queue.clone(), limiter);

        let handler = Arc::new(EventHandler::new(
            idempotency,
            context,
            rule_cache.clone(),
            router,
            dispatcher.clone(),
        ));

        let consumer = BrokerConsumer::new(
            settings.rabbitmq_url.clone(),
            settings.rabbitmq_queue.clone(),
            handler,
        );
        let notification_worker = NotificationWorker::new(
            queue,
            default_channels(&settings)?,
            settings.notification_max_retry,
        );
        let sweeper = BatchSweeper::new(
            kv,
            keys,
            trigger_mode,
            llm,
            rule_store,
            dispatcher,
            Duration::from_secs(settings.batch_sweep_interval),
        );

        Ok(Self {
            cancel: CancellationToken::new(),
            consumer,
            notification_worker,
            sweeper,
            rule_cache,
        })
    }

    /// Token that stops every loop when cancelled.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run all loops to completion. Returns once every loop has observed
    /// cancellation; in-flight acks may be lost, idempotency covers the
    /// redelivery.
    pub async fn run(self) -> Result<()> {
        let Self {
            cancel,
            consumer,
            notification_worker,
            sweeper,
            rule_cache,
        } = self;

        info!("worker service starting");

        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if let Err(err) = rule_cache.watch(cancel).await {
                    error!(error = %err, "rule cache watcher failed");
                }
            })
        };
        let consumer_task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { consumer.run(cancel).await })
        };
        let notify_task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { notification_worker.run(cancel).await })
        };
        let sweeper_task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { sweeper.run(cancel).await })
        };

        for task in [consumer_task, notify_task, sweeper_task, watcher] {
            if let Err(err) = task.await {
                error!(error = %err, "worker task panicked");
            }
        }

        info!("worker service stopped");
        Ok(())
    }
}
