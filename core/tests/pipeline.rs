//! End-to-end pipeline scenarios over the in-memory store with a scripted
//! LLM backend: batching, interval polling, hybrid short-circuiting,
//! idempotent replay, priority ordering, rate limiting and delivery retry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;

use tripwire_core::engine::llm::{
    BatchSweeper, LlmBackend, LlmEngine, TriggerModeManager, TriggerModeStore,
};
use tripwire_core::engine::RuleRouter;
use tripwire_core::error::Result;
use tripwire_core::messaging::EventHandler;
use tripwire_core::models::{
    LlmRuleConfig, NotifyPolicy, NotifyTarget, PreFilter, RateLimit, Rule, RuleConfig, RuleType,
    TriggerMode,
};
use tripwire_core::notification::{
    NotificationChannel, NotificationDispatcher, NotificationLimiter, NotificationWorker,
};
use tripwire_core::storage::{
    ContextStore, DedupStore, IdempotencyStore, KeySpace, LlmCacheStore, MemoryStore,
    NotificationQueue, RateStore, RuleCache, RuleStore,
};
use tripwire_core::{Event, NotificationTask};

/// Scripted LLM backend recording every prompt it receives.
struct MockLlm {
    response: String,
    calls: Mutex<Vec<String>>,
}

impl MockLlm {
    fn new(response: &str) -> Arc<Self> {
        Arc::new(Self {
            response: response.to_string(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn positive() -> Arc<Self> {
        Self::new(r#"{"should_trigger": true, "confidence": 0.9, "reason": "pattern confirmed"}"#)
    }

    fn negative() -> Arc<Self> {
        Self::new(r#"{"should_trigger": false, "confidence": 0.8, "reason": "no actionable pattern"}"#)
    }

    fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl LlmBackend for MockLlm {
    async fn complete(&self, _system: &str, user: &str) -> Result<String> {
        self.calls.lock().push(user.to_string());
        Ok(self.response.clone())
    }
}

struct Pipeline {
    kv: Arc<MemoryStore>,
    keys: KeySpace,
    handler: EventHandler,
    queue: NotificationQueue,
    rules: RuleStore,
    cache: Arc<RuleCache>,
    llm: LlmEngine,
    trigger_mode: TriggerModeManager,
    dispatcher: NotificationDispatcher,
}

fn pipeline(backend: Arc<dyn LlmBackend>) -> Pipeline {
    let kv: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let keys = KeySpace::new("t:");

    let context = ContextStore::new(kv.clone(), keys.clone(), Duration::from_secs(300), 100);
    let idempotency = IdempotencyStore::new(kv.clone(), keys.clone());
    let rules = RuleStore::new(kv.clone(), keys.clone());
    let cache = Arc::new(RuleCache::new(rules.clone()));

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

    let handler = EventHandler::new(
        idempotency,
        context,
        cache.clone(),
        router,
        dispatcher.clone(),
    );
    Pipeline {
        kv,
        keys,
        handler,
        queue,
        rules,
        cache,
        llm,
        trigger_mode,
        dispatcher,
    }
}

fn sweeper(p: &Pipeline) -> BatchSweeper {
    BatchSweeper::new(
        p.kv.clone(),
        p.keys.clone(),
        p.trigger_mode.clone(),
        p.llm.clone(),
        p.rules.clone(),
        p.dispatcher.clone(),
        Duration::from_secs(5),
    )
}

fn base_rule(rule_id: &str, event_type: &str, config: RuleConfig) -> Rule {
    Rule {
        rule_id: rule_id.to_string(),
        name: format!("rule {rule_id}"),
        description: String::new(),
        enabled: true,
        priority: 100,
        event_types: vec![event_type.to_string()],
        context_keys: Vec::new(),
        rule_config: config,
        notify_policy: NotifyPolicy {
            targets: vec![NotifyTarget::telegram_chat("42")],
            rate_limit: RateLimit {
                max_per_minute: 100,
                cooldown_seconds: 0,
            },
        },
        metadata: Default::default(),
    }
}

fn llm_config(mode: TriggerMode, batch_size: u32, max_wait: u64, interval: u64) -> LlmRuleConfig {
    LlmRuleConfig {
        description: "notify on a sustained actionable pattern".to_string(),
        trigger_mode: mode,
        batch_size,
        max_wait_seconds: max_wait,
        interval_seconds: interval,
        confidence_threshold: 0.7,
    }
}

fn signal_event(n: usize, volume: f64, signal: &str) -> Event {
    let serde_json::Value::Object(data) = json!({"signal": signal, "volume": volume}) else {
        unreachable!()
    };
    Event::new(format!("sig-{n}"), "trade.signal")
        .with_context_key("trade.signal.BTCUSDT")
        .with_timestamp(Utc::now())
        .with_data(data)
}

async fn install(p: &Pipeline, rule: Rule) {
    p.rules.create(rule).await.unwrap();
    p.cache.invalidate();
}

// Six strong buys into a batch-5 rule: exactly one LLM call with the batch
// of five behind it; the sixth event starts a new batch.
#[tokio::test]
async fn batch_of_five_triggers_one_llm_call() {
    let backend = MockLlm::positive();
    let p = pipeline(backend.clone());
    install(
        &p,
        base_rule(
            "batch5",
            "trade.signal",
            RuleConfig {
                rule_type: RuleType::Llm,
                pre_filter: None,
                llm_config: Some(llm_config(TriggerMode::Batch, 5, 30, 30)),
            },
        ),
    )
    .await;

    let volumes = [100_000.0, 150_000.0, 120_000.0, 180_000.0, 200_000.0, 150_000.0];
    for (n, volume) in volumes.iter().enumerate() {
        p.handler
            .handle(signal_event(n, *volume, "buy"))
            .await
            .unwrap();
    }

    assert_eq!(backend.call_count(), 1);
    // the prompt carried the accumulated context
    assert!(backend.calls.lock()[0].contains("Total Events: 5"));
    assert_eq!(p.queue.len().await.unwrap(), 1);
}

// Mixed low-volume events; the model decides not to trigger, so one LLM
// call and no notification.
#[tokio::test]
async fn batch_with_negative_model_decision_sends_nothing() {
    let backend = MockLlm::negative();
    let p = pipeline(backend.clone());
    install(
        &p,
        base_rule(
            "batch5",
            "trade.signal",
            RuleConfig {
                rule_type: RuleType::Llm,
                pre_filter: None,
                llm_config: Some(llm_config(TriggerMode::Batch, 5, 30, 30)),
            },
        ),
    )
    .await;

    for n in 0..6 {
        let signal = if n % 2 == 0 { "buy" } else { "sell" };
        p.handler
            .handle(signal_event(n, 25_000.0, signal))
            .await
            .unwrap();
    }

    assert_eq!(backend.call_count(), 1);
    assert_eq!(p.queue.len().await.unwrap(), 0);
}

// Six events into a batch-5 rule where the trailing event's batch goes
// silent: the batch-full path makes one LLM call, and the sweeper adds at
// most one timeout-driven call for the leftover entry, dispatching its
// notification and clearing the batch.
#[tokio::test]
async fn sweeper_flushes_the_trailing_batch_on_timeout() {
    let backend = MockLlm::positive();
    let p = pipeline(backend.clone());
    install(
        &p,
        base_rule(
            "batch5",
            "trade.signal",
            RuleConfig {
                rule_type: RuleType::Llm,
                pre_filter: None,
                llm_config: Some(llm_config(TriggerMode::Batch, 5, 30, 30)),
            },
        ),
    )
    .await;

    let volumes = [100_000.0, 150_000.0, 120_000.0, 180_000.0, 200_000.0];
    for (n, volume) in volumes.iter().enumerate() {
        p.handler
            .handle(signal_event(n, *volume, "buy"))
            .await
            .unwrap();
    }
    assert_eq!(backend.call_count(), 1);
    assert_eq!(p.queue.len().await.unwrap(), 1);

    // The sixth event landed in a fresh batch and the key then went silent;
    // plant it as a pending entry whose wait already exceeds max_wait.
    let stale = signal_event(5, 150_000.0, "buy")
        .with_timestamp(Utc::now() - chrono::Duration::seconds(60));
    p.trigger_mode
        .store()
        .add_to_batch("batch5", "trade.signal.BTCUSDT", &stale, Duration::from_secs(30))
        .await
        .unwrap();

    sweeper(&p).sweep().await.unwrap();

    // exactly one additional, timeout-driven LLM call
    assert_eq!(backend.call_count(), 2);
    assert!(backend.calls.lock()[1].contains(r#""volume":150000.0"#));
    assert_eq!(p.queue.len().await.unwrap(), 2);

    // the flush was recorded: batch cleared, analysis stamped
    assert!(p
        .trigger_mode
        .store()
        .get_batch("batch5", "trade.signal.BTCUSDT")
        .await
        .unwrap()
        .is_empty());
    assert!(p
        .trigger_mode
        .store()
        .last_analysis("batch5", "trade.signal.BTCUSDT")
        .await
        .unwrap()
        .is_some());

    // a second sweep finds nothing left to flush
    sweeper(&p).sweep().await.unwrap();
    assert_eq!(backend.call_count(), 2);
}

// Interval polling (scaled down to 1s) caps LLM calls at one per interval;
// the first event triggers immediately because last_analysis is absent.
#[tokio::test]
async fn interval_rule_polls_once_per_interval() {
    let backend = MockLlm::negative();
    let p = pipeline(backend.clone());
    install(
        &p,
        base_rule(
            "interval",
            "metric.cpu",
            RuleConfig {
                rule_type: RuleType::Llm,
                pre_filter: None,
                llm_config: Some(llm_config(TriggerMode::Interval, 5, 30, 1)),
            },
        ),
    )
    .await;

    let burst = |start: usize| {
        (start..start + 5).map(|n| {
            let serde_json::Value::Object(data) = json!({"cpu_usage": 0.9}) else {
                unreachable!()
            };
            Event::new(format!("m-{n}"), "metric.cpu").with_data(data)
        })
    };

    for event in burst(0) {
        p.handler.handle(event).await.unwrap();
    }
    assert_eq!(backend.call_count(), 1);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    for event in burst(5) {
        p.handler.handle(event).await.unwrap();
    }
    assert_eq!(backend.call_count(), 2);
}

// A traditional predicate triggers with full confidence.
#[tokio::test]
async fn traditional_predicate_triggers() {
    let p = pipeline(MockLlm::negative());
    install(
        &p,
        base_rule(
            "trad",
            "trade.profit",
            RuleConfig {
                rule_type: RuleType::Traditional,
                pre_filter: Some(PreFilter {
                    filter_type: "expression".to_string(),
                    expression: "profit_rate > 0.05".to_string(),
                }),
                llm_config: None,
            },
        ),
    )
    .await;

    let serde_json::Value::Object(data) = json!({"profit_rate": 0.08}) else {
        unreachable!()
    };
    p.handler
        .handle(Event::new("e1", "trade.profit").with_data(data))
        .await
        .unwrap();

    let task = p
        .queue
        .dequeue(Duration::from_millis(10))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.rule_id, "trad");
    assert_eq!(task.metadata["confidence"], json!(1.0));
}

// When the hybrid pre-filter rejects, the LLM is never consulted.
#[tokio::test]
async fn hybrid_short_circuit_skips_llm() {
    let backend = MockLlm::positive();
    let p = pipeline(backend.clone());
    install(
        &p,
        base_rule(
            "hybrid",
            "trade.profit",
            RuleConfig {
                rule_type: RuleType::Hybrid,
                pre_filter: Some(PreFilter {
                    filter_type: "expression".to_string(),
                    expression: "profit_rate > 0.05".to_string(),
                }),
                llm_config: Some(llm_config(TriggerMode::Realtime, 5, 30, 30)),
            },
        ),
    )
    .await;

    let serde_json::Value::Object(data) = json!({"profit_rate": 0.02}) else {
        unreachable!()
    };
    p.handler
        .handle(Event::new("e1", "trade.profit").with_data(data))
        .await
        .unwrap();

    assert_eq!(backend.call_count(), 0);
    assert_eq!(p.queue.len().await.unwrap(), 0);
}

// Two targets, channel A keeps failing but channel B succeeds; one success
// delivers the task on the first attempt, no retry.
#[tokio::test]
async fn one_successful_channel_delivers_without_retry() {
    struct FixedChannel {
        name: &'static str,
        ok: bool,
        sends: Mutex<u32>,
    }

    #[async_trait]
    impl NotificationChannel for FixedChannel {
        fn channel_type(&self) -> &'static str {
            self.name
        }
        async fn send(&self, _t: &NotifyTarget, _task: &NotificationTask) -> Result<bool> {
            *self.sends.lock() += 1;
            Ok(self.ok)
        }
    }

    let kv: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let queue = NotificationQueue::new(kv, KeySpace::new("t:"));
    let chan_a = Arc::new(FixedChannel {
        name: "chan_a",
        ok: false,
        sends: Mutex::new(0),
    });
    let chan_b = Arc::new(FixedChannel {
        name: "chan_b",
        ok: true,
        sends: Mutex::new(0),
    });
    let mut channels: HashMap<&'static str, Arc<dyn NotificationChannel>> = HashMap::new();
    channels.insert("chan_a", chan_a.clone());
    channels.insert("chan_b", chan_b.clone());
    let worker = NotificationWorker::new(queue.clone(), channels, 3);

    let target = |name: &str| NotifyTarget {
        target_type: name.to_string(),
        user_id: None,
        chat_id: Some("42".to_string()),
        webhook_key: None,
    };
    worker
        .process(NotificationTask {
            task_id: "notify_s6".to_string(),
            rule_id: "r1".to_string(),
            context_key: "k".to_string(),
            targets: vec![target("chan_a"), target("chan_b")],
            message: "m".to_string(),
            retry_count: 0,
            created_at: Utc::now(),
            retry_after: None,
            metadata: Default::default(),
        })
        .await;

    assert_eq!(*chan_a.sends.lock(), 1);
    assert_eq!(*chan_b.sends.lock(), 1);
    assert_eq!(queue.len().await.unwrap(), 0);
    assert_eq!(queue.dead_letter_len().await.unwrap(), 0);
}

// Replaying an event any number of times dispatches exactly as many
// notifications as a single ingestion.
#[tokio::test]
async fn replayed_event_dispatches_once() {
    let p = pipeline(MockLlm::negative());
    install(
        &p,
        base_rule(
            "trad",
            "trade.profit",
            RuleConfig {
                rule_type: RuleType::Traditional,
                pre_filter: Some(PreFilter {
                    filter_type: "expression".to_string(),
                    expression: "profit_rate > 0.05".to_string(),
                }),
                llm_config: None,
            },
        ),
    )
    .await;

    for _ in 0..5 {
        let serde_json::Value::Object(data) = json!({"profit_rate": 0.08}) else {
            unreachable!()
        };
        p.handler
            .handle(Event::new("replayed", "trade.profit").with_data(data))
            .await
            .unwrap();
    }
    assert_eq!(p.queue.len().await.unwrap(), 1);
}

// The higher-priority rule is routed (and thus dispatched) first for the
// same event.
#[tokio::test]
async fn higher_priority_rule_dispatches_first() {
    let p = pipeline(MockLlm::negative());
    let config = || RuleConfig {
        rule_type: RuleType::Traditional,
        pre_filter: Some(PreFilter {
            filter_type: "expression".to_string(),
            expression: "profit_rate > 0.05".to_string(),
        }),
        llm_config: None,
    };
    let mut low = base_rule("a_low", "trade.profit", config());
    low.priority = 10;
    let mut high = base_rule("z_high", "trade.profit", config());
    high.priority = 200;
    install(&p, low).await;
    install(&p, high).await;

    let serde_json::Value::Object(data) = json!({"profit_rate": 0.08}) else {
        unreachable!()
    };
    p.handler
        .handle(Event::new("e1", "trade.profit").with_data(data))
        .await
        .unwrap();

    let first = p
        .queue
        .dequeue(Duration::from_millis(10))
        .await
        .unwrap()
        .unwrap();
    let second = p
        .queue
        .dequeue(Duration::from_millis(10))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.rule_id, "z_high");
    assert_eq!(second.rule_id, "a_low");
}

// The per-minute quota caps notifications per rule.
#[tokio::test]
async fn per_minute_quota_caps_notifications() {
    let p = pipeline(MockLlm::negative());
    let mut rule = base_rule(
        "trad",
        "trade.profit",
        RuleConfig {
            rule_type: RuleType::Traditional,
            pre_filter: Some(PreFilter {
                filter_type: "expression".to_string(),
                expression: "profit_rate > 0.05".to_string(),
            }),
            llm_config: None,
        },
    );
    rule.notify_policy.rate_limit.max_per_minute = 2;
    install(&p, rule).await;

    for n in 0..4 {
        let serde_json::Value::Object(data) = json!({"profit_rate": 0.08}) else {
            unreachable!()
        };
        p.handler
            .handle(Event::new(format!("e{n}"), "trade.profit").with_data(data))
            .await
            .unwrap();
    }
    assert_eq!(p.queue.len().await.unwrap(), 2);
}

// A positive LLM decision below the confidence threshold never reaches the
// dispatcher.
#[tokio::test]
async fn low_confidence_trigger_is_gated() {
    let backend =
        MockLlm::new(r#"{"should_trigger": true, "confidence": 0.5, "reason": "weak signal"}"#);
    let p = pipeline(backend.clone());
    install(
        &p,
        base_rule(
            "llm",
            "trade.signal",
            RuleConfig {
                rule_type: RuleType::Llm,
                pre_filter: None,
                llm_config: Some(llm_config(TriggerMode::Realtime, 5, 30, 30)),
            },
        ),
    )
    .await;

    p.handler
        .handle(signal_event(0, 100_000.0, "buy"))
        .await
        .unwrap();

    assert_eq!(backend.call_count(), 1);
    assert_eq!(p.queue.len().await.unwrap(), 0);
}
