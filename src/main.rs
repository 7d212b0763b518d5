//! `tripwire` - hybrid intelligent event-trigger engine
//!
//! This binary runs the worker process (broker consumer, notification
//! worker, batch sweeper) and provides operational commands for rule
//! administration, expression validation and test-event publishing.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tripwire_core::engine::ExpressionEvaluator;
use tripwire_core::messaging::publish_event;
use tripwire_core::storage::{KeySpace, KvStore, RedisStore, RuleStore};
use tripwire_core::{Rule, Settings, WorkerService};

use crate::cli::{Cli, Commands, RulesCommand};

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings =
        Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Run => run_worker(settings).await,
        Commands::Rules { command } => run_rules(settings, command).await,
        Commands::Check { expression } => run_check(&expression),
        Commands::Emit {
            event_type,
            context_key,
            event_id,
            data,
        } => run_emit(settings, event_type, context_key, event_id, data).await,
    }
}

async fn run_worker(settings: Settings) -> Result<()> {
    let service = WorkerService::connect(settings)
        .await
        .context("Failed to start worker service")?;

    let cancel = service.cancellation();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
        cancel.cancel();
    });

    service.run().await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

async fn rule_store(settings: &Settings) -> Result<RuleStore> {
    let kv: Arc<dyn KvStore> = Arc::new(
        RedisStore::connect(&settings.redis_url)
            .await
            .context("Failed to connect to the shared store")?,
    );
    Ok(RuleStore::new(
        kv,
        KeySpace::new(settings.key_prefix.clone()),
    ))
}

async fn run_rules(settings: Settings, command: RulesCommand) -> Result<()> {
    let store = rule_store(&settings).await?;

    match command {
        RulesCommand::List => {
            let mut rules = store.list_all().await?;
            rules.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
            if rules.is_empty() {
                println!("No rules defined.");
            }
            for rule in rules {
                println!(
                    "{}  priority={}  enabled={}  types={}  {}",
                    rule.rule_id,
                    rule.priority,
                    rule.enabled,
                    rule.event_types.join(","),
                    rule.name,
                );
            }
        }
        RulesCommand::Show { rule_id } => match store.get(&rule_id).await? {
            Some(rule) => println!("{}", serde_json::to_string_pretty(&rule)?),
            None => bail!("Rule not found: {rule_id}"),
        },
        RulesCommand::Apply { file } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let rule: Rule = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid rule JSON in {}", file.display()))?;
            let rule_id = rule.rule_id.clone();
            if store.get(&rule_id).await?.is_some() {
                store.update(&rule_id, rule).await?;
                println!("Updated rule {rule_id}");
            } else {
                store.create(rule).await?;
                println!("Created rule {rule_id}");
            }
        }
        RulesCommand::Delete { rule_id } => {
            if store.delete(&rule_id).await? {
                println!("Deleted rule {rule_id}");
            } else {
                bail!("Rule not found: {rule_id}");
            }
        }
        RulesCommand::Enable { rule_id } => {
            if store.set_enabled(&rule_id, true).await? {
                println!("Enabled rule {rule_id}");
            } else {
                bail!("Rule not found: {rule_id}");
            }
        }
        RulesCommand::Disable { rule_id } => {
            if store.set_enabled(&rule_id, false).await? {
                println!("Disabled rule {rule_id}");
            } else {
                bail!("Rule not found: {rule_id}");
            }
        }
    }
    Ok(())
}

fn run_check(expression: &str) -> Result<()> {
    match ExpressionEvaluator::new().validate(expression) {
        Ok(()) => {
            println!("OK: {expression}");
            Ok(())
        }
        Err(message) => bail!("Invalid expression: {message}"),
    }
}

async fn run_emit(
    settings: Settings,
    event_type: String,
    context_key: Option<String>,
    event_id: Option<String>,
    data: String,
) -> Result<()> {
    let data: serde_json::Value =
        serde_json::from_str(&data).context("--data must be a JSON object")?;
    if !data.is_object() {
        bail!("--data must be a JSON object");
    }

    let mut payload = serde_json::json!({
        "event_id": event_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        "event_type": event_type,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "data": data,
    });
    if let Some(context_key) = context_key {
        payload["context_key"] = serde_json::Value::String(context_key);
    }

    publish_event(&settings.rabbitmq_url, &settings.rabbitmq_queue, &payload).await?;
    println!("Published event to {}", settings.rabbitmq_queue);
    Ok(())
}
