//! Command-line interface definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tripwire",
    version,
    about = "Hybrid intelligent event-trigger engine"
)]
pub struct Cli {
    /// Path to a config file (default: tripwire.toml if present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the worker process (broker consumer, notification worker, sweeper)
    Run,

    /// Manage rules in the shared store
    Rules {
        #[command(subcommand)]
        command: RulesCommand,
    },

    /// Validate a pre-filter expression without evaluating it
    Check {
        /// Expression source, e.g. "profit_rate > 0.05"
        expression: String,
    },

    /// Publish a test event to the broker
    Emit {
        /// Dotted event type, e.g. trade.profit
        #[arg(long)]
        event_type: String,
        /// Context grouping key (defaults to the event type)
        #[arg(long)]
        context_key: Option<String>,
        /// Event id (defaults to a fresh UUID)
        #[arg(long)]
        event_id: Option<String>,
        /// Event payload as a JSON object
        #[arg(long, default_value = "{}")]
        data: String,
    },
}

#[derive(Subcommand)]
pub enum RulesCommand {
    /// List all rules
    List,
    /// Show one rule as JSON
    Show { rule_id: String },
    /// Create or replace a rule from a JSON file
    Apply { file: PathBuf },
    /// Delete a rule
    Delete { rule_id: String },
    /// Enable a rule
    Enable { rule_id: String },
    /// Disable a rule
    Disable { rule_id: String },
}
