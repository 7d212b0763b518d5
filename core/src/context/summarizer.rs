//! Context summarizer
//!
//! Condenses a context window into the fixed-schema text block embedded in
//! LLM prompts. The output must be byte-stable for identical input: the LLM
//! result cache hashes it, so any formatting drift would defeat caching.

use serde_json::{Map, Value};

use crate::models::Event;

#[derive(Debug, Clone, Default)]
pub struct ContextSummarizer;

impl ContextSummarizer {
    pub fn new() -> Self {
        Self
    }

    /// Summarize a context window: event type, time range, count, the most
    /// recent 10 entries and opportunistic statistics over well-known
    /// numeric fields.
    pub fn summarize(&self, events: &[Event]) -> String {
        if events.is_empty() {
            return "No historical events in context window.".to_string();
        }

        let mut sorted: Vec<&Event> = events.iter().collect();
        sorted.sort_by_key(|e| e.timestamp);

        let start = sorted[0].timestamp;
        let end = sorted[sorted.len() - 1].timestamp;
        let duration_secs = (end - start).num_seconds();

        let mut lines = vec![
            format!("Event Type: {}", sorted[0].event_type),
            format!(
                "Time Range: {} - {} ({})",
                start.format("%H:%M:%S"),
                end.format("%H:%M:%S"),
                format_duration(duration_secs)
            ),
            format!("Total Events: {}", events.len()),
            String::new(),
            "Recent Events:".to_string(),
        ];

        let recent_start = sorted.len().saturating_sub(10);
        for (i, event) in sorted[recent_start..].iter().copied().enumerate() {
            lines.push(format_event(i + 1, event));
        }

        let stats = statistics(&sorted);
        if !stats.is_empty() {
            lines.push(String::new());
            lines.push("Statistics:".to_string());
            lines.extend(stats);
        }

        lines.join("\n")
    }
}

fn format_event(index: usize, event: &Event) -> String {
    format!(
        "{index}. [{}] {}",
        event.timestamp.format("%H:%M:%S"),
        format_data(&event.data)
    )
}

/// Pick out fields common to trading, price and system events; fall back to
/// truncated compact JSON.
fn format_data(data: &Map<String, Value>) -> String {
    if data.is_empty() {
        return "(no data)".to_string();
    }

    let mut parts = Vec::new();

    if let Some(symbol) = data.get("symbol").and_then(Value::as_str) {
        parts.push(symbol.to_string());
    }
    if let Some(profit) = data.get("profit") {
        match profit.as_f64() {
            Some(v) => parts.push(format!("{v:+.2}")),
            None => parts.push(scalar_text(profit)),
        }
    }
    if let Some(rate) = data.get("profit_rate") {
        match rate.as_f64() {
            Some(v) => parts.push(format!("({:+.1}%)", v * 100.0)),
            None => parts.push(scalar_text(rate)),
        }
    }
    if let Some(price) = data.get("price") {
        parts.push(format!("price={}", scalar_text(price)));
    }
    if let Some(v) = data.get("change_rate").and_then(Value::as_f64) {
        parts.push(format!("({:+.1}%)", v * 100.0));
    }
    if let Some(v) = data.get("cpu_usage").and_then(Value::as_f64) {
        parts.push(format!("CPU={:.0}%", v * 100.0));
    }
    if let Some(v) = data.get("memory_usage").and_then(Value::as_f64) {
        parts.push(format!("MEM={:.0}%", v * 100.0));
    }

    if !parts.is_empty() {
        return parts.join(" ");
    }

    let compact = Value::Object(data.clone()).to_string();
    compact.chars().take(100).collect()
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn format_duration(total_seconds: i64) -> String {
    if total_seconds < 60 {
        format!("{total_seconds}s")
    } else if total_seconds < 3600 {
        format!("{}m {}s", total_seconds / 60, total_seconds % 60)
    } else {
        format!("{}h {}m", total_seconds / 3600, (total_seconds % 3600) / 60)
    }
}

fn statistics(sorted: &[&Event]) -> Vec<String> {
    let mut stats = Vec::new();

    let collect = |field: &str| -> Vec<f64> {
        sorted
            .iter()
            .filter_map(|e| e.data.get(field).and_then(Value::as_f64))
            .collect()
    };

    let profits = collect("profit");
    if !profits.is_empty() {
        let total: f64 = profits.iter().sum();
        let wins = profits.iter().filter(|v| **v > 0.0).count();
        stats.push(format!("- Total profit: {total:+.2}"));
        stats.push(format!("- Win/Loss: {}/{}", wins, profits.len() - wins));
    }

    let rates = collect("profit_rate");
    if !rates.is_empty() {
        let avg = rates.iter().sum::<f64>() / rates.len() as f64;
        stats.push(format!("- Average profit rate: {:+.1}%", avg * 100.0));
    }

    let prices = collect("price");
    if prices.len() >= 2 {
        let change = (prices[prices.len() - 1] - prices[0]) / prices[0] * 100.0;
        stats.push(format!("- Price change: {change:+.2}%"));
    }

    stats
}
