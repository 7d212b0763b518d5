//! LLM rule evaluation: client, prompt build, response parse, result cache
//! and trigger-mode scheduling.

pub mod client;
pub mod engine;
pub mod parser;
pub mod prompt;
pub mod sweeper;
pub mod trigger_mode;

pub use client::{LlmBackend, OpenAiClient};
pub use engine::LlmEngine;
pub use parser::{parse_llm_response, LlmDecision};
pub use sweeper::BatchSweeper;
pub use trigger_mode::{TriggerDecision, TriggerModeManager, TriggerModeStore, TriggerOutcome};
