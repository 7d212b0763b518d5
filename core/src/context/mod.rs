//! Context window digestion for LLM prompts.

pub mod summarizer;

pub use summarizer::ContextSummarizer;
