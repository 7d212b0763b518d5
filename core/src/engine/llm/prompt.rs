//! Prompt templates for LLM rule evaluation.

/// Fixed instructions; the model must answer with a single JSON object.
pub const SYSTEM_PROMPT: &str = r#"You are a professional event analysis assistant. Your task is to analyze events and determine whether they match user-defined rules.

You will receive:
1. A user-defined rule description
2. Historical context (recent events in a time window)
3. Current event data

Based on this information, you need to:
1. Analyze whether the current event (combined with historical context) satisfies the user's rule
2. Provide a confidence score (0.0 to 1.0)
3. Explain your reasoning

Always respond in JSON format with the following structure:
{
  "should_trigger": true/false,
  "confidence": 0.0-1.0,
  "reason": "Detailed explanation of your decision"
}

Important guidelines:
- Be conservative: only trigger when you are reasonably confident (confidence >= 0.7)
- Consider temporal patterns when the rule involves sequences or trends
- Use specific data from the events to support your reasoning
- If the data is insufficient to make a determination, set should_trigger to false
"#;

/// Render the user payload: rule description, context digest, current event.
pub fn build_user_prompt(
    rule_description: &str,
    context_summary: &str,
    event_type: &str,
    event_timestamp: &str,
    event_data: &str,
) -> String {
    let context_summary = if context_summary.is_empty() {
        "No historical events in context window."
    } else {
        context_summary
    };
    format!(
        "## User Rule\n{rule_description}\n\n\
         ## Historical Context\n{context_summary}\n\n\
         ## Current Event\n\
         Type: {event_type}\n\
         Time: {event_timestamp}\n\
         Data: {event_data}\n\n\
         Please analyze whether this event satisfies the user's rule. Respond in JSON format."
    )
}
