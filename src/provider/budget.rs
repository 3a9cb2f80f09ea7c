use crate::config::ModelInfo;
use crate::error::AdapterError;
use crate::host::{ChatMessage, ContentPart, ToolDefinition};

// Request budgeting. Token counts are a documented heuristic (length/4 plus
// a flat per-image charge), not a tokenizer; the point is rejecting clearly
// oversized requests before any network I/O, as a pure function of the
// request and static model metadata.

/// A request may declare at most this many tool definitions.
pub const MAX_TOOL_DEFINITIONS: usize = 128;

/// Flat charge per image part; images are not text-length-proportional.
const IMAGE_TOKEN_COST: u64 = 1500;

/// `ceil(len/4)` token estimate for raw text.
#[must_use]
pub fn estimate_text_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Estimated token cost of one message across its text-bearing parts plus
/// the per-image charge.
#[must_use]
pub fn estimate_message_tokens(message: &ChatMessage) -> u64 {
    let mut total = 0u64;
    for part in &message.content {
        match part {
            ContentPart::Text(text) => total += estimate_text_tokens(text),
            ContentPart::ToolResult { content, .. } => total += estimate_text_tokens(content),
            ContentPart::ToolCall(call) => {
                total += estimate_text_tokens(&call.name);
                if let Ok(serialized) = serde_json::to_string(&call.arguments) {
                    total += estimate_text_tokens(&serialized);
                }
            }
            ContentPart::ImageUrl { .. } => total += IMAGE_TOKEN_COST,
        }
    }
    total
}

#[must_use]
pub fn estimate_messages_tokens(messages: &[ChatMessage]) -> u64 {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Estimated token cost of the tool schema block, via its JSON serialization.
#[must_use]
pub fn estimate_tool_tokens(tools: &[ToolDefinition]) -> u64 {
    if tools.is_empty() {
        return 0;
    }
    let mut total = 0u64;
    for tool in tools {
        total += estimate_text_tokens(&tool.name);
        if let Some(ref description) = tool.description {
            total += estimate_text_tokens(description);
        }
        if let Ok(serialized) = serde_json::to_string(&tool.parameters_schema) {
            total += estimate_text_tokens(&serialized);
        }
    }
    total
}

/// Validate a request against structural rules and the model's input budget.
///
/// # Errors
///
/// Returns [`AdapterError::InvalidRequest`] for an empty message list, a
/// message with zero content parts, more than [`MAX_TOOL_DEFINITIONS`] tool
/// definitions, or an estimated input exceeding
/// `context_window - max_output`. All checks run before network I/O.
pub fn validate_request(
    messages: &[ChatMessage],
    tools: &[ToolDefinition],
    model: &ModelInfo,
) -> Result<(), AdapterError> {
    if messages.is_empty() {
        return Err(AdapterError::InvalidRequest(
            "message list is empty".to_string(),
        ));
    }
    for (i, message) in messages.iter().enumerate() {
        if message.content.is_empty() {
            return Err(AdapterError::InvalidRequest(format!(
                "message {i} has no content parts"
            )));
        }
    }
    if tools.len() > MAX_TOOL_DEFINITIONS {
        return Err(AdapterError::InvalidRequest(format!(
            "{} tool definitions declared, the maximum is {MAX_TOOL_DEFINITIONS}",
            tools.len()
        )));
    }

    let message_tokens = estimate_messages_tokens(messages);
    let tool_tokens = estimate_tool_tokens(tools);
    let input_budget = u64::from(model.context_window) - u64::from(model.max_output);
    if message_tokens + tool_tokens > input_budget {
        return Err(AdapterError::InvalidRequest(format!(
            "estimated input of {} tokens ({message_tokens} message + {tool_tokens} tool) \
             exceeds the {input_budget}-token budget of model '{}' \
             (context {} minus output {})",
            message_tokens + tool_tokens,
            model.id,
            model.context_window,
            model.max_output
        )));
    }
    Ok(())
}
