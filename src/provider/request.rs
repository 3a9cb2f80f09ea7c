use serde_json::Value;

use crate::config::ModelInfo;
use crate::host::ToolDefinition;
use crate::protocol::wire::{
    ChatCompletionRequest, StreamOptions, ThinkingConfig, WireFunction, WireMessage, WireTool,
};

// Request assembly. Caller-supplied sampling options pass a type allow-list;
// anything unknown or mistyped is dropped rather than forwarded, so
// unvalidated host data never leaks into the wire payload.

/// Per-request options handed in by the host.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<Value>,
    /// Free-form sampling extras; only allow-listed keys with well-typed
    /// values survive into the request body.
    pub sampling: serde_json::Map<String, Value>,
}

/// Assemble the outbound request body from validated inputs.
#[must_use]
pub fn build_request(
    model: &ModelInfo,
    messages: Vec<WireMessage>,
    options: &RequestOptions,
    show_reasoning: bool,
    default_max_output: u32,
) -> ChatCompletionRequest {
    let max_tokens = options
        .max_tokens
        .unwrap_or(default_max_output)
        .min(model.max_output);

    let tools = if options.tools.is_empty() {
        None
    } else {
        Some(
            options
                .tools
                .iter()
                .map(|tool| WireTool {
                    type_: "function",
                    function: WireFunction {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: tool.parameters_schema.clone(),
                    },
                })
                .collect(),
        )
    };

    ChatCompletionRequest {
        model: model.id.clone(),
        messages,
        stream: true,
        stream_options: StreamOptions {
            include_usage: true,
        },
        max_tokens,
        temperature: options.temperature.filter(|t| t.is_finite()),
        thinking: show_reasoning.then(ThinkingConfig::enabled),
        stop: options.sampling.get("stop").and_then(sanitize_stop),
        frequency_penalty: finite_number(options.sampling.get("frequency_penalty")),
        presence_penalty: finite_number(options.sampling.get("presence_penalty")),
        tools,
        tool_choice: options.tool_choice.clone().filter(valid_tool_choice),
    }
}

/// `stop` may be a string or an array of strings; everything else is dropped.
fn sanitize_stop(value: &Value) -> Option<Value> {
    match value {
        Value::String(_) => Some(value.clone()),
        Value::Array(items) if items.iter().all(Value::is_string) => Some(value.clone()),
        _ => None,
    }
}

fn finite_number(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64).filter(|n| n.is_finite())
}

fn valid_tool_choice(value: &Value) -> bool {
    match value {
        Value::String(mode) => matches!(mode.as_str(), "auto" | "none" | "required"),
        Value::Object(_) => true,
        _ => false,
    }
}
