use serde_json::Value;

// Host-facing message model.
//
// The host editor hands us messages in whatever shape its extension API uses;
// one adapter layer converts that into the closed types below, and nothing
// past this boundary inspects foreign shapes again. Content parts are a
// tagged enum on purpose: the old duck-typed "does this look like an image?"
// probing lives in exactly one place (`ContentPart::from_host_value`).

/// Message role as the host and the wire protocol understand it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    #[must_use]
    pub fn as_wire(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

/// One typed part of a message body.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    /// A data URL embedding base64 bytes and a MIME type.
    ImageUrl { url: String },
    ToolCall(ToolCall),
    ToolResult { call_id: String, content: String },
}

/// A tool invocation with fully parsed arguments.
///
/// `arguments` is always syntactically valid JSON by the time a call crosses
/// this boundary; partial buffers are held inside the stream layer and never
/// surfaced.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// A chat message as received from the host.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentPart>,
    pub name: Option<String>,
}

impl ChatMessage {
    #[must_use]
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::Text(text.into())],
            name: None,
        }
    }

    /// True when any part carries image content.
    #[must_use]
    pub fn has_image(&self) -> bool {
        self.content
            .iter()
            .any(|p| matches!(p, ContentPart::ImageUrl { .. }))
    }
}

impl ContentPart {
    /// Best-effort translation of a host-provided dynamic part value.
    ///
    /// Malformed or foreign shapes yield `None` and are treated as absent;
    /// the host's part representation evolves faster than we want to chase.
    #[must_use]
    pub fn from_host_value(value: &Value) -> Option<Self> {
        let kind = value.get("type").and_then(Value::as_str)?;
        match kind {
            "text" => {
                let text = value.get("text").and_then(Value::as_str)?;
                Some(ContentPart::Text(text.to_string()))
            }
            "image_url" => {
                let url = value
                    .get("image_url")
                    .and_then(|i| i.get("url"))
                    .and_then(Value::as_str)?;
                Some(ContentPart::ImageUrl {
                    url: url.to_string(),
                })
            }
            "tool_call" => {
                let name = value.get("name").and_then(Value::as_str)?;
                let arguments = value.get("arguments").cloned().unwrap_or(Value::Null);
                let arguments = match arguments {
                    Value::String(raw) => serde_json::from_str(&raw).ok()?,
                    Value::Null => Value::Object(serde_json::Map::new()),
                    other => other,
                };
                let id = value
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_default();
                Some(ContentPart::ToolCall(ToolCall {
                    id,
                    name: name.to_string(),
                    arguments,
                }))
            }
            "tool_result" => {
                let call_id = value.get("call_id").and_then(Value::as_str)?;
                let content = match value.get("content") {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                Some(ContentPart::ToolResult {
                    call_id: call_id.to_string(),
                    content,
                })
            }
            _ => None,
        }
    }
}

/// A host-supplied tool definition, passed through to the wire after
/// validation.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: Option<String>,
    pub parameters_schema: Value,
}

/// Output events pushed to the host's progress sink.
///
/// End-of-turn is implicit: `provide_response` returning is the turn
/// boundary, not a distinct event.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    Text(String),
    ToolCall(ToolCall),
}

/// The host's progress sink.
pub trait ResponseSink: Send {
    fn emit(&mut self, event: OutputEvent);
}

impl ResponseSink for Vec<OutputEvent> {
    fn emit(&mut self, event: OutputEvent) {
        self.push(event);
    }
}

/// External captioning collaborator used by the vision fallback path when a
/// model cannot accept image input and no vision-capable reroute exists.
#[async_trait::async_trait]
pub trait ImageCaptioner: Send + Sync {
    /// Produce a text description for one image data URL.
    async fn caption(&self, image_url: &str) -> Result<String, crate::error::AdapterError>;
}
