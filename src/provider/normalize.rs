use base64::Engine;

use crate::host::{ChatMessage, ContentPart};
use crate::protocol::wire::{
    WireContent, WireImageUrl, WireMessage, WirePart, WireToolCall, WireToolCallFunction,
};
use crate::util::synth_call_id;

// Message normalization: host messages in, wire messages out.
//
// Best-effort by design: nothing in here throws. Parts that cannot be
// represented on the wire (an image without usable bytes) are dropped rather
// than sent empty, and a message that ends up with no content at all gets a
// placeholder literal because the upstream rejects empty content.

const EMPTY_CONTENT_PLACEHOLDER: &str = "(empty message)";

/// Normalize the full host message list into the wire representation.
#[must_use]
pub fn normalize_messages(messages: &[ChatMessage]) -> Vec<WireMessage> {
    messages.iter().map(normalize_message).collect()
}

fn normalize_message(message: &ChatMessage) -> WireMessage {
    let mut text = String::new();
    let mut images: Vec<String> = Vec::new();
    let mut tool_calls: Vec<WireToolCall> = Vec::new();
    let mut tool_call_id: Option<String> = None;

    for part in &message.content {
        match part {
            ContentPart::Text(t) => text.push_str(t),
            ContentPart::ImageUrl { url } => {
                if image_data_url_is_sendable(url) {
                    images.push(url.clone());
                }
            }
            ContentPart::ToolCall(call) => {
                let id = if call.id.is_empty() {
                    synth_call_id()
                } else {
                    call.id.clone()
                };
                let arguments =
                    serde_json::to_string(&call.arguments).unwrap_or_else(|_| "{}".to_string());
                tool_calls.push(WireToolCall {
                    id,
                    type_: "function",
                    function: WireToolCallFunction {
                        name: call.name.clone(),
                        arguments,
                    },
                });
            }
            ContentPart::ToolResult { call_id, content } => {
                // The wire protocol carries tool results as role="tool"
                // messages with string content, not as a separate part type.
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(content);
                if tool_call_id.is_none() {
                    tool_call_id = Some(call_id.clone());
                }
            }
        }
    }

    let content = if images.is_empty() {
        if text.is_empty() {
            WireContent::Text(EMPTY_CONTENT_PLACEHOLDER.to_string())
        } else {
            WireContent::Text(text)
        }
    } else {
        let mut parts: Vec<WirePart> = Vec::with_capacity(1 + images.len());
        if !text.is_empty() {
            parts.push(WirePart::Text { text });
        }
        for url in images {
            parts.push(WirePart::ImageUrl {
                image_url: WireImageUrl { url },
            });
        }
        WireContent::Parts(parts)
    };

    WireMessage {
        role: message.role.as_wire(),
        content,
        name: message.name.clone(),
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
        tool_call_id,
    }
}

/// An outbound image must be a data URL with an `image/*` MIME type and a
/// non-empty base64 payload that actually decodes.
fn image_data_url_is_sendable(url: &str) -> bool {
    let Some(rest) = url.strip_prefix("data:image/") else {
        return false;
    };
    let Some((_, payload)) = rest.split_once(";base64,") else {
        return false;
    };
    if payload.is_empty() {
        return false;
    }
    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map(|bytes| !bytes.is_empty())
        .unwrap_or(false)
}
