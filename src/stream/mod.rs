pub mod dispatch;
pub mod inline;
pub mod reasoning;
pub mod sse;

pub use dispatch::{TurnControl, TurnDispatcher};
pub use sse::{SseFrame, SseFrameReader};

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;

use crate::host::{OutputEvent, ResponseSink, ToolCall};
use crate::protocol::wire::{PartialToolCall, WireUsage};
use crate::util::{canonical_call_key, synth_call_id};

use inline::{InlineCallScanner, ScanEvent};
use reasoning::ReasoningBuffer;

/// Outcome of parsing an accumulating JSON argument buffer.
///
/// Incompleteness is routine while deltas are still arriving; it must not be
/// conflated with malformed input, so callers branch on the outcome kind
/// instead of catching parse errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Complete(Value),
    Incomplete,
    Invalid,
}

/// Classify an argument buffer as it stands right now.
#[must_use]
pub fn parse_args_buffer(buffer: &str) -> ParseOutcome {
    let trimmed = buffer.trim();
    if trimmed.is_empty() {
        return ParseOutcome::Incomplete;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => ParseOutcome::Complete(value),
        Err(e) if e.is_eof() => ParseOutcome::Incomplete,
        Err(_) => ParseOutcome::Invalid,
    }
}

/// Accumulating state for one structured tool call, keyed by stream index.
#[derive(Debug, Default)]
struct ToolCallBuffer {
    id: Option<String>,
    name: Option<String>,
    args: String,
}

/// All mutable state for one request/response cycle.
///
/// A fresh session is constructed at `provide_response` entry and dropped at
/// exit; nothing here survives across requests, so overlapping calls on the
/// same provider never observe each other's buffers.
pub struct TurnSession {
    tool_buffers: FxHashMap<u32, ToolCallBuffer>,
    completed_indices: FxHashSet<u32>,
    /// Dedup by `name:canonical-json(arguments)`.
    emitted_call_keys: FxHashSet<String>,
    /// Dedup by `name:stream-index` and `name:explicit-id`.
    emitted_call_ids: FxHashSet<String>,
    scanner: InlineCallScanner,
    reasoning: ReasoningBuffer,
    answer_emitted: bool,
    structured_seen: bool,
    usage: Option<WireUsage>,
}

impl TurnSession {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tool_buffers: FxHashMap::default(),
            completed_indices: FxHashSet::default(),
            emitted_call_keys: FxHashSet::default(),
            emitted_call_ids: FxHashSet::default(),
            scanner: InlineCallScanner::new(),
            reasoning: ReasoningBuffer::new(),
            answer_emitted: false,
            structured_seen: false,
            usage: None,
        }
    }

    pub(crate) fn record_usage(&mut self, usage: WireUsage) {
        self.usage = Some(usage);
    }

    #[must_use]
    pub fn usage(&self) -> Option<WireUsage> {
        self.usage
    }

    pub(crate) fn push_reasoning(&mut self, delta: &str) {
        self.reasoning.push(delta);
    }

    /// Render and emit the reasoning block, if any text was buffered.
    pub(crate) fn flush_reasoning(&mut self, sink: &mut dyn ResponseSink) {
        if let Some(block) = self.reasoning.take_block(true) {
            sink.emit(OutputEvent::Text(block));
        }
    }

    /// Feed answer text through the inline scanner and emit the results.
    pub(crate) fn accept_answer_text(&mut self, content: &str, sink: &mut dyn ResponseSink) {
        let mut events = Vec::new();
        self.scanner.feed(content, &mut events);
        self.consume_scan_events(events, sink);
    }

    /// One-shot rendering-flush hint: a single space emitted before the
    /// first structured tool-call delta of the turn, but only when prose has
    /// already been streamed. Without it the host UI coalesces the boundary
    /// between prose and the next tool-call element.
    pub(crate) fn note_structured_deltas(&mut self, sink: &mut dyn ResponseSink) {
        if self.structured_seen {
            return;
        }
        self.structured_seen = true;
        if self.answer_emitted {
            sink.emit(OutputEvent::Text(" ".to_string()));
        }
    }

    /// Route one structured delta into its index buffer and emit the call
    /// the instant the buffer holds a name and valid JSON arguments.
    pub(crate) fn accept_structured_delta(
        &mut self,
        delta: PartialToolCall,
        sink: &mut dyn ResponseSink,
    ) {
        // A completed index repeating is upstream noise, not a new call.
        if self.completed_indices.contains(&delta.index) {
            return;
        }
        let buffer = self.tool_buffers.entry(delta.index).or_default();
        if let Some(id) = delta.id {
            if buffer.id.is_none() {
                buffer.id = Some(id);
            }
        }
        if let Some(function) = delta.function {
            if let Some(fragment) = function.name {
                match buffer.name {
                    Some(ref mut name) => name.push_str(&fragment),
                    None => buffer.name = Some(fragment),
                }
            }
            if let Some(fragment) = function.arguments {
                buffer.args.push_str(&fragment);
            }
        }

        if buffer.name.is_some() {
            if let ParseOutcome::Complete(arguments) = parse_args_buffer(&buffer.args) {
                if let Some(ToolCallBuffer {
                    id,
                    name: Some(name),
                    ..
                }) = self.tool_buffers.remove(&delta.index)
                {
                    self.completed_indices.insert(delta.index);
                    self.try_emit_call(id, name, Some(delta.index), arguments, sink);
                }
            }
        }
    }

    /// Force-flush remaining structured buffers after an explicit finish
    /// reason. The server promised completeness, so a buffer that still does
    /// not parse is a protocol violation.
    pub(crate) fn flush_buffers_strict(
        &mut self,
        sink: &mut dyn ResponseSink,
    ) -> Result<(), crate::error::AdapterError> {
        let mut buffers: Vec<(u32, ToolCallBuffer)> = self.tool_buffers.drain().collect();
        buffers.sort_unstable_by_key(|(index, _)| *index);
        for (index, buffer) in buffers {
            self.completed_indices.insert(index);
            let name = buffer.name.ok_or_else(|| {
                crate::error::AdapterError::Protocol(format!(
                    "tool call at index {index} finished without a name"
                ))
            })?;
            match parse_args_buffer(&buffer.args) {
                ParseOutcome::Complete(arguments) => {
                    self.try_emit_call(buffer.id, name, Some(index), arguments, sink);
                }
                ParseOutcome::Incomplete | ParseOutcome::Invalid => {
                    return Err(crate::error::AdapterError::Protocol(format!(
                        "tool call '{name}' at index {index} finished with invalid argument JSON: {}",
                        buffer.args
                    )));
                }
            }
        }
        Ok(())
    }

    /// Tolerant flush for `[DONE]` or transport end-of-stream: buffers that
    /// parse are emitted, the rest are dropped without error since the
    /// sentinel can legitimately arrive after a connection died mid-call.
    pub(crate) fn flush_tolerant(&mut self, sink: &mut dyn ResponseSink) {
        self.flush_reasoning(sink);

        let mut events = Vec::new();
        self.scanner.finish(&mut events);
        self.consume_scan_events(events, sink);

        let mut buffers: Vec<(u32, ToolCallBuffer)> = self.tool_buffers.drain().collect();
        buffers.sort_unstable_by_key(|(index, _)| *index);
        for (index, buffer) in buffers {
            self.completed_indices.insert(index);
            let Some(name) = buffer.name else {
                continue;
            };
            if let ParseOutcome::Complete(arguments) = parse_args_buffer(&buffer.args) {
                self.try_emit_call(buffer.id, name, Some(index), arguments, sink);
            } else {
                tracing::debug!(name = %name, index, "dropping incomplete tool call at end of turn");
            }
        }
    }

    fn consume_scan_events(&mut self, events: Vec<ScanEvent>, sink: &mut dyn ResponseSink) {
        for event in events {
            match event {
                ScanEvent::Text(text) => self.emit_text(text, sink),
                ScanEvent::Call(call) => {
                    self.try_emit_call(None, call.name, call.stream_index, call.arguments, sink);
                }
            }
        }
    }

    fn emit_text(&mut self, text: String, sink: &mut dyn ResponseSink) {
        if text.is_empty() {
            return;
        }
        self.answer_emitted = true;
        sink.emit(OutputEvent::Text(text));
    }

    /// Emit one logical tool call unless either dedup set has seen it.
    ///
    /// Both the structured path and the inline path land here, so a call the
    /// upstream represents in more than one encoding surfaces exactly once.
    fn try_emit_call(
        &mut self,
        id: Option<String>,
        name: String,
        stream_index: Option<u32>,
        arguments: Value,
        sink: &mut dyn ResponseSink,
    ) -> bool {
        let canonical = canonical_call_key(&name, &arguments);
        let mut id_keys: Vec<String> = Vec::with_capacity(2);
        if let Some(index) = stream_index {
            id_keys.push(format!("{name}:{index}"));
        }
        if let Some(ref explicit) = id {
            id_keys.push(format!("{name}:{explicit}"));
        }

        if self.emitted_call_keys.contains(&canonical)
            || id_keys.iter().any(|k| self.emitted_call_ids.contains(k))
        {
            return false;
        }
        self.emitted_call_keys.insert(canonical);
        for key in id_keys {
            self.emitted_call_ids.insert(key);
        }

        let id = id.unwrap_or_else(synth_call_id);
        sink.emit(OutputEvent::ToolCall(ToolCall {
            id,
            name,
            arguments,
        }));
        true
    }
}

impl Default for TurnSession {
    fn default() -> Self {
        Self::new()
    }
}
