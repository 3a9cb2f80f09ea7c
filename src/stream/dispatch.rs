use crate::error::AdapterError;
use crate::host::ResponseSink;
use crate::protocol::wire::{StreamChunk, WireUsage};

use super::sse::SseFrame;
use super::TurnSession;

/// Whether the turn continues after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnControl {
    Continue,
    Done,
}

/// Routes decoded stream events to the reasoning buffer, the inline text
/// scanner, and the structured tool-call buffers, and decides when the turn
/// is finished.
///
/// Only `choices[0]` is honored; multi-choice responses are not supported.
/// The handling order within one event is a correctness invariant: reasoning
/// is buffered first, a pending reasoning block is flushed before any answer
/// text so it always visually precedes the answer, and structured deltas are
/// processed after text so the rendering-flush hint lands between prose and
/// the first tool-call element.
pub struct TurnDispatcher {
    session: TurnSession,
    show_reasoning: bool,
    finished: bool,
}

impl TurnDispatcher {
    #[must_use]
    pub fn new(show_reasoning: bool) -> Self {
        Self {
            session: TurnSession::new(),
            show_reasoning,
            finished: false,
        }
    }

    /// Handle one SSE frame.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Protocol`] when an explicit finish reason
    /// leaves a tool-call buffer with invalid argument JSON. Frames that do
    /// not decode as JSON are skipped, not fatal.
    pub fn handle_frame(
        &mut self,
        frame: &SseFrame,
        sink: &mut dyn ResponseSink,
    ) -> Result<TurnControl, AdapterError> {
        match frame {
            SseFrame::Done => {
                self.flush_end_of_turn(sink);
                Ok(TurnControl::Done)
            }
            SseFrame::Data(payload) => {
                let Ok(chunk) = serde_json::from_str::<StreamChunk>(payload) else {
                    tracing::debug!("skipping undecodable stream frame");
                    return Ok(TurnControl::Continue);
                };
                self.handle_chunk(chunk, sink)?;
                Ok(TurnControl::Continue)
            }
        }
    }

    fn handle_chunk(
        &mut self,
        chunk: StreamChunk,
        sink: &mut dyn ResponseSink,
    ) -> Result<(), AdapterError> {
        if let Some(usage) = chunk.usage {
            self.session.record_usage(usage);
        }
        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(());
        };

        if let Some(reasoning) = choice.delta.reasoning_content {
            if self.show_reasoning && !reasoning.is_empty() {
                self.session.push_reasoning(&reasoning);
            }
        }

        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                self.session.flush_reasoning(sink);
                self.session.accept_answer_text(&content, sink);
            }
        }

        if let Some(tool_calls) = choice.delta.tool_calls {
            if !tool_calls.is_empty() {
                self.session.note_structured_deltas(sink);
            }
            for delta in tool_calls {
                self.session.accept_structured_delta(delta, sink);
            }
        }

        if let Some(reason) = choice.finish_reason {
            if reason == "tool_calls" || reason == "stop" {
                self.session.flush_buffers_strict(sink)?;
            }
        }

        Ok(())
    }

    /// Flush all buffered sub-state at transport end-of-stream when no
    /// `[DONE]` sentinel was seen. Same tolerance as the sentinel path.
    pub fn finish(&mut self, sink: &mut dyn ResponseSink) {
        self.flush_end_of_turn(sink);
    }

    fn flush_end_of_turn(&mut self, sink: &mut dyn ResponseSink) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.session.flush_tolerant(sink);
    }

    /// Upstream-reported usage, when any chunk carried it.
    #[must_use]
    pub fn usage(&self) -> Option<WireUsage> {
        self.session.usage()
    }
}
