//! End-to-end streaming matrix: raw SSE bytes through the frame reader and
//! the turn dispatcher, with read boundaries placed at every byte offset.

use chatwire::host::OutputEvent;
use chatwire::stream::{SseFrame, SseFrameReader, TurnControl, TurnDispatcher};
use chatwire::AdapterError;
use serde_json::json;

fn sse_frame(value: serde_json::Value) -> String {
    format!("data: {value}\n\n")
}

fn done_frame() -> String {
    "data: [DONE]\n\n".to_string()
}

/// Feed the byte sequence in the given pieces and collect output events.
fn run_pieces(
    pieces: &[&[u8]],
    show_reasoning: bool,
) -> Result<Vec<OutputEvent>, AdapterError> {
    let mut reader = SseFrameReader::new();
    let mut dispatcher = TurnDispatcher::new(show_reasoning);
    let mut sink: Vec<OutputEvent> = Vec::new();
    let mut frames: Vec<SseFrame> = Vec::new();
    let mut done = false;

    for piece in pieces {
        frames.clear();
        reader.feed_bytes(&bytes::Bytes::copy_from_slice(piece), &mut frames);
        for frame in &frames {
            if dispatcher.handle_frame(frame, &mut sink)? == TurnControl::Done {
                done = true;
                break;
            }
        }
        if done {
            break;
        }
    }
    if !done {
        dispatcher.finish(&mut sink);
    }
    Ok(sink)
}

fn texts(events: &[OutputEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            OutputEvent::Text(t) => Some(t.as_str()),
            OutputEvent::ToolCall(_) => None,
        })
        .collect()
}

fn tool_calls(events: &[OutputEvent]) -> Vec<(&str, &serde_json::Value)> {
    events
        .iter()
        .filter_map(|e| match e {
            OutputEvent::ToolCall(c) => Some((c.name.as_str(), &c.arguments)),
            OutputEvent::Text(_) => None,
        })
        .collect()
}

#[test]
fn full_turn_is_invariant_under_every_byte_split() {
    let raw: String = [
        sse_frame(json!({"choices": [{"delta": {"reasoning_content": "plan the lookup"}}]})),
        sse_frame(json!({"choices": [{"delta": {"content": "Check "}}]})),
        sse_frame(json!({"choices": [{"delta": {"content":
            "<tool_call_begin>lookup:0<tool_call_argument_begin>{\"q\":\"x\"}<tool_call_end>"}}]})),
        sse_frame(json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "id": "c1", "function": {"name": "lookup", "arguments": "{\"q\":\"x\"}"}}
        ]}}]})),
        sse_frame(json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]})),
        done_frame(),
    ]
    .concat();
    let bytes = raw.as_bytes();

    let whole = run_pieces(&[bytes], true).unwrap();
    assert_eq!(tool_calls(&whole).len(), 1, "one logical call, two encodings");
    assert!(texts(&whole).contains("plan the lookup"));
    assert!(texts(&whole).contains("Check "));

    for split in 0..=bytes.len() {
        let events = run_pieces(&[&bytes[..split], &bytes[split..]], true).unwrap();
        assert_eq!(events, whole, "split at byte {split}");
    }
}

#[test]
fn control_token_span_split_across_content_deltas() {
    // The inline call sequence sliced into per-delta fragments at every
    // character offset: always exactly one call, never spurious text.
    let span = "<tool_call_begin>foo<tool_call_argument_begin>{\"a\":1}<tool_call_end>";
    for split in 0..=span.len() {
        if !span.is_char_boundary(split) {
            continue;
        }
        let raw: String = [
            sse_frame(json!({"choices": [{"delta": {"content": &span[..split]}}]})),
            sse_frame(json!({"choices": [{"delta": {"content": &span[split..]}}]})),
            done_frame(),
        ]
        .concat();
        let events = run_pieces(&[raw.as_bytes()], false).unwrap();
        let calls = tool_calls(&events);
        assert_eq!(calls.len(), 1, "split at char {split}");
        assert_eq!(calls[0].0, "foo");
        assert_eq!(calls[0].1, &json!({"a": 1}));
        assert_eq!(texts(&events), "", "no spurious text at split {split}");
    }
}

#[test]
fn reasoning_block_precedes_answer_text() {
    let raw: String = [
        sse_frame(json!({"choices": [{"delta": {"reasoning_content": "think "}}]})),
        sse_frame(json!({"choices": [{"delta": {"reasoning_content": "more"}}]})),
        sse_frame(json!({"choices": [{"delta": {"content": "Answer."}}]})),
        done_frame(),
    ]
    .concat();
    let events = run_pieces(&[raw.as_bytes()], true).unwrap();

    assert_eq!(events.len(), 2);
    match &events[0] {
        OutputEvent::Text(block) => {
            assert!(block.starts_with("> **Reasoning**\n"));
            assert!(block.contains("think more"));
            assert!(block.contains("---"));
        }
        other => panic!("expected reasoning block, got {other:?}"),
    }
    assert_eq!(events[1], OutputEvent::Text("Answer.".to_string()));
}

#[test]
fn incomplete_call_at_done_is_dropped_silently() {
    let raw: String = [
        sse_frame(json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "id": "c1", "function": {"name": "lookup", "arguments": "{\"q\":"}}
        ]}}]})),
        done_frame(),
    ]
    .concat();
    let events = run_pieces(&[raw.as_bytes()], false).unwrap();
    assert!(tool_calls(&events).is_empty());
    assert!(texts(&events).is_empty());
}

#[test]
fn incomplete_call_at_explicit_finish_reason_is_an_error() {
    let raw: String = [
        sse_frame(json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "id": "c1", "function": {"name": "lookup", "arguments": "{\"q\":"}}
        ]}}]})),
        sse_frame(json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]})),
    ]
    .concat();
    let result = run_pieces(&[raw.as_bytes()], false);
    assert!(matches!(result, Err(AdapterError::Protocol(_))));
}

#[test]
fn transport_eof_without_done_flushes_like_the_sentinel() {
    let raw: String = [
        sse_frame(json!({"choices": [{"delta": {"content": "partial answer"}}]})),
        sse_frame(json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "id": "c1", "function": {"name": "lookup", "arguments": "{\"done\":true}"}}
        ]}}]})),
    ]
    .concat();
    let events = run_pieces(&[raw.as_bytes()], false).unwrap();
    assert!(texts(&events).contains("partial answer"));
    assert_eq!(tool_calls(&events).len(), 1);
}

#[test]
fn bare_json_line_recognized_end_to_end() {
    let raw: String = [
        sse_frame(json!({"choices": [{"delta": {"content":
            "checking\n{\"name\": \"lookup\", \"arguments\": {\"q\": 1}}\ndone"}}]})),
        done_frame(),
    ]
    .concat();
    let events = run_pieces(&[raw.as_bytes()], false).unwrap();
    assert_eq!(texts(&events), "checking\ndone");
    let calls = tool_calls(&events);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, &json!({"q": 1}));
}

#[test]
fn rendering_hint_between_prose_and_structured_call() {
    let raw: String = [
        sse_frame(json!({"choices": [{"delta": {"content": "Let me check "}}]})),
        sse_frame(json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "id": "c1", "function": {"name": "lookup", "arguments": ""}}
        ]}}]})),
        sse_frame(json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "function": {"arguments": "{\"q\":\"x\"}"}}
        ]}}]})),
        sse_frame(json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]})),
        done_frame(),
    ]
    .concat();
    let events = run_pieces(&[raw.as_bytes()], false).unwrap();
    assert_eq!(
        events,
        vec![
            OutputEvent::Text("Let me check ".to_string()),
            OutputEvent::Text(" ".to_string()),
            OutputEvent::ToolCall(chatwire::ToolCall {
                id: "c1".to_string(),
                name: "lookup".to_string(),
                arguments: json!({"q": "x"}),
            }),
        ]
    );
}

#[test]
fn malformed_frames_and_keepalives_are_skipped() {
    let raw: String = [
        ": keepalive comment\n\n".to_string(),
        "data: {broken json\n\n".to_string(),
        sse_frame(json!({"choices": [{"delta": {"content": "fine"}}]})),
        done_frame(),
    ]
    .concat();
    let events = run_pieces(&[raw.as_bytes()], false).unwrap();
    assert_eq!(texts(&events), "fine");
}

#[test]
fn repeated_finished_call_is_not_emitted_twice() {
    let call = json!({"index": 0, "id": "c1",
        "function": {"name": "lookup", "arguments": "{\"q\":1}"}});
    let raw: String = [
        sse_frame(json!({"choices": [{"delta": {"tool_calls": [call.clone()]}}]})),
        sse_frame(json!({"choices": [{"delta": {"tool_calls": [call]}}]})),
        done_frame(),
    ]
    .concat();
    let events = run_pieces(&[raw.as_bytes()], false).unwrap();
    assert_eq!(tool_calls(&events).len(), 1);
}
