use std::sync::LazyLock;

use regex_lite::Regex;
use serde_json::Value;

use super::{parse_args_buffer, ParseOutcome};

// Streaming inline tool-call scanner.
//
// Besides structured deltas, the upstream can encode tool calls directly in
// the answer-text channel, either as a control-token-delimited span
//
//   <tool_call_begin>name[:index]<tool_call_argument_begin>{...}<tool_call_end>
//
// or as a bare JSON object occupying a whole text line. The scanner is a
// small state machine over incoming text fragments; a carryover buffer holds
// any fragment tail that could be the prefix of a control token, so a token
// split across two network reads is still recognized.
//
// Key invariants:
// - Splitting the input at any character offset never changes which calls
//   are recognized or what visible text is produced.
// - A call emitted opportunistically (its argument buffer parsed early) is
//   not emitted again when its end token arrives.
// - Internal buffering is capped; overflow flushes everything as plain text
//   and disables scanning for the rest of the turn.

const CALL_BEGIN: &str = "<tool_call_begin>";
const ARG_BEGIN: &str = "<tool_call_argument_begin>";
const CALL_END: &str = "<tool_call_end>";
const SECTION_BEGIN: &str = "<tool_calls_begin>";
const SECTION_END: &str = "<tool_calls_end>";
const CALL_SEP: &str = "<tool_call_sep>";

/// Tokens stripped from visible text when they appear outside a call span.
const STRIP_TOKENS: &[&str] = &[SECTION_BEGIN, SECTION_END, CALL_SEP, ARG_BEGIN, CALL_END];

/// Every token whose prefix must be held back across a chunk boundary.
const KNOWN_TOKENS: &[&str] = &[
    CALL_BEGIN,
    ARG_BEGIN,
    CALL_END,
    SECTION_BEGIN,
    SECTION_END,
    CALL_SEP,
];

const MAX_HEADER_LEN: usize = 512;
const MAX_ARGS_LEN: usize = 1024 * 1024;

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z0-9_.\-]+)(?::([0-9]+))?\s*$").expect("static header pattern")
});

/// State of the scanner state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Looking for the begin token in visible text.
    Scanning,
    /// Between the begin token and the argument-begin or end token.
    InHeader,
    /// Accumulating argument text for an active call.
    AccumulatingArgs,
}

/// One recognized inline tool call, before deduplication.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineCall {
    pub name: String,
    pub stream_index: Option<u32>,
    pub arguments: Value,
}

/// Output of one scanner step.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// Visible answer text, control tokens stripped.
    Text(String),
    /// A recognized tool call.
    Call(InlineCall),
}

struct ActiveCall {
    name: String,
    stream_index: Option<u32>,
    args: String,
    emitted: bool,
}

pub struct InlineCallScanner {
    state: ScanState,
    carryover: String,
    header: String,
    active: Option<ActiveCall>,
    /// Overflow fallback: everything passes through verbatim.
    disabled: bool,
}

impl InlineCallScanner {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ScanState::Scanning,
            carryover: String::new(),
            header: String::new(),
            active: None,
            disabled: false,
        }
    }

    /// Feed one raw answer-text fragment and append scan events to `out`.
    pub fn feed(&mut self, chunk: &str, out: &mut Vec<ScanEvent>) {
        if self.disabled {
            if !chunk.is_empty() {
                out.push(ScanEvent::Text(chunk.to_string()));
            }
            return;
        }

        let mut buf = std::mem::take(&mut self.carryover);
        buf.push_str(chunk);
        let mut pos = 0usize;

        loop {
            match self.state {
                ScanState::Scanning => {
                    let rest = &buf[pos..];
                    if let Some(i) = rest.find(CALL_BEGIN) {
                        flush_visible_text(&rest[..i], out);
                        pos += i + CALL_BEGIN.len();
                        self.header.clear();
                        self.state = ScanState::InHeader;
                    } else {
                        let held = partial_token_suffix(rest);
                        let safe_end = rest.len() - held;
                        flush_visible_text(&rest[..safe_end], out);
                        self.carryover = rest[safe_end..].to_string();
                        return;
                    }
                }
                ScanState::InHeader => {
                    let rest = &buf[pos..];
                    let arg_at = rest.find(ARG_BEGIN);
                    let end_at = rest.find(CALL_END);
                    match (arg_at, end_at) {
                        (Some(a), e) if e.map_or(true, |e| a < e) => {
                            self.header.push_str(&rest[..a]);
                            pos += a + ARG_BEGIN.len();
                            match parse_call_header(&self.header) {
                                Some((name, stream_index)) => {
                                    self.active = Some(ActiveCall {
                                        name,
                                        stream_index,
                                        args: String::new(),
                                        emitted: false,
                                    });
                                    self.state = ScanState::AccumulatingArgs;
                                }
                                None => {
                                    // Not a call header after all; surface the
                                    // span verbatim and resume scanning.
                                    let mut text = String::from(CALL_BEGIN);
                                    text.push_str(&self.header);
                                    text.push_str(ARG_BEGIN);
                                    out.push(ScanEvent::Text(text));
                                    self.state = ScanState::Scanning;
                                }
                            }
                        }
                        (_, Some(e)) => {
                            // End token directly after the header: a
                            // zero-argument call.
                            self.header.push_str(&rest[..e]);
                            pos += e + CALL_END.len();
                            match parse_call_header(&self.header) {
                                Some((name, stream_index)) => {
                                    out.push(ScanEvent::Call(InlineCall {
                                        name,
                                        stream_index,
                                        arguments: Value::Object(serde_json::Map::new()),
                                    }));
                                }
                                None => {
                                    let mut text = String::from(CALL_BEGIN);
                                    text.push_str(&self.header);
                                    text.push_str(CALL_END);
                                    out.push(ScanEvent::Text(text));
                                }
                            }
                            self.state = ScanState::Scanning;
                        }
                        (_, None) => {
                            let held = partial_token_suffix(rest);
                            self.header.push_str(&rest[..rest.len() - held]);
                            self.carryover = rest[rest.len() - held..].to_string();
                            if self.header.len() > MAX_HEADER_LEN {
                                self.overflow(out);
                            }
                            return;
                        }
                    }
                }
                ScanState::AccumulatingArgs => {
                    // The state machine only enters this arm with an active
                    // call; a bare reset covers the unreachable mismatch.
                    let Some(active) = self.active.as_mut() else {
                        self.state = ScanState::Scanning;
                        continue;
                    };
                    let rest = &buf[pos..];
                    if let Some(i) = rest.find(CALL_END) {
                        active.args.push_str(&rest[..i]);
                        pos += i + CALL_END.len();
                        self.close_active_call(out);
                        self.state = ScanState::Scanning;
                    } else {
                        let held = partial_token_suffix(rest);
                        active.args.push_str(&rest[..rest.len() - held]);
                        self.carryover = rest[rest.len() - held..].to_string();
                        // Mirror the eagerness of the structured path: a
                        // buffer that already parses is emitted immediately.
                        if !active.emitted {
                            if let ParseOutcome::Complete(arguments) =
                                parse_args_buffer(&active.args)
                            {
                                out.push(ScanEvent::Call(InlineCall {
                                    name: active.name.clone(),
                                    stream_index: active.stream_index,
                                    arguments,
                                }));
                                active.emitted = true;
                            }
                        }
                        if active.args.len() > MAX_ARGS_LEN {
                            self.overflow(out);
                        }
                        return;
                    }
                }
            }
        }
    }

    /// Flush at turn end.
    ///
    /// An active call whose buffer now parses is emitted; anything else that
    /// was mid-parse is dropped silently, matching the `[DONE]` tolerance of
    /// the frame reader. Held-back text that never became a token is
    /// surfaced as plain text.
    pub fn finish(&mut self, out: &mut Vec<ScanEvent>) {
        match self.state {
            ScanState::Scanning => {
                let remaining = std::mem::take(&mut self.carryover);
                flush_visible_text(&remaining, out);
            }
            ScanState::InHeader => {
                self.carryover.clear();
                self.header.clear();
            }
            ScanState::AccumulatingArgs => {
                self.carryover.clear();
                if let Some(active) = self.active.take() {
                    if !active.emitted && !active.args.is_empty() {
                        if let ParseOutcome::Complete(arguments) = parse_args_buffer(&active.args) {
                            out.push(ScanEvent::Call(InlineCall {
                                name: active.name,
                                stream_index: active.stream_index,
                                arguments,
                            }));
                        }
                    }
                }
            }
        }
        self.state = ScanState::Scanning;
    }

    /// Buffer limit exceeded: reconstruct everything buffered as plain text
    /// and stop scanning for the rest of the turn so the host is not starved.
    fn overflow(&mut self, out: &mut Vec<ScanEvent>) {
        let mut text = String::from(CALL_BEGIN);
        text.push_str(&self.header);
        if let Some(active) = self.active.take() {
            text.push_str(ARG_BEGIN);
            text.push_str(&active.args);
        }
        text.push_str(&self.carryover);
        self.carryover.clear();
        self.header.clear();
        out.push(ScanEvent::Text(text));
        self.disabled = true;
        self.state = ScanState::Scanning;
    }

    fn close_active_call(&mut self, out: &mut Vec<ScanEvent>) {
        let Some(active) = self.active.take() else {
            return;
        };
        if active.emitted {
            return;
        }
        if active.args.trim().is_empty() {
            out.push(ScanEvent::Call(InlineCall {
                name: active.name,
                stream_index: active.stream_index,
                arguments: Value::Object(serde_json::Map::new()),
            }));
            return;
        }
        if let ParseOutcome::Complete(arguments) = parse_args_buffer(&active.args) {
            out.push(ScanEvent::Call(InlineCall {
                name: active.name,
                stream_index: active.stream_index,
                arguments,
            }));
        }
        // A delimited span whose arguments never became valid JSON is
        // consumed without emission; the server closed the span itself, so
        // surfacing garbage text would duplicate the model's intent.
    }
}

impl Default for InlineCallScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse `name[:index]` between the begin token and the next delimiter.
fn parse_call_header(header: &str) -> Option<(String, Option<u32>)> {
    let captures = HEADER_RE.captures(header)?;
    let name = captures.get(1)?.as_str().to_string();
    let stream_index = match captures.get(2) {
        Some(m) => Some(m.as_str().parse::<u32>().ok()?),
        None => None,
    };
    Some((name, stream_index))
}

/// Length of the longest buffer suffix that is a proper prefix of a known
/// control token. That suffix must be held back until the next fragment
/// resolves it one way or the other.
fn partial_token_suffix(buf: &str) -> usize {
    let max_held = KNOWN_TOKENS
        .iter()
        .map(|t| t.len() - 1)
        .max()
        .unwrap_or(0)
        .min(buf.len());
    for k in (1..=max_held).rev() {
        if !buf.is_char_boundary(buf.len() - k) {
            continue;
        }
        let suffix = &buf[buf.len() - k..];
        if KNOWN_TOKENS
            .iter()
            .any(|t| t.len() > k && t.starts_with(suffix))
        {
            return k;
        }
    }
    0
}

/// Emit a visible-text region: strip stray control tokens, then try each
/// complete line as a bare-JSON tool call. Recognized lines are consumed;
/// everything else passes through in order.
fn flush_visible_text(text: &str, out: &mut Vec<ScanEvent>) {
    if text.is_empty() {
        return;
    }
    let stripped = strip_control_tokens(text);
    if stripped.is_empty() {
        return;
    }

    let mut plain = String::new();
    let mut rest = stripped.as_str();
    while !rest.is_empty() {
        let (line, tail, terminator) = match rest.find('\n') {
            Some(i) => (&rest[..i], &rest[i + 1..], true),
            None => (rest, "", false),
        };
        match recognize_bare_json_call(line) {
            Some(call) => {
                if !plain.is_empty() {
                    out.push(ScanEvent::Text(std::mem::take(&mut plain)));
                }
                out.push(ScanEvent::Call(call));
            }
            None => {
                plain.push_str(line);
                if terminator {
                    plain.push('\n');
                }
            }
        }
        rest = tail;
    }
    if !plain.is_empty() {
        out.push(ScanEvent::Text(plain));
    }
}

fn strip_control_tokens(text: &str) -> String {
    let mut out = text.to_string();
    for token in STRIP_TOKENS {
        if out.contains(token) {
            out = out.replace(token, "");
        }
    }
    out
}

/// Recognize a standalone JSON-object line encoding a tool call: either
/// `{"name": ..., "arguments": ...}` or `{"function": {"name": ...,
/// "arguments": ...}}`, with arguments given as an object or as a
/// JSON-encoded string.
fn recognize_bare_json_call(line: &str) -> Option<InlineCall> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') || !trimmed.ends_with('}') {
        return None;
    }
    let value: Value = serde_json::from_str(trimmed).ok()?;

    let container = match value.get("name") {
        Some(_) => &value,
        None => value.get("function")?,
    };
    let name = container.get("name")?.as_str()?.to_string();
    let arguments = match container.get("arguments")? {
        Value::Object(map) => Value::Object(map.clone()),
        Value::String(raw) => {
            let parsed: Value = serde_json::from_str(raw).ok()?;
            if !parsed.is_object() {
                return None;
            }
            parsed
        }
        _ => return None,
    };
    Some(InlineCall {
        name,
        stream_index: None,
        arguments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feed_all(scanner: &mut InlineCallScanner, chunks: &[&str]) -> Vec<ScanEvent> {
        let mut out = Vec::new();
        for chunk in chunks {
            scanner.feed(chunk, &mut out);
        }
        scanner.finish(&mut out);
        out
    }

    /// Collapse adjacent text events so chunking granularity does not affect
    /// comparisons.
    fn normalize(events: &[ScanEvent]) -> (String, Vec<InlineCall>) {
        let mut text = String::new();
        let mut calls = Vec::new();
        for event in events {
            match event {
                ScanEvent::Text(t) => text.push_str(t),
                ScanEvent::Call(c) => calls.push(c.clone()),
            }
        }
        (text, calls)
    }

    #[test]
    fn plain_text_passes_through() {
        let mut scanner = InlineCallScanner::new();
        let events = feed_all(&mut scanner, &["Hello, world."]);
        assert_eq!(events, vec![ScanEvent::Text("Hello, world.".to_string())]);
    }

    #[test]
    fn delimited_call_in_single_chunk() {
        let mut scanner = InlineCallScanner::new();
        let events = feed_all(
            &mut scanner,
            &["pre <tool_call_begin>foo<tool_call_argument_begin>{\"a\":1}<tool_call_end> post"],
        );
        let (text, calls) = normalize(&events);
        assert_eq!(text, "pre  post");
        assert_eq!(
            calls,
            vec![InlineCall {
                name: "foo".to_string(),
                stream_index: None,
                arguments: json!({"a": 1}),
            }]
        );
    }

    #[test]
    fn header_stream_index_is_parsed() {
        let mut scanner = InlineCallScanner::new();
        let events = feed_all(
            &mut scanner,
            &["<tool_call_begin>foo:3<tool_call_argument_begin>{}<tool_call_end>"],
        );
        let (_, calls) = normalize(&events);
        assert_eq!(calls[0].stream_index, Some(3));
    }

    #[test]
    fn zero_argument_call_emits_empty_object() {
        let mut scanner = InlineCallScanner::new();
        let events = feed_all(&mut scanner, &["<tool_call_begin>ping<tool_call_end>"]);
        let (text, calls) = normalize(&events);
        assert!(text.is_empty());
        assert_eq!(calls[0].name, "ping");
        assert_eq!(calls[0].arguments, json!({}));
    }

    #[test]
    fn split_at_every_char_offset_is_invariant() {
        let raw = "<tool_call_begin>foo<tool_call_argument_begin>{\"a\":1}<tool_call_end>";
        for split in 0..=raw.len() {
            if !raw.is_char_boundary(split) {
                continue;
            }
            let mut scanner = InlineCallScanner::new();
            let events = feed_all(&mut scanner, &[&raw[..split], &raw[split..]]);
            let (text, calls) = normalize(&events);
            assert_eq!(text, "", "split at {split}");
            assert_eq!(calls.len(), 1, "split at {split}");
            assert_eq!(calls[0].name, "foo");
            assert_eq!(calls[0].arguments, json!({"a": 1}));
        }
    }

    #[test]
    fn token_prefix_without_token_is_plain_text() {
        let mut scanner = InlineCallScanner::new();
        let events = feed_all(&mut scanner, &["a <tool_call_b", "oring remark"]);
        let (text, calls) = normalize(&events);
        assert_eq!(text, "a <tool_call_boring remark");
        assert!(calls.is_empty());
    }

    #[test]
    fn held_prefix_is_flushed_as_text_at_turn_end() {
        let mut scanner = InlineCallScanner::new();
        let events = feed_all(&mut scanner, &["tail <tool_call_beg"]);
        let (text, calls) = normalize(&events);
        assert_eq!(text, "tail <tool_call_beg");
        assert!(calls.is_empty());
    }

    #[test]
    fn early_emit_is_not_duplicated_at_end_token() {
        let mut scanner = InlineCallScanner::new();
        let mut out = Vec::new();
        scanner.feed(
            "<tool_call_begin>foo<tool_call_argument_begin>{\"a\":1}",
            &mut out,
        );
        let calls_before_end = out
            .iter()
            .filter(|e| matches!(e, ScanEvent::Call(_)))
            .count();
        assert_eq!(calls_before_end, 1, "opportunistic emit on valid buffer");
        scanner.feed("<tool_call_end> done", &mut out);
        scanner.finish(&mut out);
        let (text, calls) = normalize(&out);
        assert_eq!(calls.len(), 1);
        assert_eq!(text, " done");
    }

    #[test]
    fn incomplete_arguments_at_turn_end_are_dropped() {
        let mut scanner = InlineCallScanner::new();
        let events = feed_all(
            &mut scanner,
            &["<tool_call_begin>foo<tool_call_argument_begin>{\"a\":"],
        );
        let (text, calls) = normalize(&events);
        assert!(text.is_empty());
        assert!(calls.is_empty());
    }

    #[test]
    fn complete_arguments_at_turn_end_are_emitted() {
        let mut scanner = InlineCallScanner::new();
        // No end token, but the buffer parses: the forced flush emits it.
        let mut out = Vec::new();
        scanner.feed("<tool_call_begin>foo<tool_call_argument_begin>", &mut out);
        scanner.feed("{\"done\"", &mut out);
        scanner.feed(":true}", &mut out);
        scanner.finish(&mut out);
        let (_, calls) = normalize(&out);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, json!({"done": true}));
    }

    #[test]
    fn bare_json_line_with_top_level_name() {
        let mut scanner = InlineCallScanner::new();
        let events = feed_all(
            &mut scanner,
            &["before\n{\"name\": \"lookup\", \"arguments\": {\"q\": \"x\"}}\nafter"],
        );
        let (text, calls) = normalize(&events);
        assert_eq!(text, "before\nafter");
        assert_eq!(calls[0].name, "lookup");
        assert_eq!(calls[0].arguments, json!({"q": "x"}));
    }

    #[test]
    fn bare_json_line_with_function_wrapper_and_string_args() {
        let mut scanner = InlineCallScanner::new();
        let events = feed_all(
            &mut scanner,
            &["{\"function\": {\"name\": \"lookup\", \"arguments\": \"{\\\"q\\\": 1}\"}}"],
        );
        let (text, calls) = normalize(&events);
        assert!(text.is_empty());
        assert_eq!(calls[0].name, "lookup");
        assert_eq!(calls[0].arguments, json!({"q": 1}));
    }

    #[test]
    fn ordinary_json_line_without_name_passes_through() {
        let mut scanner = InlineCallScanner::new();
        let events = feed_all(&mut scanner, &["{\"weather\": \"sunny\"}"]);
        let (text, calls) = normalize(&events);
        assert_eq!(text, "{\"weather\": \"sunny\"}");
        assert!(calls.is_empty());
    }

    #[test]
    fn stray_control_tokens_are_stripped_from_text() {
        let mut scanner = InlineCallScanner::new();
        let events = feed_all(
            &mut scanner,
            &["<tool_calls_begin>hello<tool_call_sep> there<tool_calls_end>"],
        );
        let (text, calls) = normalize(&events);
        assert_eq!(text, "hello there");
        assert!(calls.is_empty());
    }

    #[test]
    fn malformed_header_is_surfaced_as_text() {
        let mut scanner = InlineCallScanner::new();
        let events = feed_all(
            &mut scanner,
            &["<tool_call_begin>not a name!<tool_call_argument_begin>"],
        );
        let (text, calls) = normalize(&events);
        assert_eq!(
            text,
            "<tool_call_begin>not a name!<tool_call_argument_begin>"
        );
        assert!(calls.is_empty());
    }

    #[test]
    fn unparseable_arguments_at_end_token_are_consumed_silently() {
        let mut scanner = InlineCallScanner::new();
        let events = feed_all(
            &mut scanner,
            &["<tool_call_begin>foo<tool_call_argument_begin>not json<tool_call_end>ok"],
        );
        let (text, calls) = normalize(&events);
        assert_eq!(text, "ok");
        assert!(calls.is_empty());
    }

    #[test]
    fn two_calls_in_sequence() {
        let mut scanner = InlineCallScanner::new();
        let events = feed_all(
            &mut scanner,
            &[
                "<tool_call_begin>a<tool_call_argument_begin>{\"x\":1}<tool_call_end>",
                "<tool_call_sep>",
                "<tool_call_begin>b<tool_call_argument_begin>{\"y\":2}<tool_call_end>",
            ],
        );
        let (text, calls) = normalize(&events);
        assert!(text.is_empty());
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "a");
        assert_eq!(calls[1].name, "b");
    }

    #[test]
    fn argument_overflow_falls_back_to_passthrough() {
        let mut scanner = InlineCallScanner::new();
        let mut out = Vec::new();
        scanner.feed("<tool_call_begin>big<tool_call_argument_begin>", &mut out);
        // An unterminated, unparseable buffer past the cap flushes as text.
        let filler = "x".repeat(MAX_ARGS_LEN + 16);
        scanner.feed(&filler, &mut out);
        let (text, calls) = normalize(&out);
        assert!(calls.is_empty());
        assert!(text.contains("<tool_call_begin>big"));
        // Subsequent text passes through untouched.
        let mut tail = Vec::new();
        scanner.feed("<tool_call_begin>after", &mut tail);
        assert_eq!(
            tail,
            vec![ScanEvent::Text("<tool_call_begin>after".to_string())]
        );
    }

    #[test]
    fn partial_token_suffix_lengths() {
        assert_eq!(partial_token_suffix("hello"), 0);
        assert_eq!(partial_token_suffix("hello <"), 1);
        assert_eq!(partial_token_suffix("hello <tool_call_"), 11);
        assert_eq!(partial_token_suffix("<tool_call_begin"), 16);
        // A complete token is not a partial match.
        assert_eq!(partial_token_suffix("<tool_call_end>"), 0);
    }
}
