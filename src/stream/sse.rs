/// SSE frame reader for the chat-completions response body.
///
/// The upstream speaks the `data: <json>\n\n` dialect: every meaningful
/// frame is a single `data:` line, comments and blank keepalives are noise,
/// and the literal payload `[DONE]` terminates the turn. The reader
/// reassembles lines from a byte stream whose read boundaries fall anywhere,
/// including inside a UTF-8 sequence.
use bytes::Bytes;
use memchr::memchr_iter;

/// One `data:` payload extracted from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// A JSON payload to decode into a stream chunk.
    Data(String),
    /// The `[DONE]` sentinel.
    Done,
}

/// Incremental line reader over decoded SSE text.
///
/// Feed it text chunks in arbitrary pieces; complete lines are inspected as
/// they close, the trailing partial line is held back.
pub struct SseFrameReader {
    buffer: String,
    /// Undecodable byte tail carried between reads when a chunk boundary
    /// splits a UTF-8 sequence.
    byte_remainder: Vec<u8>,
}

impl SseFrameReader {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            byte_remainder: Vec::new(),
        }
    }

    /// Feed a raw byte chunk and append complete frames to `out`.
    pub fn feed_bytes(&mut self, chunk: &Bytes, out: &mut Vec<SseFrame>) {
        if self.byte_remainder.is_empty() {
            match std::str::from_utf8(chunk) {
                Ok(text) => self.feed_text(text, out),
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    // Safety: valid_up_to is a valid UTF-8 boundary.
                    let text = unsafe { std::str::from_utf8_unchecked(&chunk[..valid_up_to]) };
                    self.feed_text(text, out);
                    self.byte_remainder.extend_from_slice(&chunk[valid_up_to..]);
                }
            }
            return;
        }

        self.byte_remainder.extend_from_slice(chunk);
        match std::str::from_utf8(&self.byte_remainder) {
            Ok(text) => {
                let text = text.to_string();
                self.byte_remainder.clear();
                self.feed_text(&text, out);
            }
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                if valid_up_to > 0 {
                    // Safety: valid_up_to is a valid UTF-8 boundary.
                    let text = unsafe {
                        std::str::from_utf8_unchecked(&self.byte_remainder[..valid_up_to])
                    }
                    .to_string();
                    self.byte_remainder.drain(..valid_up_to);
                    self.feed_text(&text, out);
                }
            }
        }
    }

    /// Feed decoded text and append complete frames to `out`.
    pub fn feed_text(&mut self, chunk: &str, out: &mut Vec<SseFrame>) {
        self.buffer.push_str(chunk);

        let mut consumed = 0usize;
        for rel in memchr_iter(b'\n', self.buffer.as_bytes()) {
            let mut line = &self.buffer[consumed..rel];
            if let Some(stripped) = line.strip_suffix('\r') {
                line = stripped;
            }
            if let Some(frame) = inspect_line(line) {
                out.push(frame);
            }
            consumed = rel + 1;
        }

        if consumed > 0 {
            self.buffer.drain(..consumed);
        }
    }

    /// Remaining held-back text, exposed for tests.
    #[cfg(test)]
    fn pending(&self) -> &str {
        &self.buffer
    }
}

impl Default for SseFrameReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Classify one complete line. Lines without a `data:` field are comments or
/// keepalives and yield nothing.
fn inspect_line(line: &str) -> Option<SseFrame> {
    let payload = line.strip_prefix("data:")?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);
    if payload.trim() == "[DONE]" {
        return Some(SseFrame::Done);
    }
    if payload.is_empty() {
        return None;
    }
    Some(SseFrame::Data(payload.to_string()))
}
