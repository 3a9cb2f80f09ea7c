/// Buffered reasoning-channel text, rendered as one demarcated block.
///
/// Reasoning deltas are not shown token-by-token: quote-formatting every
/// fragment makes the host UI flicker. Text accumulates here and is rendered
/// once a turn boundary forces a flush, always ahead of the answer text it
/// logically preceded.
pub struct ReasoningBuffer {
    buffer: String,
}

impl ReasoningBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    pub fn push(&mut self, delta: &str) {
        self.buffer.push_str(delta);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drain the buffer into a rendered block, or `None` when nothing was
    /// collected. `complete` only changes the header label; it is used for
    /// every forced flush (incoming answer text or end of turn).
    #[must_use]
    pub fn take_block(&mut self, complete: bool) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.buffer);
        let header = if complete {
            "> **Reasoning**"
        } else {
            "> **Reasoning (in progress)**"
        };
        let mut out = String::with_capacity(header.len() + text.len() + 32);
        out.push_str(header);
        out.push('\n');
        for line in text.lines() {
            out.push_str("> ");
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("\n---\n\n");
        Some(out)
    }
}

impl Default for ReasoningBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer_yields_nothing() {
        let mut buffer = ReasoningBuffer::new();
        assert!(buffer.take_block(true).is_none());
    }

    #[test]
    fn block_quotes_every_line() {
        let mut buffer = ReasoningBuffer::new();
        buffer.push("first thought\nsecond ");
        buffer.push("thought");
        let block = buffer.take_block(true).unwrap();
        assert_eq!(
            block,
            "> **Reasoning**\n> first thought\n> second thought\n\n---\n\n"
        );
    }

    #[test]
    fn in_progress_header_differs() {
        let mut buffer = ReasoningBuffer::new();
        buffer.push("thinking");
        let block = buffer.take_block(false).unwrap();
        assert!(block.starts_with("> **Reasoning (in progress)**\n"));
    }

    #[test]
    fn take_drains_the_buffer() {
        let mut buffer = ReasoningBuffer::new();
        buffer.push("x");
        let _ = buffer.take_block(true);
        assert!(buffer.is_empty());
        assert!(buffer.take_block(true).is_none());
    }

    #[test]
    fn block_ends_with_separator() {
        let mut buffer = ReasoningBuffer::new();
        buffer.push("a");
        let block = buffer.take_block(true).unwrap();
        assert!(block.ends_with("\n---\n\n"));
    }
}
