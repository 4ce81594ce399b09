// MIT License - Copyright (c) 2026 Peter Wright
// Streaming JSON message framer

use tracing::trace;

/// Scan state produced by a single pass over a buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ScanState {
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl ScanState {
    /// Feed one byte. Returns true when this byte closes a top-level text.
    fn step(&mut self, byte: u8) -> bool {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if byte == b'\\' {
                self.escaped = true;
            } else if byte == b'"' {
                self.in_string = false;
            }
            return false;
        }

        match byte {
            b'"' => self.in_string = true,
            b'{' | b'[' => self.depth += 1,
            b'}' | b']' if self.depth > 0 => {
                self.depth -= 1;
                return self.depth == 0;
            }
            _ => {}
        }
        false
    }
}

/// Find the end of the first complete top-level JSON text in `buf`.
///
/// Returns the byte length of that text (start of buffer up to and including
/// the closing brace). Whitespace or stray bytes before the opening brace are
/// included in the slice and trimmed by the caller. `None` when no text has
/// closed yet.
pub fn find_message_end(buf: &str) -> Option<usize> {
    let mut state = ScanState::default();
    buf.bytes()
        .position(|b| state.step(b))
        .map(|idx| idx + 1)
}

/// Append-only text buffer that yields complete JSON texts in arrival order.
///
/// Every call re-derives the scan state from the buffer contents, so the
/// buffer can be inspected or cleared at any point without desynchronizing.
#[derive(Debug, Default)]
pub struct MessageBuffer {
    buf: String,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_str(&mut self, chunk: &str) {
        self.buf.push_str(chunk);
    }

    /// Remove and return the first complete text, if any.
    ///
    /// When nothing is complete the buffer is left untouched.
    pub fn next_message(&mut self) -> Option<String> {
        let end = find_message_end(&self.buf)?;
        let rest = self.buf.split_off(end);
        let head = std::mem::replace(&mut self.buf, rest);
        let message = head.trim();
        trace!("Framed message of {} bytes", message.len());
        Some(message.to_string())
    }

    /// Lazily drain every complete text currently buffered.
    pub fn messages(&mut self) -> Messages<'_> {
        Messages { buffer: self }
    }

    /// Whether the buffer is empty or ends at a text boundary.
    pub fn is_complete(&self) -> bool {
        let mut state = ScanState::default();
        for b in self.buf.bytes() {
            state.step(b);
        }
        state.depth == 0 && !state.in_string
    }

    /// Bytes still waiting for the rest of their text.
    pub fn remainder(&self) -> &str {
        &self.buf
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Draining iterator returned by [`MessageBuffer::messages`].
pub struct Messages<'a> {
    buffer: &'a mut MessageBuffer,
}

impl Iterator for Messages<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.buffer.next_message()
    }
}
