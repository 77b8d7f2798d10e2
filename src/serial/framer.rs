//! Newline framing for the raw serial byte stream.
use super::SerialError;

pub const DEFAULT_MAX_BUFFER: usize = 8192;

/// Accumulates raw bytes and hands out complete, trimmed lines.
///
/// Bytes after the last terminator stay buffered until a later `feed`
/// completes them. `\n` and `\r` both terminate a line, so `\r\n` endings
/// produce one line and one dropped blank.
#[derive(Debug)]
pub struct LineFramer {
    buffer: Vec<u8>,
    max_buffer: usize,
    utf8_errors: u64,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::with_capacity_limit(DEFAULT_MAX_BUFFER)
    }

    pub fn with_capacity_limit(max_buffer: usize) -> Self {
        Self { buffer: Vec::new(), max_buffer: max_buffer.max(1), utf8_errors: 0 }
    }

    /// Append `bytes` and iterate over every line they complete.
    ///
    /// The iterator yields `Err(BufferOverflow)` once, after the last line,
    /// if the unterminated remainder has grown past the limit; the remainder
    /// is discarded in that case.
    pub fn feed(&mut self, bytes: &[u8]) -> FramedLines<'_> {
        self.buffer.extend_from_slice(bytes);
        FramedLines { framer: self, done: false }
    }

    /// Bytes waiting for a terminator.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn utf8_errors(&self) -> u64 {
        self.utf8_errors
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    fn next_line(&mut self) -> Option<String> {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n' || *b == b'\r') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let raw = &raw[..pos];
            let text = match std::str::from_utf8(raw) {
                Ok(s) => s.to_string(),
                Err(_) => {
                    self.utf8_errors += 1;
                    String::from_utf8_lossy(raw).into_owned()
                }
            };
            let line = text.trim();
            if !line.is_empty() {
                return Some(line.to_string());
            }
        }
        None
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

pub struct FramedLines<'a> {
    framer: &'a mut LineFramer,
    done: bool,
}

impl Iterator for FramedLines<'_> {
    type Item = Result<String, SerialError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(line) = self.framer.next_line() {
            return Some(Ok(line));
        }
        self.done = true;
        if self.framer.buffer.len() > self.framer.max_buffer {
            let limit = self.framer.max_buffer;
            log::warn!("Dropping {} unterminated bytes (limit {})", self.framer.buffer.len(), limit);
            self.framer.buffer.clear();
            return Some(Err(SerialError::BufferOverflow { limit }));
        }
        None
    }
}
