//! Growable byte queue backing every socket's read and write side.
//!
//! ```text
//!   consumed       live bytes              spare capacity
//! ┌──────────┬──────────────────────────┬─────────────────┐
//! │ xxxxxxxx │ a b c \n d e f           │                 │
//! └──────────┴──────────────────────────┴─────────────────┘
//!            ^ head                     ^ buf.len()
//! ```
//!
//! Consuming from the front only advances `head`; the dead prefix is
//! reclaimed once it outgrows the live region, so consume and truncate stay
//! amortized O(1) per byte.

pub const DEFAULT_DELIMITER: &[u8] = b"\n";

#[derive(Debug, Clone)]
pub struct ByteQueue {
    buf: Vec<u8>,
    head: usize,
    delimiter: Vec<u8>,
}

impl Default for ByteQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteQueue {
    pub fn new() -> Self {
        Self::with_delimiter(DEFAULT_DELIMITER)
    }

    /// Creates a queue whose [`next_line`](Self::next_line) and
    /// [`all_complete_lines`](Self::all_complete_lines) split on `delimiter`.
    pub fn with_delimiter(delimiter: &[u8]) -> Self {
        Self {
            buf: Vec::new(),
            head: 0,
            delimiter: delimiter.to_vec(),
        }
    }

    pub fn delimiter(&self) -> &[u8] {
        &self.delimiter
    }

    pub fn set_delimiter(&mut self, delimiter: &[u8]) {
        self.delimiter = delimiter.to_vec();
    }

    pub fn len(&self) -> usize {
        self.buf.len() - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The queued bytes, oldest first.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[self.head..]
    }

    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Inserts `data` ahead of everything currently queued.
    pub fn prepend(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        if data.len() <= self.head {
            let start = self.head - data.len();
            self.buf[start..self.head].copy_from_slice(data);
            self.head = start;
        } else {
            let mut rebuilt = Vec::with_capacity(data.len() + self.len());
            rebuilt.extend_from_slice(data);
            rebuilt.extend_from_slice(self.as_slice());
            self.buf = rebuilt;
            self.head = 0;
        }
    }

    /// Removes and returns up to `n` bytes from the front. Asking for more
    /// than is queued returns everything.
    pub fn consume(&mut self, n: usize) -> Vec<u8> {
        let n = n.min(self.len());
        let out = self.buf[self.head..self.head + n].to_vec();
        self.advance(n);
        out
    }

    /// Drops up to `n` bytes from the front without returning them.
    pub fn truncate(&mut self, n: usize) {
        let n = n.min(self.len());
        self.advance(n);
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.head = 0;
    }

    /// Returns the bytes before the first `delimiter` and removes them
    /// together with the delimiter itself. `None` when no complete line is
    /// queued or the delimiter is empty.
    pub fn extract_line(&mut self, delimiter: &[u8]) -> Option<Vec<u8>> {
        let offset = find(self.as_slice(), delimiter)?;
        let line = self.as_slice()[..offset].to_vec();
        self.advance(offset + delimiter.len());
        Some(line)
    }

    /// Removes every complete line up to and including the last `delimiter`
    /// and returns them in order. A trailing partial line stays queued.
    pub fn extract_all_complete_lines(&mut self, delimiter: &[u8]) -> Option<Vec<Vec<u8>>> {
        let last = rfind(self.as_slice(), delimiter)?;
        let mut lines = Vec::new();
        let mut rest = &self.as_slice()[..last];
        while let Some(offset) = find(rest, delimiter) {
            lines.push(rest[..offset].to_vec());
            rest = &rest[offset + delimiter.len()..];
        }
        lines.push(rest.to_vec());
        self.advance(last + delimiter.len());
        Some(lines)
    }

    /// [`extract_line`](Self::extract_line) with the queue's own delimiter.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let delimiter = std::mem::take(&mut self.delimiter);
        let line = self.extract_line(&delimiter);
        self.delimiter = delimiter;
        line
    }

    /// [`extract_all_complete_lines`](Self::extract_all_complete_lines) with
    /// the queue's own delimiter.
    pub fn all_complete_lines(&mut self) -> Option<Vec<Vec<u8>>> {
        let delimiter = std::mem::take(&mut self.delimiter);
        let lines = self.extract_all_complete_lines(&delimiter);
        self.delimiter = delimiter;
        lines
    }

    fn advance(&mut self, n: usize) {
        self.head += n;
        if self.head == self.buf.len() {
            self.buf.clear();
            self.head = 0;
        } else if self.head > self.buf.len() / 2 {
            self.buf.drain(..self.head);
            self.head = 0;
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}
