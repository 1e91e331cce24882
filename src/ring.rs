// Bounded byte log of raw child output.
//
// Keeps the tail of whatever the child wrote, escape sequences and all,
// so a crashing TUI can be diagnosed even when its screen never became
// useful. When the bound is reached the oldest bytes are discarded.

use std::collections::VecDeque;

/// Default capacity of a session's raw ring.
pub const DEFAULT_CAPACITY: usize = 64 * 1024;

pub struct RawRing {
    buf: VecDeque<u8>,
    capacity: usize,
}

impl RawRing {
    pub fn new(capacity: usize) -> Self {
        RawRing {
            buf: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        if bytes.len() >= self.capacity {
            self.buf.clear();
            self.buf.extend(&bytes[bytes.len() - self.capacity..]);
            return;
        }
        self.buf.extend(bytes);
        let excess = self.buf.len().saturating_sub(self.capacity);
        if excess > 0 {
            self.buf.drain(..excess);
        }
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

    /// The last `n` newline-separated lines of the buffered output.
    pub fn tail_lines(&self, n: usize) -> String {
        let bytes: Vec<u8> = self.buf.iter().copied().collect();
        let text = String::from_utf8_lossy(&bytes);
        let lines: Vec<&str> = text.lines().collect();
        let start = lines.len().saturating_sub(n);
        lines[start..].join("\n")
    }
}
