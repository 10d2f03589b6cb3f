//! Scrollback ring buffer for terminal-mode containers (spec.md §4.D.2).
//!
//! Replayed to an `attach` client immediately after it connects, so a
//! client that attaches after the payload has already produced output
//! still sees its tail instead of a blank screen.

use std::collections::VecDeque;

/// Bounded FIFO of bytes. Once `capacity` is reached, the oldest bytes are
/// discarded to make room for new ones — never the newest.
pub struct TerminalBuffer {
    data: VecDeque<u8>,
    capacity: usize,
}

impl TerminalBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(capacity.min(64 * 1024)),
            capacity,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        if self.capacity == 0 {
            return;
        }
        if chunk.len() >= self.capacity {
            self.data.clear();
            self.data.extend(chunk[chunk.len() - self.capacity..].iter().copied());
            return;
        }
        let overflow = (self.data.len() + chunk.len()).saturating_sub(self.capacity);
        for _ in 0..overflow {
            self.data.pop_front();
        }
        self.data.extend(chunk.iter().copied());
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.data.iter().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
