//! Bounded diagnostic log buffer
//!
//! Each pipeline process gets a `LogRing` that keeps the most recent lines of
//! its diagnostic output. Every appended line is also mirrored to the tracing
//! output immediately, so the full stream stays visible to operators even
//! though the buffer itself is bounded.

use parking_lot::Mutex;
use std::collections::VecDeque;

/// How many diagnostic lines are retained per process.
pub const DEFAULT_LOG_CAPACITY: usize = 200;

/// Fixed-capacity FIFO buffer of diagnostic lines.
pub struct LogRing {
    label: String,
    capacity: usize,
    lines: Mutex<VecDeque<String>>,
}

impl LogRing {
    pub fn new(label: impl Into<String>, capacity: usize) -> Self {
        Self {
            label: label.into(),
            capacity,
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Label identifying the process this ring belongs to.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Append a line, evicting the oldest one once the ring is full.
    ///
    /// The line is mirrored to the tracing output before it is buffered.
    pub fn push(&self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!("[{}] {}", self.label, line);
        let mut lines = self.lines.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Snapshot of the current contents, oldest first.
    pub fn tail(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_lines_in_insertion_order() {
        let ring = LogRing::new("test", 10);
        ring.push("one");
        ring.push("two");
        ring.push("three");
        assert_eq!(ring.tail(), vec!["one", "two", "three"]);
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let ring = LogRing::new("test", 3);
        for i in 0..5 {
            ring.push(format!("line {}", i));
        }
        assert_eq!(ring.tail(), vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn empty_ring_has_empty_tail() {
        let ring = LogRing::new("test", 3);
        assert!(ring.tail().is_empty());
    }
}
