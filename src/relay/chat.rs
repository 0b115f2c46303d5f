//! Chat History
//!
//! Bounded ring buffer of relayed chat messages.

use std::collections::VecDeque;

use crate::network::protocol::ChatEntry;

/// Most recent chat entries, oldest dropped first.
#[derive(Debug, Clone)]
pub struct ChatHistory {
    entries: VecDeque<ChatEntry>,
    capacity: usize,
}

impl ChatHistory {
    /// Create an empty history holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest past capacity.
    pub fn push(&mut self, entry: ChatEntry) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// The last `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<ChatEntry> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no chat has been relayed yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
