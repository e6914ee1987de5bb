//! Bounded in-memory traffic ledger backing `getMemoryStats()` (spec §3,
//! "Message Buffer").

use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;
use std::time::{SystemTime, UNIX_EPOCH};

use collab_primitives::defaults::{
    MAX_MEMORY_BUFFER_BYTES, MESSAGE_BUFFER_MAX_ENTRIES, MESSAGE_BUFFER_RETENTION,
};
use collab_primitives::model::MessageBufferEntry;

pub struct MessageBuffer {
    entries: StdMutex<VecDeque<MessageBufferEntry>>,
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self {
            entries: StdMutex::new(VecDeque::new()),
        }
    }
}

impl MessageBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one payload's size and evicts anything past the count cap,
    /// the byte cap, or the retention window (spec §3: "two caps: count
    /// (1,000) and total-bytes (10 MiB); retention 1 hour").
    pub fn record(&self, size: u64) {
        let now = now_ms();
        let mut entries = self.entries.lock().unwrap();
        entries.push_back(MessageBufferEntry {
            timestamp_ms: now,
            size,
        });
        while entries.len() > MESSAGE_BUFFER_MAX_ENTRIES {
            entries.pop_front();
        }
        let retention_floor = now - MESSAGE_BUFFER_RETENTION.as_millis() as i64;
        while entries.front().is_some_and(|e| e.timestamp_ms < retention_floor) {
            entries.pop_front();
        }
        while entries.len() > 1 && total_bytes(&entries) > MAX_MEMORY_BUFFER_BYTES {
            entries.pop_front();
        }
    }

    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        total_bytes(&self.entries.lock().unwrap())
    }
}

fn total_bytes(entries: &VecDeque<MessageBufferEntry>) -> u64 {
    entries.iter().map(|e| e.size).sum()
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Snapshot returned by `CollabSession::get_memory_stats()` (spec §4.10).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryStats {
    pub message_buffer_bytes: u64,
    pub connection_count: usize,
    pub last_cleanup: Option<i64>,
    pub awareness_states: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_past_the_entry_count_ceiling() {
        let buffer = MessageBuffer::new();
        for _ in 0..(MESSAGE_BUFFER_MAX_ENTRIES + 10) {
            buffer.record(1);
        }
        assert_eq!(buffer.entries.lock().unwrap().len(), MESSAGE_BUFFER_MAX_ENTRIES);
    }

    #[test]
    fn evicts_past_the_byte_ceiling() {
        let buffer = MessageBuffer::new();
        buffer.record(MAX_MEMORY_BUFFER_BYTES);
        buffer.record(MAX_MEMORY_BUFFER_BYTES);
        assert!(buffer.total_bytes() <= MAX_MEMORY_BUFFER_BYTES);
    }
}
