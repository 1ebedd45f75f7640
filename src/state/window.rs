//! # Bounded log window.
//!
//! [`LogWindow`] keeps the most recent `capacity` log lines keyed by a monotonic
//! offset. Offsets are assigned on insert and never reused; the oldest entry is
//! pruned synchronously once the window is full.
//!
//! ```text
//! capacity = 3
//! insert a → {0:a}            next_offset=1
//! insert b → {0:a,1:b}        next_offset=2
//! insert c → {0:a,1:b,2:c}    next_offset=3
//! insert d → {1:b,2:c,3:d}    next_offset=4   (0 pruned)
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Origin of a log line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    /// The supervisor's own activity.
    Supervisor,
    /// Output of the supervised child (stdout or stderr).
    Child,
}

/// One immutable log line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub offset: u64,
    pub source: LogSource,
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

/// Ring of the most recent log entries.
#[derive(Clone, Debug, Serialize)]
pub struct LogWindow {
    entries: BTreeMap<u64, LogEntry>,
    next_offset: u64,
    capacity: u64,
}

impl LogWindow {
    /// Creates an empty window. A capacity of 0 is clamped to 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            next_offset: 0,
            capacity: capacity.max(1) as u64,
        }
    }

    /// Appends a line, assigns it the next offset and prunes the oldest entry if needed.
    ///
    /// Returns the assigned offset.
    pub fn push(&mut self, source: LogSource, timestamp: DateTime<Utc>, text: String) -> u64 {
        let offset = self.next_offset;
        self.entries.insert(
            offset,
            LogEntry {
                offset,
                source,
                timestamp,
                text,
            },
        );
        if offset >= self.capacity {
            self.entries.remove(&(offset - self.capacity));
        }
        self.next_offset += 1;
        offset
    }

    #[inline]
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in offset order.
    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.values()
    }

    pub fn get(&self, offset: u64) -> Option<&LogEntry> {
        self.entries.get(&offset)
    }
}
