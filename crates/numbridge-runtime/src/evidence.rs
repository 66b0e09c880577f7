#![forbid(unsafe_code)]

//! Bounded FIFO evidence ledger for solver audit trails.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Bounded FIFO evidence buffer.
///
/// Capacity is enforced via `capacity.max(1)`, so the ledger always keeps
/// at least one entry. When full, the oldest entry (front of the
/// `VecDeque`) is evicted before a new entry is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceLedger<E> {
    capacity: usize,
    entries: VecDeque<E>,
    evicted: u64,
}

impl<E> EvidenceLedger<E> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
            evicted: 0,
        }
    }

    /// Append an entry, evicting the oldest if at capacity.
    pub fn record(&mut self, entry: E) {
        if self.entries.len() == self.capacity {
            let _ = self.entries.pop_front();
            self.evicted += 1;
        }
        self.entries.push_back(entry);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recently recorded entry.
    #[must_use]
    pub fn latest(&self) -> Option<&E> {
        self.entries.back()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries dropped to honor the capacity.
    #[must_use]
    pub const fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &E> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<E: Serialize> EvidenceLedger<E> {
    /// One JSON object per line, oldest first. Entries that fail to
    /// serialize are skipped.
    #[must_use]
    pub fn serialize_jsonl(&self) -> String {
        self.entries
            .iter()
            .filter_map(|e| serde_json::to_string(e).ok())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl<E> Default for EvidenceLedger<E> {
    fn default() -> Self {
        Self::new(crate::DEFAULT_EVIDENCE_CAPACITY)
    }
}
