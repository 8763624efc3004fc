use std::collections::VecDeque;

use crate::types::HistoryEntry;

pub const MIN_HISTORY_CAP: usize = 20;
pub const MAX_HISTORY_CAP: usize = 25;

/// Most-recent-first crash results, capped at a fixed length.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    entries: VecDeque<HistoryEntry>,
    cap: usize,
}

impl HistoryBuffer {
    pub fn new(cap: usize) -> Self {
        let cap = cap.clamp(MIN_HISTORY_CAP, MAX_HISTORY_CAP);
        HistoryBuffer {
            entries: VecDeque::with_capacity(cap),
            cap,
        }
    }

    /// Replaces the buffer with durable records given newest first.
    /// Anything beyond the cap is dropped.
    pub fn restore<I>(&mut self, newest_first: I)
    where
        I: IntoIterator<Item = HistoryEntry>,
    {
        self.entries.clear();
        self.entries
            .extend(newest_first.into_iter().take(self.cap));
    }

    /// Records a crash, evicting the oldest entry once full
    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push_front(entry);
        self.entries.truncate(self.cap);
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.front()
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Multipliers newest first, as broadcast to clients
    pub fn multipliers(&self) -> Vec<f64> {
        self.entries.iter().map(|entry| entry.multiplier).collect()
    }
}
