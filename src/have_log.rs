use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::debug;

// One local piece completion, recorded for outgoing HAVE advertisements.
#[derive(Debug, Clone)]
pub struct HaveEntry {
    origin: u64,
    piece_index: usize,
    registered_at: Instant,
}

impl HaveEntry {
    pub fn origin(&self) -> u64 {
        self.origin
    }

    pub fn piece_index(&self) -> usize {
        self.piece_index
    }

    pub fn registered_at(&self) -> Instant {
        self.registered_at
    }
}

/// Time-ordered log of recent local completions, newest first. Each peer
/// session periodically drains the entries newer than its last check to
/// build its outgoing HAVE messages.
#[derive(Debug, Default)]
pub struct HaveLog {
    entries: VecDeque<HaveEntry>,
}

impl HaveLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, origin: u64, piece_index: usize) {
        self.push_at(origin, piece_index, Instant::now());
    }

    fn push_at(&mut self, origin: u64, piece_index: usize, registered_at: Instant) {
        self.entries.push_front(HaveEntry {
            origin,
            piece_index,
            registered_at,
        });
    }

    /// Piece indexes advertised since `since`, newest first, skipping the
    /// entries the asking session recorded itself.
    pub fn collect_since(&self, my_id: u64, since: Instant) -> Vec<usize> {
        let mut indexes = Vec::new();

        for entry in &self.entries {
            if entry.origin == my_id {
                continue;
            }
            if entry.registered_at <= since {
                break;
            }
            indexes.push(entry.piece_index);
        }

        indexes
    }

    /// Drops every entry older than `max_age`. Entries are non-increasing in
    /// registration time from front to back, so the first stale entry marks
    /// the start of the stale tail.
    pub fn prune_older_than(&mut self, max_age: Duration) {
        let stale_from = self
            .entries
            .iter()
            .position(|entry| entry.registered_at.elapsed() >= max_age);

        if let Some(position) = stale_from {
            let removed = self.entries.len() - position;
            debug!(removed = removed, "Removed stale have entries");
            self.entries.truncate(position);
        }
    }
}
