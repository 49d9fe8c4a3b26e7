// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Priority-ordered stream queues.
//!
//! Both the playing set and the pending set keep their entries sorted by
//! non-increasing priority. Equal priorities keep insertion order, so
//! promotion and preemption break ties first-in-first-out.

use crate::config::PlayParams;

/// One scheduled stream: the identity plus the parameters needed to (re)start
/// it later.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub sound_id: i32,
    pub stream_id: i32,
    pub priority: i32,
    pub params: PlayParams,
}

impl StreamEntry {
    pub fn new(sound_id: i32, stream_id: i32, params: PlayParams) -> Self {
        Self {
            sound_id,
            stream_id,
            priority: params.priority,
            params,
        }
    }
}

/// A list of stream entries kept sorted by descending priority.
#[derive(Debug, Default)]
pub struct StreamQueue {
    entries: Vec<StreamEntry>,
}

impl StreamQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts in sorted position: before the first entry of strictly lower
    /// priority, i.e. behind all equal-priority entries already queued.
    pub fn insert(&mut self, entry: StreamEntry) {
        let at = self
            .entries
            .iter()
            .position(|e| e.priority < entry.priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(at, entry);
    }

    /// Pops the highest-priority entry.
    pub fn pop_front(&mut self) -> Option<StreamEntry> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    /// Removes and returns the entry for the given stream, if present.
    pub fn remove(&mut self, stream_id: i32) -> Option<StreamEntry> {
        let at = self.entries.iter().position(|e| e.stream_id == stream_id)?;
        Some(self.entries.remove(at))
    }

    /// The lowest-priority entry: the preemption victim candidate.
    pub fn lowest(&self) -> Option<&StreamEntry> {
        self.entries.last()
    }

    pub fn contains(&self, stream_id: i32) -> bool {
        self.entries.iter().any(|e| e.stream_id == stream_id)
    }

    /// Drops entries not accepted by the predicate (used to prune entries
    /// whose cache buffer has vanished).
    pub fn retain<F: FnMut(&StreamEntry) -> bool>(&mut self, f: F) {
        self.entries.retain(f);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StreamEntry> {
        self.entries.iter()
    }

    /// True if entries are in non-increasing priority order.
    pub fn is_sorted(&self) -> bool {
        self.entries.windows(2).all(|w| w[0].priority >= w[1].priority)
    }
}
