use std::collections::HashSet;

use crate::logging::{DedupKey, LogEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Scrolled above the newest loaded row.
    Top,
    /// Scrolled below the oldest loaded row.
    Bottom,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub inserted: usize,
    pub duplicates: usize,
    /// The new rows did not fit at the edge and the window was re-sorted.
    pub resorted: bool,
}

/// The ordered, deduplicated set of entries held for the active query.
///
/// Entries are kept newest first. `offset` is the first visible row and is
/// clamped to `[0, len - viewport_rows]` after every mutation.
#[derive(Debug, Clone, Default)]
pub struct LogWindow {
    entries: Vec<LogEntry>,
    keys: HashSet<DedupKey>,
    offset: usize,
    viewport_rows: usize,
}

impl LogWindow {
    pub fn new(viewport_rows: usize) -> Self {
        Self {
            entries: Vec::new(),
            keys: HashSet::new(),
            offset: 0,
            viewport_rows,
        }
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<LogEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn viewport_rows(&self) -> usize {
        self.viewport_rows
    }

    pub fn newest(&self) -> Option<&LogEntry> {
        self.entries.first()
    }

    pub fn oldest(&self) -> Option<&LogEntry> {
        self.entries.last()
    }

    pub fn visible(&self) -> &[LogEntry] {
        let end = (self.offset + self.viewport_rows).min(self.entries.len());
        &self.entries[self.offset.min(end)..end]
    }

    pub fn max_offset(&self) -> usize {
        self.entries.len().saturating_sub(self.viewport_rows)
    }

    pub fn set_viewport_rows(&mut self, rows: usize) {
        self.viewport_rows = rows;
        self.clamp_offset();
    }

    /// Replaces the whole window and resets the viewport to the top.
    pub fn replace(&mut self, entries: Vec<LogEntry>) -> MergeOutcome {
        self.entries.clear();
        self.keys.clear();
        self.offset = 0;
        let (fresh, duplicates) = self.take_fresh(entries);
        let inserted = fresh.len();
        self.entries = fresh;
        MergeOutcome {
            inserted,
            duplicates,
            resorted: false,
        }
    }

    /// Appends a page of older entries below the current rows. The offset
    /// is left untouched so the rows on screen stay where they are.
    pub fn merge_older(&mut self, page: Vec<LogEntry>) -> MergeOutcome {
        let (fresh, duplicates) = self.take_fresh(page);
        let inserted = fresh.len();
        let mut resorted = false;

        if let Some(first_new) = fresh.first() {
            let fits = self
                .entries
                .last()
                .is_none_or(|last| first_new.timestamp <= last.timestamp);
            self.entries.extend(fresh);
            if !fits {
                self.sort_newest_first();
                resorted = true;
            }
        }

        self.clamp_offset();
        MergeOutcome {
            inserted,
            duplicates,
            resorted,
        }
    }

    /// Prepends a page of newer entries above the current rows and shifts
    /// the offset by the number of inserted rows.
    pub fn merge_newer(&mut self, page: Vec<LogEntry>) -> MergeOutcome {
        let (fresh, duplicates) = self.take_fresh(page);
        let inserted = fresh.len();
        let mut resorted = false;

        if let Some(last_new) = fresh.last() {
            let fits = self
                .entries
                .first()
                .is_none_or(|first| last_new.timestamp >= first.timestamp);
            self.entries.splice(0..0, fresh);
            self.offset += inserted;
            if !fits {
                self.sort_newest_first();
                resorted = true;
            }
        }

        self.clamp_offset();
        MergeOutcome {
            inserted,
            duplicates,
            resorted,
        }
    }

    /// Moves the viewport. Returns the edge that was crossed, if the move
    /// asked for rows beyond the loaded data.
    pub fn scroll_by(&mut self, delta: isize) -> Option<Edge> {
        if delta == 0 || self.entries.is_empty() {
            return None;
        }
        let max = self.max_offset();
        let target = (self.offset as isize).saturating_add(delta);
        if target < 0 {
            self.offset = 0;
            return Some(Edge::Top);
        }
        if target as usize > max {
            self.offset = max;
            return Some(Edge::Bottom);
        }
        self.offset = target as usize;
        None
    }

    /// Brings `row` into view, keeping it as close to the top as the clamp allows.
    pub fn reveal(&mut self, row: usize) {
        if row < self.offset || row >= self.offset + self.viewport_rows.max(1) {
            self.offset = row;
        }
        self.clamp_offset();
    }

    fn clamp_offset(&mut self) {
        self.offset = self.offset.min(self.max_offset());
    }

    fn sort_newest_first(&mut self) {
        self.entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    }

    /// Drops entries already present (in the window or earlier in the page)
    /// and returns the rest newest first.
    fn take_fresh(&mut self, page: Vec<LogEntry>) -> (Vec<LogEntry>, usize) {
        let total = page.len();
        let mut fresh: Vec<LogEntry> = page
            .into_iter()
            .filter(|entry| self.keys.insert(entry.dedup_key()))
            .collect();
        fresh.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let duplicates = total - fresh.len();
        (fresh, duplicates)
    }
}
