//! Per-persona memory log: a bounded, ordered list of short notes.
//!
//! Rules:
//!   - blank notes are ignored
//!   - a note equal to the immediately preceding one is ignored (adjacent dedup only)
//!   - once the log holds more than `max` notes, the oldest are evicted first

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Separator used when a digest is rendered for a prompt.
pub const DIGEST_SEPARATOR: &str = " | ";

/// Bounded FIFO log of textual notes, most recent last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryLog {
    notes: VecDeque<String>,
    max: usize,
}

impl MemoryLog {
    /// Create an empty log holding at most `max` notes.
    #[must_use]
    pub fn new(max: usize) -> Self {
        Self {
            notes: VecDeque::with_capacity(max.min(128)),
            max,
        }
    }

    /// Store a note. Returns `true` if the note was appended.
    pub fn remember(&mut self, note: &str) -> bool {
        let note = note.trim();
        if note.is_empty() {
            return false;
        }
        if self.notes.back().is_some_and(|last| last == note) {
            return false;
        }

        self.notes.push_back(note.to_string());
        while self.notes.len() > self.max {
            self.notes.pop_front();
        }
        true
    }

    /// The last `count` notes joined for prompt inclusion, or `""` if empty.
    #[must_use]
    pub fn digest(&self, count: usize) -> String {
        let skip = self.notes.len().saturating_sub(count);
        self.notes
            .iter()
            .skip(skip)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(DIGEST_SEPARATOR)
    }

    /// Number of stored notes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Capacity bound.
    #[must_use]
    pub fn max(&self) -> usize {
        self.max
    }

    /// Most recent note, if any.
    #[must_use]
    pub fn last(&self) -> Option<&str> {
        self.notes.back().map(String::as_str)
    }

    /// Iterate notes oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.notes.iter().map(String::as_str)
    }
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new(80)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_notes_are_ignored() {
        let mut log = MemoryLog::new(5);
        assert!(!log.remember(""));
        assert!(!log.remember("   \n"));
        assert!(log.is_empty());
    }

    #[test]
    fn adjacent_duplicates_collapse() {
        let mut log = MemoryLog::new(5);
        assert!(log.remember("Даша: привет"));
        assert!(!log.remember("Даша: привет"));
        assert!(!log.remember("  Даша: привет  "));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn non_adjacent_duplicates_are_kept() {
        let mut log = MemoryLog::new(5);
        log.remember("a");
        log.remember("b");
        log.remember("a");
        assert_eq!(log.iter().collect::<Vec<_>>(), vec!["a", "b", "a"]);
    }

    #[test]
    fn oldest_notes_are_evicted_first() {
        let mut log = MemoryLog::new(3);
        for note in ["1", "2", "3", "4", "5"] {
            log.remember(note);
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.iter().collect::<Vec<_>>(), vec!["3", "4", "5"]);
        assert_eq!(log.last(), Some("5"));
    }

    #[test]
    fn digest_takes_most_recent_notes() {
        let mut log = MemoryLog::new(10);
        assert_eq!(log.digest(3), "");
        for note in ["a", "b", "c", "d"] {
            log.remember(note);
        }
        assert_eq!(log.digest(3), "b | c | d");
        assert_eq!(log.digest(10), "a | b | c | d");
    }
}
