use crate::types::{LogEntry, LogIndex, Term};

/// The in-memory log, always non-empty: `entries[0]` is a sentinel carrying
/// the index and term of the last snapshot-included entry. Real entries
/// live at `entries[1..]` with indices `base+1, base+2, ...`, contiguous by
/// construction.
#[derive(Debug, Clone)]
pub struct RaftLog {
    entries: Vec<LogEntry>,
}

impl RaftLog {
    pub fn new() -> Self {
        Self {
            entries: vec![LogEntry::sentinel(0, 0)],
        }
    }

    /// Rebuilds a log from a persisted entry list, `entries[0]` being the
    /// sentinel. Used when restoring from disk.
    pub fn from_entries(entries: Vec<LogEntry>) -> Self {
        debug_assert!(!entries.is_empty(), "persisted log always keeps its sentinel");
        Self { entries }
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn base_index(&self) -> LogIndex {
        self.entries[0].index
    }

    pub fn base_term(&self) -> Term {
        self.entries[0].term
    }

    pub fn last_index(&self) -> LogIndex {
        self.entries.last().expect("sentinel always present").index
    }

    pub fn last_term(&self) -> Term {
        self.entries.last().expect("sentinel always present").term
    }

    /// Entry at `index`, or `None` if it's before the base (inside a
    /// snapshot) or past the end of the log.
    pub fn get(&self, index: LogIndex) -> Option<&LogEntry> {
        if index < self.base_index() {
            return None;
        }
        let offset = (index - self.base_index()) as usize;
        self.entries.get(offset)
    }

    pub fn term_at(&self, index: LogIndex) -> Option<Term> {
        self.get(index).map(|e| e.term)
    }

    pub fn append(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    /// Drop every entry from `index` onward (leader append-only applies
    /// only to the leader's own log; followers truncate here when an
    /// AppendEntries entry conflicts with what they already have).
    pub fn truncate_from(&mut self, index: LogIndex) {
        if index <= self.base_index() {
            // Never touch the sentinel.
            return;
        }
        let offset = (index - self.base_index()) as usize;
        self.entries.truncate(offset);
    }

    /// Entries strictly after `index`, for sending to a follower whose
    /// `nextIndex` is `index + 1`.
    pub fn entries_after(&self, index: LogIndex) -> Vec<LogEntry> {
        if index < self.base_index() {
            return Vec::new();
        }
        let offset = (index - self.base_index()) as usize + 1;
        self.entries.get(offset..).map(|s| s.to_vec()).unwrap_or_default()
    }

    /// Service-layer snapshot: replace the prefix up to and including
    /// `index` with a fresh sentinel, keeping everything after it.
    pub fn compact_to(&mut self, index: LogIndex) {
        let term = self.term_at(index).unwrap_or_else(|| self.base_term());
        let mut remaining: Vec<LogEntry> = self
            .entries
            .iter()
            .filter(|e| e.index > index)
            .cloned()
            .collect();
        let mut entries = vec![LogEntry::sentinel(index, term)];
        entries.append(&mut remaining);
        self.entries = entries;
    }

    /// Leader-sent snapshot install: replace the prefix with a sentinel at
    /// `(index, term)`, retaining any suffix only if our log already agreed
    /// with the leader at `index`.
    pub fn install_snapshot(&mut self, index: LogIndex, term: Term) {
        let keep_suffix = self.term_at(index) == Some(term);
        if keep_suffix {
            self.compact_to(index);
        } else {
            self.entries = vec![LogEntry::sentinel(index, term)];
        }
    }

    /// `(lastLogTerm, lastLogIndex)` lexicographic comparison used by the
    /// RequestVote up-to-date check.
    pub fn is_at_least_as_up_to_date_as(&self, other_term: Term, other_index: LogIndex) -> bool {
        (other_term, other_index) >= (self.last_term(), self.last_index())
    }
}

impl Default for RaftLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: LogIndex, term: Term) -> LogEntry {
        LogEntry {
            index,
            term,
            command: vec![],
        }
    }

    #[test]
    fn fresh_log_has_only_sentinel() {
        let log = RaftLog::new();
        assert_eq!(log.base_index(), 0);
        assert_eq!(log.last_index(), 0);
        assert!(log.get(1).is_none());
    }

    #[test]
    fn append_and_lookup() {
        let mut log = RaftLog::new();
        log.append(entry(1, 1));
        log.append(entry(2, 1));
        assert_eq!(log.last_index(), 2);
        assert_eq!(log.term_at(1), Some(1));
        assert_eq!(log.term_at(2), Some(1));
        assert_eq!(log.term_at(3), None);
    }

    #[test]
    fn truncate_from_drops_suffix() {
        let mut log = RaftLog::new();
        log.append(entry(1, 1));
        log.append(entry(2, 1));
        log.append(entry(3, 2));
        log.truncate_from(2);
        assert_eq!(log.last_index(), 1);
    }

    #[test]
    fn compact_to_keeps_tail() {
        let mut log = RaftLog::new();
        log.append(entry(1, 1));
        log.append(entry(2, 1));
        log.append(entry(3, 2));
        log.compact_to(2);
        assert_eq!(log.base_index(), 2);
        assert_eq!(log.base_term(), 1);
        assert_eq!(log.get(2).unwrap().command.len(), 0);
        assert_eq!(log.term_at(3), Some(2));
        assert_eq!(log.get(1), None);
    }

    #[test]
    fn install_snapshot_discards_on_mismatch() {
        let mut log = RaftLog::new();
        log.append(entry(1, 1));
        log.install_snapshot(5, 3);
        assert_eq!(log.base_index(), 5);
        assert_eq!(log.base_term(), 3);
        assert_eq!(log.last_index(), 5);
    }

    #[test]
    fn install_snapshot_keeps_matching_suffix() {
        let mut log = RaftLog::new();
        log.append(entry(1, 1));
        log.append(entry(2, 2));
        log.append(entry(3, 2));
        log.install_snapshot(2, 2);
        assert_eq!(log.base_index(), 2);
        assert_eq!(log.last_index(), 3);
        assert_eq!(log.term_at(3), Some(2));
    }
}
