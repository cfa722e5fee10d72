// wal/recovery.rs
// Commit-order replay of a log

use std::collections::HashMap;

use crate::error::Result;
use crate::store::TxnId;

use super::entry::{WALEntry, WALEntryType};

/// A batch of events that became visible at one point of the log
///
/// Either a committed transaction (all its event records) or a single
/// direct write (`id` is nil).
#[derive(Debug)]
pub struct CommittedTransaction {
    pub id: TxnId,
    pub entries: Vec<WALEntry>,
}

impl CommittedTransaction {
    /// True for a non-transactional write
    pub fn is_direct(&self) -> bool {
        self.id.is_nil()
    }

    /// Event records (excluding Begin/Commit markers)
    pub fn events(&self) -> impl Iterator<Item = &WALEntry> {
        self.entries
            .iter()
            .filter(|e| e.entry_type == WALEntryType::Event)
    }

    pub fn event_count(&self) -> usize {
        self.events().count()
    }
}

/// Streaming transaction grouper
///
/// Yields visible batches in the order readers would observe them:
/// direct writes at their own position, transactional events at their
/// commit marker. Aborted and still-open transactions are never yielded.
/// Memory usage: O(open transactions) instead of O(all records)
///
/// Example:
/// ```ignore
/// let iter = WALEntryIterator::new(reader)?;
/// for batch in TransactionGrouper::new(iter) {
///     let batch = batch?;
///     // Deliver batch.events()
/// }
/// ```
pub struct TransactionGrouper<I: Iterator<Item = Result<WALEntry>>> {
    source: I,
    active: HashMap<TxnId, Vec<WALEntry>>,
}

impl<I: Iterator<Item = Result<WALEntry>>> TransactionGrouper<I> {
    /// Create a new transaction grouper from a record iterator
    pub fn new(source: I) -> Self {
        Self {
            source,
            active: HashMap::new(),
        }
    }

    /// Number of transactions begun but neither committed nor aborted so far
    pub fn active_transaction_count(&self) -> usize {
        self.active.len()
    }
}

impl<I: Iterator<Item = Result<WALEntry>>> Iterator for TransactionGrouper<I> {
    type Item = Result<CommittedTransaction>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.source.next()? {
                Ok(entry) => match entry.entry_type {
                    WALEntryType::Event if entry.transaction_id.is_nil() => {
                        return Some(Ok(CommittedTransaction {
                            id: entry.transaction_id,
                            entries: vec![entry],
                        }));
                    }
                    WALEntryType::Begin => {
                        self.active.entry(entry.transaction_id).or_default();
                    }
                    WALEntryType::Event => {
                        // Events of an untracked transaction are orphaned - ignore
                        if let Some(tx) = self.active.get_mut(&entry.transaction_id) {
                            tx.push(entry);
                        }
                    }
                    WALEntryType::Commit => {
                        if let Some(entries) = self.active.remove(&entry.transaction_id) {
                            return Some(Ok(CommittedTransaction {
                                id: entry.transaction_id,
                                entries,
                            }));
                        }
                    }
                    WALEntryType::Abort => {
                        self.active.remove(&entry.transaction_id);
                    }
                },
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::wal::reader::WALEntryIterator;

    fn create_test_iterator(entries: Vec<WALEntry>) -> WALEntryIterator<Cursor<Vec<u8>>> {
        let mut data = Vec::new();
        for entry in &entries {
            data.extend_from_slice(&entry.serialize());
        }
        WALEntryIterator::new(Cursor::new(data)).unwrap()
    }

    #[test]
    fn test_grouper_commits_only() {
        let tx = TxnId::new();
        let iter = create_test_iterator(vec![
            WALEntry::new(tx, WALEntryType::Begin, vec![]),
            WALEntry::new(tx, WALEntryType::Event, b"ev1".to_vec()),
            WALEntry::new(tx, WALEntryType::Commit, vec![]),
        ]);
        let mut grouper = TransactionGrouper::new(iter);

        let batch = grouper.next().unwrap().unwrap();
        assert_eq!(batch.id, tx);
        assert!(!batch.is_direct());
        assert_eq!(batch.entries.len(), 1); // Only the event, not Begin/Commit
        assert_eq!(batch.event_count(), 1);

        assert!(grouper.next().is_none());
    }

    #[test]
    fn test_grouper_discards_aborted_and_open() {
        let (aborted, open) = (TxnId::new(), TxnId::new());
        let iter = create_test_iterator(vec![
            WALEntry::new(aborted, WALEntryType::Begin, vec![]),
            WALEntry::new(aborted, WALEntryType::Event, b"ev1".to_vec()),
            WALEntry::new(aborted, WALEntryType::Abort, vec![]),
            WALEntry::new(open, WALEntryType::Begin, vec![]),
            WALEntry::new(open, WALEntryType::Event, b"ev2".to_vec()),
        ]);
        let mut grouper = TransactionGrouper::new(iter);

        assert!(grouper.next().is_none());
        assert_eq!(grouper.active_transaction_count(), 1);
    }

    #[test]
    fn test_grouper_orders_by_commit_point() {
        let (t1, t2) = (TxnId::new(), TxnId::new());
        let iter = create_test_iterator(vec![
            WALEntry::new(t1, WALEntryType::Begin, vec![]),
            WALEntry::new(t2, WALEntryType::Begin, vec![]),
            WALEntry::new(t1, WALEntryType::Event, b"t1-a".to_vec()),
            WALEntry::new(t2, WALEntryType::Event, b"t2-a".to_vec()),
            WALEntry::new(TxnId::nil(), WALEntryType::Event, b"direct".to_vec()),
            WALEntry::new(t2, WALEntryType::Commit, vec![]),
            WALEntry::new(t1, WALEntryType::Event, b"t1-b".to_vec()),
            WALEntry::new(t1, WALEntryType::Commit, vec![]),
        ]);
        let results: Vec<_> = TransactionGrouper::new(iter).map(|r| r.unwrap()).collect();

        assert_eq!(results.len(), 3);
        assert!(results[0].is_direct());
        assert_eq!(results[1].id, t2);
        assert_eq!(results[2].id, t1);
        assert_eq!(results[2].event_count(), 2);
    }

    #[test]
    fn test_grouper_ignores_orphans() {
        let tx = TxnId::new();
        let iter = create_test_iterator(vec![
            WALEntry::new(tx, WALEntryType::Event, b"no begin".to_vec()),
            WALEntry::new(tx, WALEntryType::Commit, vec![]),
        ]);
        assert_eq!(TransactionGrouper::new(iter).count(), 0);
    }
}
