// wal/mod.rs
// Append-only log used by `LogStore`
//
// This module provides:
// - `WALEntry` and `WALEntryType`: Record types and serialization
// - `WALEntryIterator`: Streaming reader with torn-tail detection
// - `WriteAheadLog`: Log file manager (append, flush, truncate)
// - `TransactionGrouper`: Commit-order replay
// - `CommittedTransaction`: One visible batch of events

mod entry;
mod reader;
mod recovery;
mod writer;

pub use entry::{WALEntry, WALEntryType, MAX_WAL_ENTRY_SIZE, WAL_CHECKSUM_SIZE, WAL_HEADER_SIZE};
pub use reader::WALEntryIterator;
pub use recovery::{CommittedTransaction, TransactionGrouper};
pub use writer::WriteAheadLog;
