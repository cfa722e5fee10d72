// store/log_store.rs
//! File-backed event store
//!
//! Each stream is one append-only log file under the store directory
//! (`<dir>/<scope>/<stream>.log`). Transactions are recorded as
//! Begin / Event* / Commit|Abort records, direct writes as Event records
//! with a nil transaction id.
//!
//! # Architecture
//!
//! ```text
//! LogStore (Arc<Mutex<..>>, shared by all writers and transaction handles)
//!   └── StreamLog (one per stream)
//!         ├── WriteAheadLog (the file)
//!         └── transaction index (status, deadline, unflushed events)
//! ```
//!
//! The transaction index is rebuilt from the file on open, so a transaction
//! left open by a crashed process can be committed by the next one, as long
//! as its timeout has not passed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{StreamId, TxnConfig};
use crate::error::{Result, SinkError};
use crate::wal::{TransactionGrouper, WALEntry, WALEntryType, WriteAheadLog};

use super::{
    EventStore, EventStreamWriter, StoredEvent, Transaction, TransactionStatus, TxnId, WriteAck,
};

/// Payload of a Begin record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct TxnHeader {
    opened_at_millis: i64,
    timeout_millis: u64,
    max_time_millis: u64,
    grace_period_millis: u64,
}

impl TxnHeader {
    fn deadline_millis(&self) -> i64 {
        self.opened_at_millis
            .saturating_add(i64::try_from(self.timeout_millis).unwrap_or(i64::MAX))
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

struct TxnMeta {
    status: TransactionStatus,
    deadline_millis: i64,
    expired: bool,
    /// Encoded events written but not yet flushed to the log
    buffered: Vec<Vec<u8>>,
}

impl TxnMeta {
    fn refresh(&mut self) {
        if self.status == TransactionStatus::Open && now_millis() >= self.deadline_millis {
            self.status = TransactionStatus::Aborted;
            self.expired = true;
            self.buffered.clear();
        }
    }

    fn not_open(&self, id: TxnId) -> SinkError {
        if self.expired {
            SinkError::TransactionExpired(id)
        } else {
            SinkError::TransactionNotOpen {
                id,
                status: self.status,
            }
        }
    }
}

struct StreamLog {
    wal: WriteAheadLog,
    txns: HashMap<TxnId, TxnMeta>,
}

impl StreamLog {
    /// Open the log file and rebuild the transaction index
    fn load(path: &Path) -> Result<Self> {
        let mut wal = WriteAheadLog::open(path)?;
        let mut txns: HashMap<TxnId, TxnMeta> = HashMap::new();

        let mut iter = wal.entries()?;
        for entry in iter.by_ref() {
            let entry = entry?;
            match entry.entry_type {
                WALEntryType::Begin => {
                    let header: TxnHeader = bincode::deserialize(&entry.data)?;
                    txns.insert(
                        entry.transaction_id,
                        TxnMeta {
                            status: TransactionStatus::Open,
                            deadline_millis: header.deadline_millis(),
                            expired: false,
                            buffered: Vec::new(),
                        },
                    );
                }
                WALEntryType::Commit => {
                    if let Some(meta) = txns.get_mut(&entry.transaction_id) {
                        meta.status = TransactionStatus::Committed;
                    }
                }
                WALEntryType::Abort => {
                    if let Some(meta) = txns.get_mut(&entry.transaction_id) {
                        meta.status = TransactionStatus::Aborted;
                    }
                }
                WALEntryType::Event => {}
            }
        }

        let valid_len = iter.valid_len();
        if valid_len < wal.len() {
            warn!(
                path = %path.display(),
                valid_len,
                file_len = wal.len(),
                "dropping torn tail of event log"
            );
            wal.truncate(valid_len)?;
        }

        for meta in txns.values_mut() {
            meta.refresh();
        }

        debug!(path = %path.display(), transactions = txns.len(), "loaded event log");
        Ok(StreamLog { wal, txns })
    }

    fn meta_mut(&mut self, id: TxnId) -> Result<&mut TxnMeta> {
        let meta = self
            .txns
            .get_mut(&id)
            .ok_or(SinkError::TransactionNotFound(id))?;
        meta.refresh();
        Ok(meta)
    }

    /// Append the unflushed events of an open transaction, plus an optional marker
    ///
    /// The events leave the buffer only once they are durable. On failure the
    /// log is cut back to where it was and the buffer is left intact.
    fn persist(&mut self, id: TxnId, marker: Option<WALEntryType>) -> Result<()> {
        let meta = self.meta_mut(id)?;
        if meta.status != TransactionStatus::Open {
            return Err(meta.not_open(id));
        }

        let buffered = std::mem::take(&mut meta.buffered);
        let event_count = buffered.len();
        let mut records: Vec<WALEntry> = buffered
            .into_iter()
            .map(|data| WALEntry::new(id, WALEntryType::Event, data))
            .collect();
        if let Some(entry_type) = marker {
            records.push(WALEntry::new(id, entry_type, Vec::new()));
        }

        let start = self.wal.len();
        let written = if records.is_empty() {
            Ok(())
        } else {
            self.wal.append_batch(&records).map(|_| ())
        };
        match written.and_then(|()| self.wal.flush()) {
            Ok(()) => Ok(()),
            Err(err) => {
                if self.wal.len() > start {
                    if let Err(cut) = self.wal.truncate(start) {
                        warn!(txn = %id, error = %cut, "rollback of failed flush failed");
                    }
                }
                if let Some(meta) = self.txns.get_mut(&id) {
                    meta.buffered = records
                        .into_iter()
                        .take(event_count)
                        .map(|record| record.data)
                        .collect();
                }
                Err(err)
            }
        }
    }
}

struct LogStoreInner {
    dir: PathBuf,
    streams: HashMap<StreamId, StreamLog>,
}

impl LogStoreInner {
    fn stream_mut(&mut self, stream: &StreamId) -> Result<&mut StreamLog> {
        if !self.streams.contains_key(stream) {
            let scope_dir = self.dir.join(&stream.scope);
            std::fs::create_dir_all(&scope_dir)?;
            let log = StreamLog::load(&scope_dir.join(format!("{}.log", stream.stream)))?;
            self.streams.insert(stream.clone(), log);
        }
        self.streams
            .get_mut(stream)
            .ok_or_else(|| SinkError::invalid_state(format!("stream {} not loaded", stream)))
    }
}

/// Durable, file-backed event store
#[derive(Clone)]
pub struct LogStore {
    inner: Arc<Mutex<LogStoreInner>>,
}

impl LogStore {
    /// Open or create a store rooted at `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        Ok(LogStore {
            inner: Arc::new(Mutex::new(LogStoreInner {
                dir,
                streams: HashMap::new(),
            })),
        })
    }

    /// Path of the log file backing `stream`
    pub fn log_path(&self, stream: &StreamId) -> PathBuf {
        self.inner
            .lock()
            .dir
            .join(&stream.scope)
            .join(format!("{}.log", stream.stream))
    }

    /// Events visible to readers, in commit order
    pub fn read_committed(&self, stream: &StreamId) -> Result<Vec<StoredEvent>> {
        let mut inner = self.inner.lock();
        let log = inner.stream_mut(stream)?;

        let mut events = Vec::new();
        for batch in TransactionGrouper::new(log.wal.entries()?) {
            for entry in batch?.events() {
                events.push(bincode::deserialize(&entry.data)?);
            }
        }
        Ok(events)
    }

    pub fn status_of(&self, stream: &StreamId, id: TxnId) -> Result<Option<TransactionStatus>> {
        let mut inner = self.inner.lock();
        let log = inner.stream_mut(stream)?;
        Ok(log.txns.get_mut(&id).map(|meta| {
            meta.refresh();
            meta.status
        }))
    }
}

impl EventStore for LogStore {
    fn create_writer(&self, stream: &StreamId) -> Result<Box<dyn EventStreamWriter>> {
        self.inner.lock().stream_mut(stream)?;

        Ok(Box::new(LogStreamWriter {
            stream: stream.clone(),
            inner: Arc::clone(&self.inner),
            closed: false,
        }))
    }
}

struct LogStreamWriter {
    stream: StreamId,
    inner: Arc<Mutex<LogStoreInner>>,
    closed: bool,
}

impl LogStreamWriter {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(SinkError::StoreClosed);
        }
        Ok(())
    }

    fn append_direct(&self, event: &StoredEvent) -> Result<()> {
        let record = WALEntry::new(TxnId::nil(), WALEntryType::Event, bincode::serialize(event)?);
        let mut inner = self.inner.lock();
        inner.stream_mut(&self.stream)?.wal.append(&record)?;
        Ok(())
    }
}

impl EventStreamWriter for LogStreamWriter {
    fn write_event(&mut self, routing_key: &str, payload: Vec<u8>) -> WriteAck {
        if self.closed {
            return WriteAck::ready(Err(SinkError::StoreClosed));
        }
        WriteAck::ready(self.append_direct(&StoredEvent::new(routing_key, payload)))
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        let mut inner = self.inner.lock();
        inner.stream_mut(&self.stream)?.wal.flush()
    }

    fn begin_txn(&mut self, config: &TxnConfig) -> Result<Box<dyn Transaction>> {
        self.ensure_open()?;

        let id = TxnId::new();
        let header = TxnHeader {
            opened_at_millis: now_millis(),
            timeout_millis: config.timeout_millis,
            max_time_millis: config.max_time_millis,
            grace_period_millis: config.grace_period_millis,
        };

        let mut inner = self.inner.lock();
        let log = inner.stream_mut(&self.stream)?;
        log.wal
            .append(&WALEntry::new(id, WALEntryType::Begin, bincode::serialize(&header)?))?;
        log.wal.flush()?;
        log.txns.insert(
            id,
            TxnMeta {
                status: TransactionStatus::Open,
                deadline_millis: header.deadline_millis(),
                expired: false,
                buffered: Vec::new(),
            },
        );

        Ok(Box::new(LogTransaction {
            id,
            stream: self.stream.clone(),
            inner: Arc::clone(&self.inner),
        }))
    }

    fn get_txn(&mut self, id: TxnId) -> Result<Box<dyn Transaction>> {
        self.ensure_open()?;

        let mut inner = self.inner.lock();
        if !inner.stream_mut(&self.stream)?.txns.contains_key(&id) {
            return Err(SinkError::TransactionNotFound(id));
        }
        Ok(Box::new(LogTransaction {
            id,
            stream: self.stream.clone(),
            inner: Arc::clone(&self.inner),
        }))
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut inner = self.inner.lock();
        inner.stream_mut(&self.stream)?.wal.flush()
    }
}

struct LogTransaction {
    id: TxnId,
    stream: StreamId,
    inner: Arc<Mutex<LogStoreInner>>,
}

impl Transaction for LogTransaction {
    fn id(&self) -> TxnId {
        self.id
    }

    fn write_event(&mut self, routing_key: &str, payload: Vec<u8>) -> Result<()> {
        let data = bincode::serialize(&StoredEvent::new(routing_key, payload))?;
        WALEntry::ensure_within_limit(data.len())?;

        let mut inner = self.inner.lock();
        let meta = inner.stream_mut(&self.stream)?.meta_mut(self.id)?;
        if meta.status != TransactionStatus::Open {
            return Err(meta.not_open(self.id));
        }
        meta.buffered.push(data);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.stream_mut(&self.stream)?.persist(self.id, None)
    }

    fn commit(&mut self) -> Result<()> {
        let mut inner = self.inner.lock();
        let log = inner.stream_mut(&self.stream)?;

        if log.meta_mut(self.id)?.status.is_committed() {
            return Ok(());
        }
        log.persist(self.id, Some(WALEntryType::Commit))?;
        log.meta_mut(self.id)?.status = TransactionStatus::Committed;
        Ok(())
    }

    fn abort(&mut self) -> Result<()> {
        let mut inner = self.inner.lock();
        let log = inner.stream_mut(&self.stream)?;

        let meta = log.meta_mut(self.id)?;
        match meta.status {
            TransactionStatus::Open => {}
            TransactionStatus::Aborting | TransactionStatus::Aborted => return Ok(()),
            status => return Err(SinkError::TransactionNotOpen { id: self.id, status }),
        }
        meta.buffered.clear();

        log.wal
            .append(&WALEntry::new(self.id, WALEntryType::Abort, Vec::new()))?;
        log.wal.flush()?;
        log.meta_mut(self.id)?.status = TransactionStatus::Aborted;
        Ok(())
    }

    fn check_status(&self) -> Result<TransactionStatus> {
        let mut inner = self.inner.lock();
        Ok(inner.stream_mut(&self.stream)?.meta_mut(self.id)?.status)
    }
}
