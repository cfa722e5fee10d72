// store/memory.rs
//! Pure in-memory event store for fast testing
//!
//! Implements the store client traits on top of a shared `HashMap` state.
//! Every writer and transaction handle created from one `MemoryStore` sees
//! the same state, so a sink can be dropped and rebuilt against the same
//! store to simulate a process restart.
//!
//! Besides the store semantics it offers fault injection (rejected writes,
//! failing commits, expired transactions) and inspection helpers for tests.
//!
//! # Examples
//!
//! ```rust
//! use streamsink_core::store::{EventStore, MemoryStore};
//! use streamsink_core::{StreamId, TxnConfig};
//!
//! let store = MemoryStore::new();
//! let stream = StreamId::new("scope", "events");
//! let mut writer = store.create_writer(&stream).unwrap();
//!
//! let mut txn = writer.begin_txn(&TxnConfig::default()).unwrap();
//! txn.write_event("key", b"hello".to_vec()).unwrap();
//! txn.commit().unwrap();
//!
//! assert_eq!(store.committed_events(&stream).len(), 1);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::config::{StreamId, TxnConfig};
use crate::error::{Result, SinkError};

use super::{
    EventStore, EventStreamWriter, StoredEvent, Transaction, TransactionStatus, TxnId, WriteAck,
    WriteCompleter,
};

/// When direct (non-transactional) writes are acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckPolicy {
    /// Acknowledge inside `write_event`
    Immediate,
    /// Hold acknowledgements until the writer is flushed
    OnFlush,
}

impl Default for AckPolicy {
    fn default() -> Self {
        AckPolicy::Immediate
    }
}

struct TxnRecord {
    stream: StreamId,
    status: TransactionStatus,
    /// Written but not yet flushed
    buffered: Vec<StoredEvent>,
    /// Flushed, invisible until commit
    durable: Vec<StoredEvent>,
    deadline: Instant,
    expired: bool,
}

impl TxnRecord {
    /// Apply the store-side timeout lazily
    fn refresh(&mut self) {
        if self.status == TransactionStatus::Open && Instant::now() >= self.deadline {
            self.expire();
        }
    }

    fn expire(&mut self) {
        self.status = TransactionStatus::Aborted;
        self.expired = true;
        self.buffered.clear();
        self.durable.clear();
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

#[derive(Default)]
struct Faults {
    fail_write_at: HashSet<usize>,
    fail_commit: HashSet<TxnId>,
    fail_begin: bool,
    fail_abort: bool,
    fail_close: bool,
}

#[derive(Default)]
struct StoreState {
    streams: HashMap<StreamId, Vec<StoredEvent>>,
    txns: HashMap<TxnId, TxnRecord>,
    commit_order: Vec<TxnId>,
    direct_writes: usize,
    ack_policy: AckPolicy,
    faults: Faults,
    open_writers: usize,
}

impl StoreState {
    fn record_mut(&mut self, id: TxnId) -> Result<&mut TxnRecord> {
        let record = self
            .txns
            .get_mut(&id)
            .ok_or(SinkError::TransactionNotFound(id))?;
        record.refresh();
        Ok(record)
    }
}

/// In-memory event store (testing)
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ack_policy(policy: AckPolicy) -> Self {
        let store = Self::new();
        store.set_ack_policy(policy);
        store
    }

    pub fn set_ack_policy(&self, policy: AckPolicy) {
        self.state.lock().ack_policy = policy;
    }

    // ========================================================================
    // FAULT INJECTION
    // ========================================================================

    /// Reject the n-th direct write (1-based, counted across all writers)
    pub fn fail_write_at(&self, n: usize) {
        self.state.lock().faults.fail_write_at.insert(n);
    }

    /// Make `commit` of the given transaction fail
    pub fn fail_commit(&self, id: TxnId) {
        self.state.lock().faults.fail_commit.insert(id);
    }

    pub fn fail_begin(&self, fail: bool) {
        self.state.lock().faults.fail_begin = fail;
    }

    pub fn fail_abort(&self, fail: bool) {
        self.state.lock().faults.fail_abort = fail;
    }

    pub fn fail_close(&self, fail: bool) {
        self.state.lock().faults.fail_close = fail;
    }

    /// Time out an open transaction now
    pub fn expire(&self, id: TxnId) {
        if let Some(record) = self.state.lock().txns.get_mut(&id) {
            if record.status == TransactionStatus::Open {
                record.expire();
            }
        }
    }

    /// Overwrite the status of a transaction (e.g. to simulate an in-progress commit)
    pub fn force_status(&self, id: TxnId, status: TransactionStatus) {
        if let Some(record) = self.state.lock().txns.get_mut(&id) {
            record.status = status;
        }
    }

    // ========================================================================
    // INSPECTION
    // ========================================================================

    /// Events visible to readers of the stream, in commit order
    pub fn committed_events(&self, stream: &StreamId) -> Vec<StoredEvent> {
        self.state
            .lock()
            .streams
            .get(stream)
            .cloned()
            .unwrap_or_default()
    }

    /// Transactions in the order they were committed
    pub fn commit_order(&self) -> Vec<TxnId> {
        self.state.lock().commit_order.clone()
    }

    pub fn status_of(&self, id: TxnId) -> Option<TransactionStatus> {
        let mut state = self.state.lock();
        state.txns.get_mut(&id).map(|record| {
            record.refresh();
            record.status
        })
    }

    /// Ids of all transactions still open
    pub fn open_transactions(&self) -> Vec<TxnId> {
        let mut state = self.state.lock();
        let mut open: Vec<TxnId> = state
            .txns
            .iter_mut()
            .filter_map(|(id, record)| {
                record.refresh();
                (record.status == TransactionStatus::Open).then_some(*id)
            })
            .collect();
        open.sort();
        open
    }

    /// Number of flushed (durable but invisible) events in a transaction
    pub fn durable_event_count(&self, id: TxnId) -> usize {
        self.state
            .lock()
            .txns
            .get(&id)
            .map(|record| record.durable.len())
            .unwrap_or(0)
    }

    /// Stream writers created and not yet closed
    pub fn open_writers(&self) -> usize {
        self.state.lock().open_writers
    }
}

impl EventStore for MemoryStore {
    fn create_writer(&self, stream: &StreamId) -> Result<Box<dyn EventStreamWriter>> {
        let mut state = self.state.lock();
        state.streams.entry(stream.clone()).or_default();
        state.open_writers += 1;

        Ok(Box::new(MemoryStreamWriter {
            stream: stream.clone(),
            state: Arc::clone(&self.state),
            unacked: Vec::new(),
            closed: false,
        }))
    }
}

struct UnackedWrite {
    seq: usize,
    event: StoredEvent,
    completer: WriteCompleter,
    rejected: bool,
}

struct MemoryStreamWriter {
    stream: StreamId,
    state: Arc<Mutex<StoreState>>,
    unacked: Vec<UnackedWrite>,
    closed: bool,
}

impl MemoryStreamWriter {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(SinkError::StoreClosed);
        }
        Ok(())
    }
}

fn rejected_write(n: usize) -> SinkError {
    SinkError::WriteRejected(format!("injected failure for write #{}", n))
}

impl EventStreamWriter for MemoryStreamWriter {
    fn write_event(&mut self, routing_key: &str, payload: Vec<u8>) -> WriteAck {
        if self.closed {
            return WriteAck::ready(Err(SinkError::StoreClosed));
        }

        let mut state = self.state.lock();
        state.direct_writes += 1;
        let n = state.direct_writes;
        let rejected = state.faults.fail_write_at.contains(&n);
        let event = StoredEvent::new(routing_key, payload);

        match state.ack_policy {
            AckPolicy::Immediate => {
                if rejected {
                    return WriteAck::ready(Err(rejected_write(n)));
                }
                state.streams.entry(self.stream.clone()).or_default().push(event);
                WriteAck::ready(Ok(()))
            }
            AckPolicy::OnFlush => {
                let (completer, ack) = WriteAck::pending();
                self.unacked.push(UnackedWrite {
                    seq: n,
                    event,
                    completer,
                    rejected,
                });
                ack
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;

        let mut state = self.state.lock();
        for write in self.unacked.drain(..) {
            if write.rejected {
                write.completer.complete(Err(rejected_write(write.seq)));
            } else {
                state.streams.entry(self.stream.clone()).or_default().push(write.event);
                write.completer.complete(Ok(()));
            }
        }
        Ok(())
    }

    fn begin_txn(&mut self, config: &TxnConfig) -> Result<Box<dyn Transaction>> {
        self.ensure_open()?;

        let mut state = self.state.lock();
        if state.faults.fail_begin {
            return Err(SinkError::WriteRejected("injected failure opening transaction".to_string()));
        }

        let id = TxnId::new();
        state.txns.insert(
            id,
            TxnRecord {
                stream: self.stream.clone(),
                status: TransactionStatus::Open,
                buffered: Vec::new(),
                durable: Vec::new(),
                deadline: Instant::now() + config.timeout(),
                expired: false,
            },
        );

        Ok(Box::new(MemoryTransaction {
            id,
            state: Arc::clone(&self.state),
        }))
    }

    fn get_txn(&mut self, id: TxnId) -> Result<Box<dyn Transaction>> {
        self.ensure_open()?;

        if !self.state.lock().txns.contains_key(&id) {
            return Err(SinkError::TransactionNotFound(id));
        }
        Ok(Box::new(MemoryTransaction {
            id,
            state: Arc::clone(&self.state),
        }))
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // Unflushed acks resolve as StoreClosed when their completers drop
        self.unacked.clear();

        let mut state = self.state.lock();
        state.open_writers = state.open_writers.saturating_sub(1);
        if state.faults.fail_close {
            return Err(SinkError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "injected failure closing writer",
            )));
        }
        Ok(())
    }
}

struct MemoryTransaction {
    id: TxnId,
    state: Arc<Mutex<StoreState>>,
}

impl Transaction for MemoryTransaction {
    fn id(&self) -> TxnId {
        self.id
    }

    fn write_event(&mut self, routing_key: &str, payload: Vec<u8>) -> Result<()> {
        let id = self.id;
        let mut state = self.state.lock();
        let record = state.record_mut(id)?;
        if record.status != TransactionStatus::Open {
            return Err(record.not_open(id));
        }
        record.buffered.push(StoredEvent::new(routing_key, payload));
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let id = self.id;
        let mut state = self.state.lock();
        let record = state.record_mut(id)?;
        if record.status != TransactionStatus::Open {
            return Err(record.not_open(id));
        }
        let buffered = std::mem::take(&mut record.buffered);
        record.durable.extend(buffered);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let id = self.id;
        let mut state = self.state.lock();
        if state.faults.fail_commit.contains(&id) {
            return Err(SinkError::WriteRejected(format!(
                "injected failure committing transaction {}",
                id
            )));
        }

        let record = state.record_mut(id)?;
        match record.status {
            TransactionStatus::Open => {}
            TransactionStatus::Committing | TransactionStatus::Committed => return Ok(()),
            _ => return Err(record.not_open(id)),
        }

        record.status = TransactionStatus::Committed;
        let mut events = std::mem::take(&mut record.durable);
        events.append(&mut record.buffered);
        let stream = record.stream.clone();

        state.streams.entry(stream).or_default().extend(events);
        state.commit_order.push(id);
        Ok(())
    }

    fn abort(&mut self) -> Result<()> {
        let id = self.id;
        let mut state = self.state.lock();
        if state.faults.fail_abort {
            return Err(SinkError::WriteRejected(format!(
                "injected failure aborting transaction {}",
                id
            )));
        }

        let record = state.record_mut(id)?;
        match record.status {
            TransactionStatus::Open | TransactionStatus::Aborting => {
                record.status = TransactionStatus::Aborted;
                record.buffered.clear();
                record.durable.clear();
                Ok(())
            }
            TransactionStatus::Aborted => Ok(()),
            status => Err(SinkError::TransactionNotOpen { id, status }),
        }
    }

    fn check_status(&self) -> Result<TransactionStatus> {
        let mut state = self.state.lock();
        Ok(state.record_mut(self.id)?.status)
    }
}
