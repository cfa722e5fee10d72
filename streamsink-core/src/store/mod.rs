// src/store/mod.rs
//! Store client abstraction
//!
//! The sink never talks to a concrete event store. It consumes the traits in
//! this module, which enables:
//! - Dependency injection of one store connection per sink instance
//! - Easy testing with `MemoryStore`
//! - Durable local operation with `LogStore`
//!
//! # Architecture
//!
//! ```text
//! EventStore (connection handle, injected)
//!   └── EventStreamWriter (one per stream, owned by the writer strategy)
//!         ├── write_event -> WriteAck (asynchronous direct write)
//!         └── begin_txn / get_txn -> Transaction (atomic batch)
//! ```

pub mod log_store;
pub mod memory;

pub use log_store::LogStore;
pub use memory::{AckPolicy, MemoryStore};

use std::fmt;

use crossbeam::channel::{self, Receiver, Sender};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{StreamId, TxnConfig};
use crate::error::{Result, SinkError};

/// Store-assigned transaction id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxnId(Uuid);

impl TxnId {
    /// Fresh random id
    pub fn new() -> Self {
        TxnId(Uuid::new_v4())
    }

    /// The nil id, standing in for a missing entry
    pub fn nil() -> Self {
        TxnId(Uuid::nil())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        TxnId(uuid)
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        TxnId(Uuid::from_bytes(bytes))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for TxnId {
    fn default() -> Self {
        TxnId::nil()
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Store-side transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    Open,
    Committing,
    Committed,
    Aborting,
    Aborted,
}

impl TransactionStatus {
    /// Commit was requested or has finished
    pub fn is_committed(&self) -> bool {
        matches!(self, TransactionStatus::Committing | TransactionStatus::Committed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Committed | TransactionStatus::Aborted)
    }
}

/// One event as the store persists it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub routing_key: String,
    pub payload: Vec<u8>,
}

impl StoredEvent {
    pub fn new(routing_key: impl Into<String>, payload: Vec<u8>) -> Self {
        StoredEvent {
            routing_key: routing_key.into(),
            payload,
        }
    }
}

/// Completion side of a `WriteAck`, held by the store
pub struct WriteCompleter {
    sender: Sender<Result<()>>,
}

impl WriteCompleter {
    /// Deliver the outcome. A dropped `WriteAck` is not an error.
    pub fn complete(self, result: Result<()>) {
        let _ = self.sender.send(result);
    }
}

/// Acknowledgement of one asynchronous direct write
///
/// Resolves exactly once. A completer dropped without completing resolves the
/// ack with `StoreClosed`.
pub struct WriteAck {
    receiver: Receiver<Result<()>>,
}

impl WriteAck {
    /// Create an unresolved ack and the handle that resolves it
    pub fn pending() -> (WriteCompleter, WriteAck) {
        let (sender, receiver) = channel::bounded(1);
        (WriteCompleter { sender }, WriteAck { receiver })
    }

    /// Create an already resolved ack
    pub fn ready(result: Result<()>) -> WriteAck {
        let (completer, ack) = WriteAck::pending();
        completer.complete(result);
        ack
    }

    /// Block until the write is acknowledged or failed
    pub fn wait(self) -> Result<()> {
        match self.receiver.recv() {
            Ok(result) => result,
            Err(_) => Err(SinkError::StoreClosed),
        }
    }

    /// Non-blocking probe; `None` while the write is still in flight
    pub fn try_result(&self) -> Option<Result<()>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(channel::TryRecvError::Empty) => None,
            Err(channel::TryRecvError::Disconnected) => Some(Err(SinkError::StoreClosed)),
        }
    }
}

/// Handle to one store-side transaction
pub trait Transaction: Send {
    fn id(&self) -> TxnId;

    /// Buffer an event inside the transaction
    fn write_event(&mut self, routing_key: &str, payload: Vec<u8>) -> Result<()>;

    /// Make buffered events durable without making them visible
    fn flush(&mut self) -> Result<()>;

    /// Make all events of the transaction visible atomically
    fn commit(&mut self) -> Result<()>;

    fn abort(&mut self) -> Result<()>;

    fn check_status(&self) -> Result<TransactionStatus>;
}

/// Writer bound to one stream
pub trait EventStreamWriter: Send {
    /// Issue an asynchronous, non-transactional write
    fn write_event(&mut self, routing_key: &str, payload: Vec<u8>) -> WriteAck;

    /// Block until every write issued so far is acknowledged
    fn flush(&mut self) -> Result<()>;

    /// Open a new transaction on this stream
    fn begin_txn(&mut self, config: &TxnConfig) -> Result<Box<dyn Transaction>>;

    /// Reopen a transaction from a previously known id
    fn get_txn(&mut self, id: TxnId) -> Result<Box<dyn Transaction>>;

    fn close(&mut self) -> Result<()>;
}

/// Store connection, created once by the caller and injected into the sink
pub trait EventStore: Send + Sync {
    fn create_writer(&self, stream: &StreamId) -> Result<Box<dyn EventStreamWriter>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_txn_id_nil_and_display() {
        assert!(TxnId::nil().is_nil());
        assert!(!TxnId::new().is_nil());

        let id = TxnId::new();
        assert_eq!(TxnId::from_bytes(*id.as_bytes()), id);
        assert_eq!(id.to_string(), id.as_uuid().to_string());
    }

    #[test]
    fn test_status_predicates() {
        assert!(TransactionStatus::Committing.is_committed());
        assert!(TransactionStatus::Committed.is_committed());
        assert!(!TransactionStatus::Open.is_committed());
        assert!(TransactionStatus::Aborted.is_terminal());
        assert!(!TransactionStatus::Aborting.is_terminal());
    }

    #[test]
    fn test_write_ack_ready() {
        assert!(WriteAck::ready(Ok(())).wait().is_ok());

        let ack = WriteAck::ready(Err(SinkError::WriteRejected("full".into())));
        assert!(matches!(ack.wait(), Err(SinkError::WriteRejected(_))));
    }

    #[test]
    fn test_write_ack_pending_across_threads() {
        let (completer, ack) = WriteAck::pending();
        assert!(ack.try_result().is_none());

        let handle = std::thread::spawn(move || completer.complete(Ok(())));
        assert!(ack.wait().is_ok());
        handle.join().unwrap();
    }

    #[test]
    fn test_dropped_completer_resolves_ack() {
        let (completer, ack) = WriteAck::pending();
        drop(completer);
        assert!(matches!(ack.wait(), Err(SinkError::StoreClosed)));
    }
}
