// src/sink/mod.rs
//! Writer strategies behind `EventSink`
//!
//! Two strategies share one lifecycle:
//! - `TransactionalWriter`: exactly-once. Events go into a store transaction
//!   that is parked at each checkpoint and committed once the host confirms
//!   the checkpoint.
//! - `AtLeastOnceWriter`: events are written directly and asynchronously; a
//!   checkpoint only waits for every outstanding write to be acknowledged.
//!
//! The host serializes every call to one strategy, so all lifecycle methods
//! take `&mut self`.

pub mod at_least_once;
pub mod callback_pool;
pub mod pending;
pub mod transactional;

pub use at_least_once::AtLeastOnceWriter;
pub use callback_pool::CallbackPool;
pub use pending::{CheckpointBinding, PendingCommitQueue};
pub use transactional::TransactionalWriter;

use crate::checkpoint::{CheckpointId, PendingTransactions};
use crate::error::{Result, SinkError};
use crate::mode::WriterMode;

/// Lifecycle position of a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Uninitialized,
    Active,
    Closed,
}

impl WriterState {
    /// Error unless the writer has been initialized and not yet closed
    pub(crate) fn ensure_active(self, operation: &str) -> Result<()> {
        match self {
            WriterState::Active => Ok(()),
            WriterState::Uninitialized => Err(SinkError::invalid_state(format!(
                "{} called before initialize",
                operation
            ))),
            WriterState::Closed => Err(SinkError::invalid_state(format!(
                "{} called on a closed writer",
                operation
            ))),
        }
    }
}

/// Outcome of reconciling a restored snapshot with the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreStats {
    /// Found open and committed during restore
    pub committed: usize,
    /// Already committing or committed before the restart
    pub already_committed: usize,
    /// Aborted or expired; their events never became visible
    pub lost: usize,
    /// Nil entries in the snapshot
    pub skipped: usize,
}

/// One delivery strategy
pub trait SinkWriter: Send {
    fn mode(&self) -> WriterMode;

    /// Acquire the stream writer and any background resources
    fn initialize(&mut self) -> Result<()>;

    fn write(&mut self, routing_key: &str, payload: Vec<u8>) -> Result<()>;

    /// Called at a checkpoint barrier; returns the state the host persists
    fn snapshot_state(&mut self, checkpoint_id: CheckpointId) -> Result<PendingTransactions>;

    /// Reconcile state from a previous run. Only legal before the first write.
    fn restore_state(&mut self, state: Option<&PendingTransactions>) -> Result<RestoreStats>;

    fn notify_checkpoint_complete(&mut self, checkpoint_id: CheckpointId) -> Result<()>;

    /// Release everything. Every step is attempted even if an earlier one fails.
    fn close(&mut self) -> Result<()>;

    fn state(&self) -> WriterState;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_active() {
        assert!(WriterState::Active.ensure_active("write").is_ok());

        let err = WriterState::Uninitialized.ensure_active("write").unwrap_err();
        assert!(err.to_string().contains("before initialize"));

        let err = WriterState::Closed.ensure_active("snapshot").unwrap_err();
        assert!(err.to_string().contains("closed writer"));
    }
}
