// streamsink-core/src/checkpoint.rs
//! Contracts between the sink and the host engine's checkpoint mechanism
//!
//! The host drives two capabilities:
//! - `CheckpointedState`: produce serializable state at a barrier and hand it
//!   back after a restart
//! - `CheckpointListener`: learn, asynchronously, that a checkpoint is durable.
//!   Notifications may be delayed, skipped, or coalesced, but never arrive
//!   out of checkpoint-id order for one instance.
//!
//! The host serializes every call to one sink instance; all methods take
//! `&mut self`.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::TxnId;

/// Host-assigned checkpoint id, monotonically increasing per job
pub type CheckpointId = u64;

/// Produces and restores the state the host persists on the sink's behalf
pub trait CheckpointedState {
    type State;

    /// Called at a checkpoint barrier
    fn snapshot_state(&mut self, checkpoint_id: CheckpointId, timestamp: i64) -> Result<Self::State>;

    /// Called after a restart, before any event is written.
    /// `None` when no state was ever snapshotted for this instance.
    fn restore_state(&mut self, state: Option<Self::State>) -> Result<()>;
}

/// Receives confirmation that a previously snapshotted checkpoint is durable
pub trait CheckpointListener {
    fn notify_checkpoint_complete(&mut self, checkpoint_id: CheckpointId) -> Result<()>;
}

/// What the sink may ask the host about the running job
pub trait RuntimeContext: Send + Sync {
    fn is_checkpointing_enabled(&self) -> bool;

    /// Human-readable name of the task, used as a log prefix
    fn task_name(&self) -> String;
}

/// Fixed answers, for hosts without a richer context and for tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticRuntimeContext {
    pub checkpointing_enabled: bool,
    pub task_name: String,
}

impl StaticRuntimeContext {
    pub fn new(task_name: impl Into<String>, checkpointing_enabled: bool) -> Self {
        StaticRuntimeContext {
            checkpointing_enabled,
            task_name: task_name.into(),
        }
    }
}

impl RuntimeContext for StaticRuntimeContext {
    fn is_checkpointing_enabled(&self) -> bool {
        self.checkpointing_enabled
    }

    fn task_name(&self) -> String {
        self.task_name.clone()
    }
}

/// Snapshot payload: ids of transactions still awaiting commit, oldest first
///
/// This is the only state the host persists for the sink. It must be handed
/// back to `restore_state` unchanged. The nil id marks an empty slot and is
/// skipped on restore.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PendingTransactions(Vec<TxnId>);

impl PendingTransactions {
    pub fn new(ids: Vec<TxnId>) -> Self {
        PendingTransactions(ids)
    }

    pub fn empty() -> Self {
        PendingTransactions(Vec::new())
    }

    pub fn ids(&self) -> &[TxnId] {
        &self.0
    }

    pub fn into_ids(self) -> Vec<TxnId> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge the states of several instances (e.g. after a scale-in)
    pub fn merge(states: impl IntoIterator<Item = PendingTransactions>) -> Self {
        PendingTransactions(states.into_iter().flat_map(|s| s.0).collect())
    }

    /// Opaque bytes for hosts that persist raw blobs
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl From<Vec<TxnId>> for PendingTransactions {
    fn from(ids: Vec<TxnId>) -> Self {
        PendingTransactions(ids)
    }
}
