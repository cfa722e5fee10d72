// sink/transactional.rs
//! Exactly-once strategy
//!
//! Keeps one open transaction receiving events. At a checkpoint barrier the
//! transaction is flushed, parked in the pending-commit queue under the
//! checkpoint id, and a fresh one is opened. When the host confirms a
//! checkpoint, every parked transaction it covers is committed in order.
//! After a restart, the ids from the last snapshot are reconciled against
//! the store.
//!
//! # State machine
//!
//! ```text
//! Uninitialized --initialize--> Active --close--> Closed
//!       |                          |
//!       +--restore (once, before the first write)
//! ```

use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use crate::checkpoint::{CheckpointId, PendingTransactions};
use crate::config::{StreamId, TxnConfig, WriterConfig};
use crate::error::{Result, SinkError};
use crate::mode::WriterMode;
use crate::store::{EventStore, EventStreamWriter, Transaction, TransactionStatus, TxnId};

use super::pending::{CheckpointBinding, PendingCommitQueue};
use super::{RestoreStats, SinkWriter, WriterState};

pub struct TransactionalWriter {
    store: Arc<dyn EventStore>,
    stream: StreamId,
    txn_config: TxnConfig,
    name: String,
    writer: Option<Box<dyn EventStreamWriter>>,
    current: Option<Box<dyn Transaction>>,
    pending: PendingCommitQueue,
    /// Highest checkpoint the host has confirmed to this instance
    last_confirmed: Option<CheckpointId>,
    state: WriterState,
    written: bool,
    restored: bool,
}

impl TransactionalWriter {
    pub fn new(store: Arc<dyn EventStore>, config: &WriterConfig, name: impl Into<String>) -> Self {
        TransactionalWriter {
            store,
            stream: config.stream.clone(),
            txn_config: config.txn_config(),
            name: name.into(),
            writer: None,
            current: None,
            pending: PendingCommitQueue::new(),
            last_confirmed: None,
            state: WriterState::Uninitialized,
            written: false,
            restored: false,
        }
    }

    /// Id of the transaction currently receiving events
    pub fn current_transaction_id(&self) -> Option<TxnId> {
        self.current.as_ref().map(|txn| txn.id())
    }

    /// Parked transaction ids, oldest first
    pub fn pending_transaction_ids(&self) -> Vec<TxnId> {
        self.pending.transaction_ids()
    }

    pub fn pending_checkpoints(&self) -> Vec<CheckpointId> {
        self.pending.checkpoint_ids()
    }

    pub fn last_confirmed_checkpoint(&self) -> Option<CheckpointId> {
        self.last_confirmed
    }

    fn begin_txn(&mut self) -> Result<Box<dyn Transaction>> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SinkError::invalid_state("bug: no stream writer"))?;
        let txn = writer.begin_txn(&self.txn_config)?;
        debug!(task = %self.name, txn = %txn.id(), "transaction opened");
        Ok(txn)
    }

    fn reconcile(
        &self,
        writer: &mut dyn EventStreamWriter,
        state: &PendingTransactions,
    ) -> Result<RestoreStats> {
        let mut stats = RestoreStats::default();

        for &id in state.ids() {
            if id.is_nil() {
                stats.skipped += 1;
                continue;
            }

            let mut txn = writer.get_txn(id)?;
            match txn.check_status()? {
                TransactionStatus::Open => {
                    info!(task = %self.name, txn = %id, "committing transaction left open by previous run");
                    txn.commit().map_err(|err| {
                        error!(task = %self.name, txn = %id, error = %err, "commit during restore failed");
                        SinkError::CommitFailed {
                            txn: id,
                            checkpoint_id: None,
                            source: Box::new(err),
                        }
                    })?;
                    stats.committed += 1;
                }
                status if status.is_committed() => {
                    debug!(task = %self.name, txn = %id, ?status, "transaction already committed");
                    stats.already_committed += 1;
                }
                status => {
                    warn!(
                        task = %self.name,
                        txn = %id,
                        ?status,
                        "transaction can no longer be committed, its events are lost"
                    );
                    stats.lost += 1;
                }
            }
        }

        Ok(stats)
    }
}

impl SinkWriter for TransactionalWriter {
    fn mode(&self) -> WriterMode {
        WriterMode::ExactlyOnce
    }

    fn initialize(&mut self) -> Result<()> {
        if self.state != WriterState::Uninitialized {
            return Err(SinkError::invalid_state("writer already initialized"));
        }

        self.writer = Some(self.store.create_writer(&self.stream)?);
        let txn = self.begin_txn()?;
        self.current = Some(txn);
        self.state = WriterState::Active;
        debug!(task = %self.name, stream = %self.stream, "transactional writer initialized");
        Ok(())
    }

    fn write(&mut self, routing_key: &str, payload: Vec<u8>) -> Result<()> {
        self.state.ensure_active("write")?;
        let txn = self
            .current
            .as_mut()
            .ok_or_else(|| SinkError::invalid_state("bug: no current transaction"))?;
        trace!(task = %self.name, txn = %txn.id(), routing_key, "write");
        txn.write_event(routing_key, payload)?;
        self.written = true;
        Ok(())
    }

    fn snapshot_state(&mut self, checkpoint_id: CheckpointId) -> Result<PendingTransactions> {
        self.state.ensure_active("snapshot")?;

        // A barrier may not go behind a parked or an already confirmed checkpoint
        let floor = self.pending.back_checkpoint().max(self.last_confirmed);
        if let Some(floor) = floor {
            if checkpoint_id < floor {
                return Err(SinkError::invalid_state(format!(
                    "checkpoint {} is older than checkpoint {}",
                    checkpoint_id, floor
                )));
            }
        }

        let txn = self.current.as_mut().ok_or_else(|| {
            SinkError::invalid_state(format!(
                "bug: no current transaction at checkpoint {}",
                checkpoint_id
            ))
        })?;
        debug!(task = %self.name, checkpoint_id, txn = %txn.id(), "flushing transaction");
        txn.flush()?;

        if let Some(txn) = self.current.take() {
            let binding = CheckpointBinding::new(txn, checkpoint_id);
            if self.pending.push(binding).is_err() {
                return Err(SinkError::invalid_state(
                    "bug: pending checkpoints out of order",
                ));
            }
        }

        let next = self.begin_txn()?;
        self.current = Some(next);

        let pending = self.pending.transaction_ids();
        debug!(task = %self.name, checkpoint_id, pending = pending.len(), "snapshot taken");
        Ok(PendingTransactions::new(pending))
    }

    fn restore_state(&mut self, state: Option<&PendingTransactions>) -> Result<RestoreStats> {
        if self.state == WriterState::Closed {
            return Err(SinkError::invalid_state("restore called on a closed writer"));
        }
        if self.restored || self.written {
            return Err(SinkError::invalid_state(
                "restore is only allowed once, before the first write",
            ));
        }
        self.restored = true;

        let state = match state {
            Some(state) if !state.is_empty() => state,
            _ => {
                debug!(task = %self.name, "nothing to restore");
                return Ok(RestoreStats::default());
            }
        };

        info!(task = %self.name, transactions = state.len(), "restoring pending transactions");
        let mut writer = self.store.create_writer(&self.stream)?;
        let reconciled = self.reconcile(writer.as_mut(), state);
        let closed = writer.close();

        match (reconciled, closed) {
            (Ok(stats), Ok(())) => {
                info!(
                    task = %self.name,
                    committed = stats.committed,
                    already_committed = stats.already_committed,
                    lost = stats.lost,
                    "restore complete"
                );
                Ok(stats)
            }
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(close_err)) => Err(SinkError::first_or_suppressed(close_err, Some(err))),
        }
    }

    fn notify_checkpoint_complete(&mut self, checkpoint_id: CheckpointId) -> Result<()> {
        self.state.ensure_active("notify_checkpoint_complete")?;

        if self.pending.is_empty() {
            if self.last_confirmed.map_or(false, |last| checkpoint_id <= last) {
                debug!(task = %self.name, checkpoint_id, "checkpoint already confirmed");
                return Ok(());
            }
            error!(
                task = %self.name,
                checkpoint_id,
                "checkpoint confirmed but no transaction is pending"
            );
            return Err(SinkError::invalid_state(format!(
                "bug: no pending transaction for checkpoint {}",
                checkpoint_id
            )));
        }

        self.last_confirmed = self.last_confirmed.max(Some(checkpoint_id));

        if self.pending.front_checkpoint().map_or(false, |front| front > checkpoint_id) {
            debug!(task = %self.name, checkpoint_id, "stale confirmation, nothing to commit");
            return Ok(());
        }

        while let Some(mut binding) = self.pending.pop_due(checkpoint_id) {
            let txn = binding.txn_id();
            let parked_at = binding.checkpoint_id();
            if parked_at != checkpoint_id {
                info!(
                    task = %self.name,
                    checkpoint_id = parked_at,
                    confirmed = checkpoint_id,
                    %txn,
                    "committing transaction of a checkpoint whose confirmation was skipped"
                );
            } else {
                debug!(task = %self.name, checkpoint_id, %txn, "committing transaction");
            }

            if let Err(err) = binding.transaction_mut().commit() {
                error!(
                    task = %self.name,
                    checkpoint_id = parked_at,
                    %txn,
                    error = %err,
                    "commit failed after checkpoint confirmation, data for this checkpoint is lost"
                );
                return Err(SinkError::CommitFailed {
                    txn,
                    checkpoint_id: Some(parked_at),
                    source: Box::new(err),
                });
            }
        }

        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.state == WriterState::Closed {
            return Ok(());
        }

        let mut failure = None;
        if let Some(mut txn) = self.current.take() {
            let id = txn.id();
            match txn.abort() {
                Ok(()) => debug!(task = %self.name, txn = %id, "current transaction aborted"),
                Err(err) => {
                    warn!(task = %self.name, txn = %id, error = %err, "aborting current transaction failed");
                    failure = Some(SinkError::first_or_suppressed(err, failure));
                }
            }
        }
        if let Some(mut writer) = self.writer.take() {
            if let Err(err) = writer.close() {
                warn!(task = %self.name, error = %err, "closing stream writer failed");
                failure = Some(SinkError::first_or_suppressed(err, failure));
            }
        }
        self.state = WriterState::Closed;

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn state(&self) -> WriterState {
        self.state
    }
}
