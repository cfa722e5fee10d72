// sink/pending.rs
// Transactions parked at a checkpoint, waiting for its confirmation

use std::collections::VecDeque;
use std::fmt;

use crate::checkpoint::CheckpointId;
use crate::store::{Transaction, TxnId};

/// A flushed transaction and the checkpoint that parked it
pub struct CheckpointBinding {
    transaction: Box<dyn Transaction>,
    checkpoint_id: CheckpointId,
}

impl CheckpointBinding {
    pub fn new(transaction: Box<dyn Transaction>, checkpoint_id: CheckpointId) -> Self {
        CheckpointBinding {
            transaction,
            checkpoint_id,
        }
    }

    pub fn checkpoint_id(&self) -> CheckpointId {
        self.checkpoint_id
    }

    pub fn txn_id(&self) -> TxnId {
        self.transaction.id()
    }

    pub fn transaction_mut(&mut self) -> &mut dyn Transaction {
        self.transaction.as_mut()
    }
}

impl fmt::Debug for CheckpointBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(checkpoint: {}, transaction: {})",
            self.checkpoint_id,
            self.transaction.id()
        )
    }
}

/// FIFO of parked transactions; insertion order is commit order
///
/// Checkpoint ids are non-decreasing front to back. Only back-push and
/// front-pop are offered.
#[derive(Debug, Default)]
pub struct PendingCommitQueue {
    bindings: VecDeque<CheckpointBinding>,
}

impl PendingCommitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a transaction at the back.
    ///
    /// Returns the binding back if its checkpoint id is lower than the one at
    /// the back of the queue.
    pub fn push(&mut self, binding: CheckpointBinding) -> Result<(), CheckpointBinding> {
        if let Some(last) = self.bindings.back() {
            if binding.checkpoint_id < last.checkpoint_id {
                return Err(binding);
            }
        }
        self.bindings.push_back(binding);
        Ok(())
    }

    /// Remove the front binding if it is covered by `checkpoint_id`
    pub fn pop_due(&mut self, checkpoint_id: CheckpointId) -> Option<CheckpointBinding> {
        match self.bindings.front() {
            Some(front) if front.checkpoint_id <= checkpoint_id => self.bindings.pop_front(),
            _ => None,
        }
    }

    pub fn front_checkpoint(&self) -> Option<CheckpointId> {
        self.bindings.front().map(|b| b.checkpoint_id)
    }

    pub fn back_checkpoint(&self) -> Option<CheckpointId> {
        self.bindings.back().map(|b| b.checkpoint_id)
    }

    /// Pending transaction ids, oldest first
    pub fn transaction_ids(&self) -> Vec<TxnId> {
        self.bindings.iter().map(CheckpointBinding::txn_id).collect()
    }

    pub fn checkpoint_ids(&self) -> Vec<CheckpointId> {
        self.bindings.iter().map(|b| b.checkpoint_id).collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::store::TransactionStatus;

    struct StubTxn(TxnId);

    impl Transaction for StubTxn {
        fn id(&self) -> TxnId {
            self.0
        }
        fn write_event(&mut self, _routing_key: &str, _payload: Vec<u8>) -> Result<()> {
            Ok(())
        }
        fn flush(&mut self) -> Result<()> {
            Ok(())
        }
        fn commit(&mut self) -> Result<()> {
            Ok(())
        }
        fn abort(&mut self) -> Result<()> {
            Ok(())
        }
        fn check_status(&self) -> Result<TransactionStatus> {
            Ok(TransactionStatus::Open)
        }
    }

    fn binding(checkpoint_id: CheckpointId) -> (TxnId, CheckpointBinding) {
        let id = TxnId::new();
        (id, CheckpointBinding::new(Box::new(StubTxn(id)), checkpoint_id))
    }

    #[test]
    fn test_pop_due_respects_order() {
        let mut queue = PendingCommitQueue::new();
        let (t1, b1) = binding(1);
        let (t2, b2) = binding(2);
        let (t3, b3) = binding(3);
        queue.push(b1).unwrap();
        queue.push(b2).unwrap();
        queue.push(b3).unwrap();
        assert_eq!(queue.transaction_ids(), vec![t1, t2, t3]);

        assert_eq!(queue.pop_due(2).map(|b| b.txn_id()), Some(t1));
        assert_eq!(queue.pop_due(2).map(|b| b.txn_id()), Some(t2));
        assert!(queue.pop_due(2).is_none());
        assert_eq!(queue.transaction_ids(), vec![t3]);
    }

    #[test]
    fn test_stale_checkpoint_pops_nothing() {
        let mut queue = PendingCommitQueue::new();
        let (_, b5) = binding(5);
        queue.push(b5).unwrap();

        assert!(queue.pop_due(4).is_none());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.front_checkpoint(), Some(5));
    }

    #[test]
    fn test_push_rejects_decreasing_checkpoint() {
        let mut queue = PendingCommitQueue::new();
        let (_, b2) = binding(2);
        let (_, b1) = binding(1);
        let (_, b2_again) = binding(2);

        queue.push(b2).unwrap();
        let rejected = queue.push(b1).unwrap_err();
        assert_eq!(rejected.checkpoint_id(), 1);
        queue.push(b2_again).unwrap();
        assert_eq!(queue.checkpoint_ids(), vec![2, 2]);
        assert_eq!(queue.back_checkpoint(), Some(2));
    }

    #[test]
    fn test_debug_format() {
        let (id, b) = binding(7);
        assert_eq!(format!("{:?}", b), format!("(checkpoint: 7, transaction: {})", id));
    }
}
