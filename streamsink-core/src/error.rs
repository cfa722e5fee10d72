// streamsink-core/src/error.rs
// Error types shared by the sink strategies and the store backends

use thiserror::Error;

use crate::checkpoint::CheckpointId;
use crate::store::{TransactionStatus, TxnId};

/// All errors surfaced by the sink and by the bundled store backends
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal invariant violated (always a bug in the caller or the sink)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The store rejected a single event write
    #[error("Write rejected: {0}")]
    WriteRejected(String),

    /// Asynchronous write failure, deferred until the next flush point
    #[error("Write failure")]
    WriteFailure {
        #[source]
        source: Box<SinkError>,
    },

    #[error("Transaction not found: {0}")]
    TransactionNotFound(TxnId),

    #[error("Transaction expired: {0}")]
    TransactionExpired(TxnId),

    #[error("Transaction {id} is not open (status: {status:?})")]
    TransactionNotOpen { id: TxnId, status: TransactionStatus },

    /// Commit failed after the checkpoint was confirmed by the host.
    /// The events of this transaction are lost.
    #[error("Commit of transaction {txn} failed (checkpoint {checkpoint_id:?}); data for this checkpoint is lost")]
    CommitFailed {
        txn: TxnId,
        checkpoint_id: Option<CheckpointId>,
        #[source]
        source: Box<SinkError>,
    },

    #[error("Log corruption detected")]
    WalCorruption,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store writer is closed")]
    StoreClosed,

    /// Several cleanup steps failed; the first failure is the primary one
    #[error("{primary} ({} suppressed)", suppressed.len())]
    Close {
        #[source]
        primary: Box<SinkError>,
        suppressed: Vec<SinkError>,
    },
}

impl SinkError {
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        SinkError::InvalidState(msg.into())
    }

    /// Fold `next` into an existing cleanup error. The first error stays
    /// primary and later ones are kept as suppressed.
    pub fn first_or_suppressed(next: SinkError, prior: Option<SinkError>) -> SinkError {
        match prior {
            None => next,
            Some(SinkError::Close {
                primary,
                mut suppressed,
            }) => {
                suppressed.push(next);
                SinkError::Close {
                    primary,
                    suppressed,
                }
            }
            Some(first) => SinkError::Close {
                primary: Box::new(first),
                suppressed: vec![next],
            },
        }
    }

    /// Errors hidden behind the primary one (empty unless this is a `Close`)
    pub fn suppressed(&self) -> &[SinkError] {
        match self {
            SinkError::Close { suppressed, .. } => suppressed,
            _ => &[],
        }
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for SinkError {
    fn from(err: bincode::Error) -> Self {
        SinkError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_error_stays_primary() {
        let first = SinkError::WriteRejected("abort failed".to_string());
        let second = SinkError::StoreClosed;

        let combined = SinkError::first_or_suppressed(second, Some(first));
        match &combined {
            SinkError::Close { primary, suppressed } => {
                assert!(matches!(**primary, SinkError::WriteRejected(_)));
                assert_eq!(suppressed.len(), 1);
                assert!(matches!(suppressed[0], SinkError::StoreClosed));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(combined.to_string().contains("abort failed"));
        assert!(combined.to_string().contains("1 suppressed"));
    }

    #[test]
    fn test_single_error_not_wrapped() {
        let err = SinkError::first_or_suppressed(SinkError::StoreClosed, None);
        assert!(matches!(err, SinkError::StoreClosed));
        assert!(err.suppressed().is_empty());
    }

    #[test]
    fn test_suppressed_accumulate() {
        let mut acc = None;
        acc = Some(SinkError::first_or_suppressed(SinkError::StoreClosed, acc));
        acc = Some(SinkError::first_or_suppressed(SinkError::WalCorruption, acc));
        acc = Some(SinkError::first_or_suppressed(
            SinkError::invalid_state("x"),
            acc,
        ));

        let err = acc.unwrap();
        assert_eq!(err.suppressed().len(), 2);
    }
}
