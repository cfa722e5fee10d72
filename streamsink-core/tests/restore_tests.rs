// restore_tests.rs
// Recovery of pending transactions after a restart
//
// A "crash" drops the sink without closing it. The store (shared MemoryStore
// state, or the log directory for LogStore) is all that survives, together
// with the snapshot payload the host kept.

use std::sync::Arc;

use streamsink_core::checkpoint::{
    CheckpointListener, CheckpointedState, PendingTransactions, StaticRuntimeContext,
};
use streamsink_core::schema::{BytesSchema, FixedRouter};
use streamsink_core::store::{EventStore, LogStore, MemoryStore, TransactionStatus};
use streamsink_core::{
    EventSink, RestoreStats, SinkError, StreamId, TxnConfig, TxnId, WriterConfig, WriterMode,
};
use tempfile::TempDir;

fn stream() -> StreamId {
    StreamId::new("test", "events")
}

fn sink(store: Arc<dyn EventStore>) -> EventSink<String> {
    EventSink::new(
        store,
        WriterConfig::new(stream()).with_mode(WriterMode::ExactlyOnce),
        Box::new(BytesSchema),
        Box::new(FixedRouter("k".to_string())),
        Arc::new(StaticRuntimeContext::new("sink (1/1)", true)),
    )
}

fn write_all(sink: &mut EventSink<String>, events: &[&str]) {
    for event in events {
        sink.invoke(&event.to_string()).unwrap();
    }
}

// =============================================================================
// MEMORY STORE
// =============================================================================

#[test]
fn test_restore_commits_open_transaction() {
    let store = MemoryStore::new();

    let state = {
        let mut first = sink(Arc::new(store.clone()));
        first.open().unwrap();
        write_all(&mut first, &["a", "b"]);
        first.snapshot_state(1, 0).unwrap()
        // crash: no notify, no close
    };
    let parked = state.ids()[0];
    assert_eq!(store.status_of(parked), Some(TransactionStatus::Open));

    let mut second = sink(Arc::new(store.clone()));
    second.restore_state(Some(state)).unwrap();
    assert_eq!(
        second.restore_stats(),
        Some(RestoreStats {
            committed: 1,
            ..RestoreStats::default()
        })
    );
    assert_eq!(store.status_of(parked), Some(TransactionStatus::Committed));
    assert_eq!(store.committed_events(&stream()).len(), 2);

    second.open().unwrap();
    write_all(&mut second, &["c"]);
    second.snapshot_state(2, 0).unwrap();
    second.notify_checkpoint_complete(2).unwrap();
    assert_eq!(store.committed_events(&stream()).len(), 3);
}

#[test]
fn test_restore_skips_committed_transaction() {
    let store = MemoryStore::new();

    let state = {
        let mut first = sink(Arc::new(store.clone()));
        first.open().unwrap();
        write_all(&mut first, &["a"]);
        let state = first.snapshot_state(1, 0).unwrap();
        first.notify_checkpoint_complete(1).unwrap();
        state
    };

    let mut second = sink(Arc::new(store.clone()));
    second.restore_state(Some(state)).unwrap();
    assert_eq!(second.restore_stats().unwrap().already_committed, 1);
    assert_eq!(store.commit_order().len(), 1);
    assert_eq!(store.committed_events(&stream()).len(), 1);
}

#[test]
fn test_restore_committing_counts_as_committed() {
    let store = MemoryStore::new();
    let mut writer = store.create_writer(&stream()).unwrap();
    let txn = writer.begin_txn(&TxnConfig::default()).unwrap();
    store.force_status(txn.id(), TransactionStatus::Committing);

    let mut restored = sink(Arc::new(store.clone()));
    restored
        .restore_state(Some(PendingTransactions::new(vec![txn.id()])))
        .unwrap();
    assert_eq!(restored.restore_stats().unwrap().already_committed, 1);
    assert_eq!(store.status_of(txn.id()), Some(TransactionStatus::Committing));
}

#[test]
fn test_restore_reports_expired_transaction_as_lost() {
    let store = MemoryStore::new();

    let state = {
        let mut first = sink(Arc::new(store.clone()));
        first.open().unwrap();
        write_all(&mut first, &["a"]);
        first.snapshot_state(1, 0).unwrap()
    };
    store.expire(state.ids()[0]);

    let mut second = sink(Arc::new(store.clone()));
    second.restore_state(Some(state)).unwrap();
    assert_eq!(second.restore_stats().unwrap().lost, 1);
    assert!(store.committed_events(&stream()).is_empty());
}

#[test]
fn test_restore_none_and_empty_are_noops() {
    let store = MemoryStore::new();

    let mut a = sink(Arc::new(store.clone()));
    a.restore_state(None).unwrap();
    assert_eq!(a.restore_stats(), Some(RestoreStats::default()));

    let mut b = sink(Arc::new(store.clone()));
    b.restore_state(Some(PendingTransactions::empty())).unwrap();
    assert_eq!(b.restore_stats(), Some(RestoreStats::default()));

    assert!(store.commit_order().is_empty());
    assert_eq!(store.open_writers(), 0);
}

#[test]
fn test_restore_unknown_transaction_fails() {
    let store = MemoryStore::new();
    let mut restored = sink(Arc::new(store.clone()));

    let err = restored
        .restore_state(Some(PendingTransactions::new(vec![TxnId::new()])))
        .unwrap_err();
    assert!(matches!(err, SinkError::TransactionNotFound(_)));
    // The temporary writer is closed on the error path too
    assert_eq!(store.open_writers(), 0);
}

#[test]
fn test_restore_after_first_write_rejected() {
    let store = MemoryStore::new();
    let mut s = sink(Arc::new(store));
    s.open().unwrap();
    write_all(&mut s, &["a"]);

    assert!(matches!(
        s.restore_state(None),
        Err(SinkError::InvalidState(_))
    ));
}

#[test]
fn test_restore_from_persisted_bytes() {
    let store = MemoryStore::new();

    let bytes = {
        let mut first = sink(Arc::new(store.clone()));
        first.open().unwrap();
        write_all(&mut first, &["a"]);
        first.snapshot_state(1, 0).unwrap();
        write_all(&mut first, &["b"]);
        first.snapshot_state(2, 0).unwrap().to_bytes().unwrap()
    };

    let state = PendingTransactions::from_bytes(&bytes).unwrap();
    assert_eq!(state.len(), 2);

    let mut second = sink(Arc::new(store.clone()));
    second.restore_state(Some(state.clone())).unwrap();
    assert_eq!(store.commit_order(), state.into_ids());

    let payloads: Vec<Vec<u8>> = store
        .committed_events(&stream())
        .into_iter()
        .map(|e| e.payload)
        .collect();
    assert_eq!(payloads, vec![b"a".to_vec(), b"b".to_vec()]);
}

// =============================================================================
// LOG STORE (real restart: only the directory survives)
// =============================================================================

#[test]
fn test_log_store_restart_commits_parked_transaction() {
    let dir = TempDir::new().unwrap();

    let state = {
        let store = LogStore::open(dir.path()).unwrap();
        let mut first = sink(Arc::new(store.clone()));
        first.open().unwrap();
        write_all(&mut first, &["one", "two"]);
        let state = first.snapshot_state(1, 0).unwrap();
        write_all(&mut first, &["after barrier"]);
        state
    };

    let store = LogStore::open(dir.path()).unwrap();
    assert!(store.read_committed(&stream()).unwrap().is_empty());

    let mut second = sink(Arc::new(store.clone()));
    second.restore_state(Some(state.clone())).unwrap();
    assert_eq!(second.restore_stats().unwrap().committed, 1);
    assert_eq!(
        store.status_of(&stream(), state.ids()[0]).unwrap(),
        Some(TransactionStatus::Committed)
    );

    let payloads: Vec<Vec<u8>> = store
        .read_committed(&stream())
        .unwrap()
        .into_iter()
        .map(|e| e.payload)
        .collect();
    assert_eq!(payloads, vec![b"one".to_vec(), b"two".to_vec()]);
}

#[test]
fn test_log_store_restart_after_commit_is_idempotent() {
    let dir = TempDir::new().unwrap();

    let state = {
        let store = LogStore::open(dir.path()).unwrap();
        let mut first = sink(Arc::new(store));
        first.open().unwrap();
        write_all(&mut first, &["x"]);
        let state = first.snapshot_state(1, 0).unwrap();
        first.notify_checkpoint_complete(1).unwrap();
        state
    };

    for _ in 0..2 {
        let store = LogStore::open(dir.path()).unwrap();
        let mut next = sink(Arc::new(store.clone()));
        next.restore_state(Some(state.clone())).unwrap();
        assert_eq!(next.restore_stats().unwrap().already_committed, 1);
        assert_eq!(store.read_committed(&stream()).unwrap().len(), 1);
    }
}
