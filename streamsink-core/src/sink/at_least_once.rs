// sink/at_least_once.rs
//! At-least-once strategy
//!
//! Every event is an asynchronous direct write. A completion callback on the
//! pool waits for the acknowledgement, records the first failure and
//! decrements the in-flight counter. A checkpoint flushes the stream writer
//! and waits for the counter to reach zero, so every event written before
//! the barrier is acknowledged before the checkpoint can complete.
//!
//! A recorded failure is raised once, at the next `write`, `snapshot_state`
//! or `close`, and then cleared.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, trace, warn};

use crate::checkpoint::{CheckpointId, PendingTransactions};
use crate::config::{StreamId, WriterConfig};
use crate::error::{Result, SinkError};
use crate::mode::WriterMode;
use crate::store::{EventStore, EventStreamWriter};

use super::callback_pool::CallbackPool;
use super::{RestoreStats, SinkWriter, WriterState};

/// Outstanding writes and the first error among them, shared with callbacks
#[derive(Default)]
struct InFlightTracker {
    count: AtomicUsize,
    /// First failure since the last check
    error: Mutex<Option<SinkError>>,
    /// Guards counter decrements so a waiter cannot miss the last wakeup
    idle_lock: Mutex<()>,
    idle: Condvar,
}

impl InFlightTracker {
    fn acquire(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        let _guard = self.idle_lock.lock();
        self.count.fetch_sub(1, Ordering::SeqCst);
        self.idle.notify_all();
    }

    fn record_error(&self, err: SinkError) {
        let mut slot = self.error.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn take_error(&self) -> Option<SinkError> {
        self.error.lock().take()
    }

    fn wait_idle(&self) {
        let mut guard = self.idle_lock.lock();
        while self.count.load(Ordering::SeqCst) > 0 {
            self.idle.wait(&mut guard);
        }
    }

    fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

pub struct AtLeastOnceWriter {
    store: Arc<dyn EventStore>,
    stream: StreamId,
    name: String,
    callback_threads: usize,
    writer: Option<Box<dyn EventStreamWriter>>,
    pool: Option<CallbackPool>,
    tracker: Arc<InFlightTracker>,
    state: WriterState,
}

impl AtLeastOnceWriter {
    pub fn new(store: Arc<dyn EventStore>, config: &WriterConfig, name: impl Into<String>) -> Self {
        AtLeastOnceWriter {
            store,
            stream: config.stream.clone(),
            name: name.into(),
            callback_threads: config.callback_threads,
            writer: None,
            pool: None,
            tracker: Arc::new(InFlightTracker::default()),
            state: WriterState::Uninitialized,
        }
    }

    /// Writes issued but not yet acknowledged
    pub fn in_flight(&self) -> usize {
        self.tracker.count()
    }

    fn check_write_error(&self) -> Result<()> {
        match self.tracker.take_error() {
            Some(err) => Err(SinkError::WriteFailure {
                source: Box::new(err),
            }),
            None => Ok(()),
        }
    }

    /// Flush the stream writer, wait for every callback and surface the
    /// first recorded failure
    fn flush_and_verify(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        self.tracker.wait_idle();
        self.check_write_error()
    }
}

impl SinkWriter for AtLeastOnceWriter {
    fn mode(&self) -> WriterMode {
        WriterMode::AtLeastOnce
    }

    fn initialize(&mut self) -> Result<()> {
        if self.state != WriterState::Uninitialized {
            return Err(SinkError::invalid_state("writer already initialized"));
        }

        let pool = CallbackPool::new(&self.name, self.callback_threads)?;
        self.writer = Some(self.store.create_writer(&self.stream)?);
        debug!(
            task = %self.name,
            stream = %self.stream,
            callback_threads = pool.threads(),
            "at-least-once writer initialized"
        );
        self.pool = Some(pool);
        self.state = WriterState::Active;
        Ok(())
    }

    fn write(&mut self, routing_key: &str, payload: Vec<u8>) -> Result<()> {
        self.state.ensure_active("write")?;
        self.check_write_error()?;

        let (writer, pool) = match (self.writer.as_mut(), self.pool.as_ref()) {
            (Some(writer), Some(pool)) => (writer, pool),
            _ => return Err(SinkError::invalid_state("bug: active writer has no stream writer")),
        };

        self.tracker.acquire();
        trace!(task = %self.name, routing_key, "write");
        let ack = writer.write_event(routing_key, payload);
        let tracker = Arc::clone(&self.tracker);
        let name = self.name.clone();
        let submitted = pool.submit(move || {
            if let Err(err) = ack.wait() {
                error!(task = %name, error = %err, "asynchronous write failed");
                tracker.record_error(err);
            }
            tracker.release();
        });

        if let Err(err) = submitted {
            self.tracker.release();
            return Err(err);
        }
        Ok(())
    }

    fn snapshot_state(&mut self, checkpoint_id: CheckpointId) -> Result<PendingTransactions> {
        self.state.ensure_active("snapshot")?;
        debug!(task = %self.name, checkpoint_id, in_flight = self.in_flight(), "flushing writer");
        self.flush_and_verify()?;
        Ok(PendingTransactions::empty())
    }

    fn restore_state(&mut self, _state: Option<&PendingTransactions>) -> Result<RestoreStats> {
        Ok(RestoreStats::default())
    }

    fn notify_checkpoint_complete(&mut self, _checkpoint_id: CheckpointId) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.state == WriterState::Closed {
            return Ok(());
        }

        let mut failure = None;
        if let Err(err) = self.flush_and_verify() {
            warn!(task = %self.name, error = %err, "flush on close failed");
            failure = Some(SinkError::first_or_suppressed(err, failure));
        }
        if let Some(mut writer) = self.writer.take() {
            if let Err(err) = writer.close() {
                warn!(task = %self.name, error = %err, "closing stream writer failed");
                failure = Some(SinkError::first_or_suppressed(err, failure));
            }
        }
        if let Some(mut pool) = self.pool.take() {
            pool.shutdown();
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
