// streamsink-core/src/writer.rs
//! `EventSink`: the host-facing sink
//!
//! Picks the delivery strategy from the configured mode, exactly once, on
//! first use, and forwards the host's lifecycle and checkpoint calls to it.
//! User events are turned into stored events by the configured
//! `SerializationSchema` and `EventRouter`.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use streamsink_core::checkpoint::{CheckpointListener, CheckpointedState, StaticRuntimeContext};
//! use streamsink_core::schema::{BytesSchema, FixedRouter};
//! use streamsink_core::store::MemoryStore;
//! use streamsink_core::{EventSink, StreamId, WriterConfig, WriterMode};
//!
//! let store = MemoryStore::new();
//! let stream = StreamId::new("scope", "events");
//! let config = WriterConfig::new(stream.clone()).with_mode(WriterMode::ExactlyOnce);
//!
//! let mut sink: EventSink<Vec<u8>> = EventSink::new(
//!     Arc::new(store.clone()),
//!     config,
//!     Box::new(BytesSchema),
//!     Box::new(FixedRouter("key".to_string())),
//!     Arc::new(StaticRuntimeContext::new("sink (1/1)", true)),
//! );
//!
//! sink.open().unwrap();
//! sink.invoke(&b"hello".to_vec()).unwrap();
//! sink.snapshot_state(1, 0).unwrap();
//! sink.notify_checkpoint_complete(1).unwrap();
//! sink.close().unwrap();
//!
//! assert_eq!(store.committed_events(&stream).len(), 1);
//! ```

use std::sync::Arc;

use tracing::{debug, info};

use crate::checkpoint::{
    CheckpointId, CheckpointListener, CheckpointedState, PendingTransactions, RuntimeContext,
};
use crate::config::WriterConfig;
use crate::error::{Result, SinkError};
use crate::mode::WriterMode;
use crate::schema::{EventRouter, SerializationSchema};
use crate::sink::{AtLeastOnceWriter, RestoreStats, SinkWriter, TransactionalWriter, WriterState};
use crate::store::EventStore;

pub struct EventSink<T> {
    store: Arc<dyn EventStore>,
    config: WriterConfig,
    schema: Box<dyn SerializationSchema<T>>,
    router: Box<dyn EventRouter<T>>,
    runtime: Arc<dyn RuntimeContext>,
    strategy: Option<Box<dyn SinkWriter>>,
    restore_stats: Option<RestoreStats>,
}

impl<T> EventSink<T> {
    pub fn new(
        store: Arc<dyn EventStore>,
        config: WriterConfig,
        schema: Box<dyn SerializationSchema<T>>,
        router: Box<dyn EventRouter<T>>,
        runtime: Arc<dyn RuntimeContext>,
    ) -> Self {
        EventSink {
            store,
            config,
            schema,
            router,
            runtime,
            strategy: None,
            restore_stats: None,
        }
    }

    pub fn mode(&self) -> WriterMode {
        self.config.mode
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// `None` until the strategy has been selected
    pub fn writer_state(&self) -> Option<WriterState> {
        self.strategy.as_ref().map(|s| s.state())
    }

    /// Result of the last `restore_state`, if any
    pub fn restore_stats(&self) -> Option<RestoreStats> {
        self.restore_stats
    }

    fn select_strategy(&mut self) -> Result<&mut Box<dyn SinkWriter>> {
        if self.strategy.is_none() {
            self.config.validate()?;

            let name = self.runtime.task_name();
            let strategy: Box<dyn SinkWriter> = match self.config.mode {
                WriterMode::ExactlyOnce => {
                    if !self.runtime.is_checkpointing_enabled() {
                        return Err(SinkError::Configuration(
                            "exactly-once support requires checkpointing to be enabled".to_string(),
                        ));
                    }
                    Box::new(TransactionalWriter::new(
                        Arc::clone(&self.store),
                        &self.config,
                        name.clone(),
                    ))
                }
                WriterMode::AtLeastOnce => Box::new(AtLeastOnceWriter::new(
                    Arc::clone(&self.store),
                    &self.config,
                    name.clone(),
                )),
            };
            info!(task = %name, mode = %self.config.mode, stream = %self.config.stream, "sink writer selected");
            self.strategy = Some(strategy);
        }

        self.strategy
            .as_mut()
            .ok_or_else(|| SinkError::invalid_state("bug: no writer strategy"))
    }

    fn active_strategy(&mut self, operation: &str) -> Result<&mut Box<dyn SinkWriter>> {
        self.strategy
            .as_mut()
            .ok_or_else(|| SinkError::invalid_state(format!("{} called before open", operation)))
    }

    pub fn open(&mut self) -> Result<()> {
        self.select_strategy()?.initialize()
    }

    /// Serialize, route and write one event
    pub fn invoke(&mut self, event: &T) -> Result<()> {
        let strategy = self
            .strategy
            .as_mut()
            .ok_or_else(|| SinkError::invalid_state("invoke called before open"))?;
        let payload = self.schema.serialize(event)?;
        let routing_key = self.router.routing_key(event);
        strategy.write(&routing_key, payload)
    }

    /// Close the strategy; a no-op when nothing was ever opened
    pub fn close(&mut self) -> Result<()> {
        match self.strategy.as_mut() {
            Some(strategy) => strategy.close(),
            None => Ok(()),
        }
    }
}

impl<T> CheckpointedState for EventSink<T> {
    type State = PendingTransactions;

    fn snapshot_state(&mut self, checkpoint_id: CheckpointId, timestamp: i64) -> Result<PendingTransactions> {
        debug!(checkpoint_id, timestamp, "snapshot requested");
        self.active_strategy("snapshot_state")?.snapshot_state(checkpoint_id)
    }

    fn restore_state(&mut self, state: Option<PendingTransactions>) -> Result<()> {
        let stats = self.select_strategy()?.restore_state(state.as_ref())?;
        self.restore_stats = Some(stats);
        Ok(())
    }
}

impl<T> CheckpointListener for EventSink<T> {
    fn notify_checkpoint_complete(&mut self, checkpoint_id: CheckpointId) -> Result<()> {
        self.active_strategy("notify_checkpoint_complete")?
            .notify_checkpoint_complete(checkpoint_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::StaticRuntimeContext;
    use crate::config::StreamId;
    use crate::schema::{BytesSchema, FixedRouter};
    use crate::store::MemoryStore;

    fn sink(mode: WriterMode, checkpointing: bool) -> (MemoryStore, EventSink<String>) {
        let store = MemoryStore::new();
        let config = WriterConfig::new(StreamId::new("scope", "stream")).with_mode(mode);
        let sink = EventSink::new(
            Arc::new(store.clone()),
            config,
            Box::new(BytesSchema),
            Box::new(FixedRouter("k".to_string())),
            Arc::new(StaticRuntimeContext::new("sink (1/1)", checkpointing)),
        );
        (store, sink)
    }

    #[test]
    fn test_exactly_once_requires_checkpointing() {
        let (_store, mut sink) = sink(WriterMode::ExactlyOnce, false);
        match sink.open() {
            Err(SinkError::Configuration(msg)) => {
                assert_eq!(msg, "exactly-once support requires checkpointing to be enabled")
            }
            other => panic!("unexpected result: {:?}", other.err()),
        }
        assert!(sink.writer_state().is_none());
    }

    #[test]
    fn test_at_least_once_without_checkpointing() {
        let (store, mut sink) = sink(WriterMode::AtLeastOnce, false);
        sink.open().unwrap();
        sink.invoke(&"a".to_string()).unwrap();
        sink.close().unwrap();

        let events = store.committed_events(&StreamId::new("scope", "stream"));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].routing_key, "k");
    }

    #[test]
    fn test_invoke_before_open() {
        let (_store, mut sink) = sink(WriterMode::ExactlyOnce, true);
        assert!(matches!(
            sink.invoke(&"a".to_string()),
            Err(SinkError::InvalidState(_))
        ));
    }

    #[test]
    fn test_close_before_open_is_noop() {
        let (_store, mut sink) = sink(WriterMode::ExactlyOnce, true);
        assert!(sink.close().is_ok());
    }

    #[test]
    fn test_restore_selects_strategy_once() {
        let (_store, mut sink) = sink(WriterMode::ExactlyOnce, true);
        sink.restore_state(None).unwrap();
        assert_eq!(sink.writer_state(), Some(WriterState::Uninitialized));
        assert_eq!(sink.restore_stats(), Some(RestoreStats::default()));

        sink.open().unwrap();
        assert_eq!(sink.writer_state(), Some(WriterState::Active));
    }
}
