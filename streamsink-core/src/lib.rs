// streamsink-core/src/lib.rs
// Checkpoint-aligned event sink - pure Rust API

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod logging;
pub mod mode;
pub mod schema;
pub mod sink;
pub mod store;
pub mod wal;
pub mod writer;

// Public exports
pub use checkpoint::{
    CheckpointId, CheckpointListener, CheckpointedState, PendingTransactions, RuntimeContext,
    StaticRuntimeContext,
};
pub use config::{StreamId, TxnConfig, WriterConfig};
pub use error::{Result, SinkError};
pub use logging::{init_from_env, init_logging, LogLevel};
pub use mode::WriterMode;
pub use schema::{BytesSchema, EventRouter, FixedRouter, FnRouter, JsonSchema, SerializationSchema};
pub use sink::{AtLeastOnceWriter, RestoreStats, SinkWriter, TransactionalWriter, WriterState};
pub use store::{EventStore, LogStore, MemoryStore, TransactionStatus, TxnId};
pub use writer::EventSink;
