// streamsink-core/src/config.rs
// Writer configuration

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SinkError};
use crate::mode::WriterMode;

/// Default transaction timeout: 2 hours
pub const DEFAULT_TXN_TIMEOUT_MILLIS: u64 = 2 * 60 * 60 * 1000;

/// Default grace period during stream scaling: 10 minutes
pub const DEFAULT_TXN_GRACE_PERIOD_MILLIS: u64 = 10 * 60 * 1000;

/// Default number of threads running write-completion callbacks
pub const DEFAULT_CALLBACK_THREADS: usize = 5;

/// Destination stream, addressed as `scope/stream`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId {
    pub scope: String,
    pub stream: String,
}

impl StreamId {
    pub fn new(scope: impl Into<String>, stream: impl Into<String>) -> Self {
        StreamId {
            scope: scope.into(),
            stream: stream.into(),
        }
    }

    fn validate(&self) -> Result<()> {
        for (what, name) in [("scope", &self.scope), ("stream", &self.stream)] {
            if name.is_empty() {
                return Err(SinkError::Configuration(format!("{} name must not be empty", what)));
            }
            if name.contains(['/', '\\']) {
                return Err(SinkError::Configuration(format!(
                    "{} name must not contain path separators: {}",
                    what, name
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.stream)
    }
}

/// Parameters fixed at transaction creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnConfig {
    /// Time after which the store aborts the transaction
    pub timeout_millis: u64,
    /// Upper bound to which the timeout may be extended
    pub max_time_millis: u64,
    /// How long the transaction may stay open once a scale operation started
    pub grace_period_millis: u64,
}

impl TxnConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_millis)
    }

    pub fn max_time(&self) -> Duration {
        Duration::from_millis(self.max_time_millis)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_millis)
    }
}

impl Default for TxnConfig {
    fn default() -> Self {
        TxnConfig {
            timeout_millis: DEFAULT_TXN_TIMEOUT_MILLIS,
            max_time_millis: DEFAULT_TXN_TIMEOUT_MILLIS,
            grace_period_millis: DEFAULT_TXN_GRACE_PERIOD_MILLIS,
        }
    }
}

/// Full sink configuration
///
/// # Examples
///
/// ```rust
/// use streamsink_core::{StreamId, WriterConfig, WriterMode};
///
/// let config = WriterConfig::new(StreamId::new("scope", "events"))
///     .with_mode(WriterMode::ExactlyOnce);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterConfig {
    pub stream: StreamId,

    #[serde(default)]
    pub mode: WriterMode,

    #[serde(default = "default_txn_timeout")]
    pub txn_timeout_millis: u64,

    #[serde(default = "default_txn_timeout")]
    pub txn_max_time_millis: u64,

    #[serde(default = "default_txn_grace_period")]
    pub txn_grace_period_millis: u64,

    #[serde(default = "default_callback_threads")]
    pub callback_threads: usize,
}

fn default_txn_timeout() -> u64 {
    DEFAULT_TXN_TIMEOUT_MILLIS
}

fn default_txn_grace_period() -> u64 {
    DEFAULT_TXN_GRACE_PERIOD_MILLIS
}

fn default_callback_threads() -> usize {
    DEFAULT_CALLBACK_THREADS
}

impl WriterConfig {
    pub fn new(stream: StreamId) -> Self {
        let txn = TxnConfig::default();
        WriterConfig {
            stream,
            mode: WriterMode::default(),
            txn_timeout_millis: txn.timeout_millis,
            txn_max_time_millis: txn.max_time_millis,
            txn_grace_period_millis: txn.grace_period_millis,
            callback_threads: DEFAULT_CALLBACK_THREADS,
        }
    }

    pub fn with_mode(mut self, mode: WriterMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_txn_timeouts(mut self, timeout_millis: u64, max_time_millis: u64, grace_period_millis: u64) -> Self {
        self.txn_timeout_millis = timeout_millis;
        self.txn_max_time_millis = max_time_millis;
        self.txn_grace_period_millis = grace_period_millis;
        self
    }

    pub fn with_callback_threads(mut self, threads: usize) -> Self {
        self.callback_threads = threads;
        self
    }

    /// Parse a JSON config document and validate it
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: WriterConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Transaction parameters derived from this config
    pub fn txn_config(&self) -> TxnConfig {
        TxnConfig {
            timeout_millis: self.txn_timeout_millis,
            max_time_millis: self.txn_max_time_millis,
            grace_period_millis: self.txn_grace_period_millis,
        }
    }

    /// Reject configurations the writers cannot run with
    pub fn validate(&self) -> Result<()> {
        self.stream.validate()?;

        for (name, value) in [
            ("txn_timeout_millis", self.txn_timeout_millis),
            ("txn_max_time_millis", self.txn_max_time_millis),
            ("txn_grace_period_millis", self.txn_grace_period_millis),
        ] {
            if value == 0 {
                return Err(SinkError::Configuration(format!("{} must be > 0", name)));
            }
        }

        if self.callback_threads == 0 {
            return Err(SinkError::Configuration(
                "callback_threads must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
