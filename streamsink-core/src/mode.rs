//! Delivery modes for the sink
//!
//! The mode decides which writer strategy backs an `EventSink` and therefore
//! which guarantee the host gets for the written events.

use serde::{Deserialize, Serialize};

/// Delivery guarantee offered by the sink
///
/// # Modes
///
/// - **AtLeastOnce**: Every event is written straight to the stream
///   - Writes are asynchronous; a checkpoint waits until all of them are acknowledged
///   - A replay after failure may produce duplicates
///   - Works without host checkpointing
///
/// - **ExactlyOnce**: Events are buffered in store transactions
///   - One transaction per checkpoint interval
///   - Committed only after the host confirms the checkpoint
///   - Requires host checkpointing to be enabled
///
/// # Examples
///
/// ```rust
/// use streamsink_core::WriterMode;
///
/// let mode = WriterMode::default();
/// assert_eq!(mode, WriterMode::AtLeastOnce);
/// assert!(WriterMode::ExactlyOnce.requires_checkpointing());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriterMode {
    /// Direct asynchronous writes, flushed at every checkpoint
    AtLeastOnce,

    /// Transactional writes committed on checkpoint confirmation
    ExactlyOnce,
}

impl Default for WriterMode {
    fn default() -> Self {
        WriterMode::AtLeastOnce
    }
}

impl WriterMode {
    /// Check if this mode can only run with host checkpointing enabled
    pub fn requires_checkpointing(&self) -> bool {
        matches!(self, WriterMode::ExactlyOnce)
    }

    /// Check if this mode buffers events in store transactions
    pub fn is_transactional(&self) -> bool {
        matches!(self, WriterMode::ExactlyOnce)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WriterMode::AtLeastOnce => "AT_LEAST_ONCE",
            WriterMode::ExactlyOnce => "EXACTLY_ONCE",
        }
    }
}

impl std::fmt::Display for WriterMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_at_least_once() {
        assert_eq!(WriterMode::default(), WriterMode::AtLeastOnce);
    }

    #[test]
    fn test_requires_checkpointing() {
        assert!(WriterMode::ExactlyOnce.requires_checkpointing());
        assert!(!WriterMode::AtLeastOnce.requires_checkpointing());
        assert!(WriterMode::ExactlyOnce.is_transactional());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&WriterMode::ExactlyOnce).unwrap();
        assert_eq!(json, "\"EXACTLY_ONCE\"");

        let mode: WriterMode = serde_json::from_str("\"AT_LEAST_ONCE\"").unwrap();
        assert_eq!(mode, WriterMode::AtLeastOnce);
        assert_eq!(mode.to_string(), "AT_LEAST_ONCE");
    }
}
