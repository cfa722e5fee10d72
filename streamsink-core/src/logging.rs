// logging.rs - Log level handling and subscriber setup
// The sink emits `tracing` events; hosts either install their own subscriber
// or call `init_logging` / `init_from_env` once at startup.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Environment variable read by `init_from_env`
pub const LOG_ENV_VAR: &str = "STREAMSINK_LOG";

/// Log levels (ordered by severity)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    /// Errors - commit failures, protocol violations
    Error = 0,
    /// Warnings - unrecoverable transactions found on restore, write failures
    Warn = 1,
    /// Info - commits, writer initialization
    Info = 2,
    /// Debug - checkpoint triggers, transaction rollover
    Debug = 3,
    /// Trace - every write
    Trace = 4,
}

impl LogLevel {
    /// Parse log level from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<LogLevel> {
        match s.to_uppercase().as_str() {
            "ERROR" => Some(LogLevel::Error),
            "WARN" => Some(LogLevel::Warn),
            "INFO" => Some(LogLevel::Info),
            "DEBUG" => Some(LogLevel::Debug),
            "TRACE" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    /// Equivalent `tracing` level
    pub fn as_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }

    fn as_level_filter(&self) -> LevelFilter {
        LevelFilter::from_level(self.as_tracing_level())
    }
}

impl Default for LogLevel {
    /// WARN for production
    fn default() -> Self {
        LogLevel::Warn
    }
}

/// Install a global fmt subscriber at the given level.
///
/// Returns `false` if another subscriber was already installed (the existing
/// one is kept).
pub fn init_logging(level: LogLevel) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(level.as_level_filter())
        .with_target(true)
        .try_init()
        .is_ok()
}

/// Install a global fmt subscriber configured from `STREAMSINK_LOG`.
///
/// The variable accepts either a bare level (`debug`) or a full
/// `EnvFilter` directive (`streamsink_core::sink=trace,warn`). Falls back to
/// `LogLevel::default()` when unset or unparsable.
pub fn init_from_env() -> bool {
    let filter = std::env::var(LOG_ENV_VAR)
        .ok()
        .and_then(|raw| EnvFilter::try_new(raw).ok())
        .unwrap_or_else(|| EnvFilter::new(LogLevel::default().as_str().to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Trace);
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::from_str("ERROR"), Some(LogLevel::Error));
        assert_eq!(LogLevel::from_str("warn"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_str("DeBuG"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::from_str("invalid"), None);
    }

    #[test]
    fn test_tracing_level_mapping() {
        assert_eq!(LogLevel::Error.as_tracing_level(), tracing::Level::ERROR);
        assert_eq!(LogLevel::Trace.as_tracing_level(), tracing::Level::TRACE);
        assert_eq!(LogLevel::default(), LogLevel::Warn);
    }

    #[test]
    fn test_init_is_idempotent() {
        // Only one global subscriber can win; the second call must not panic.
        let _ = init_logging(LogLevel::Debug);
        assert!(!init_logging(LogLevel::Info));
    }
}
