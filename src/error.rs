//! Error types for the flow core.

use thiserror::Error;

/// Result type alias for flow core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the flow core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Flow table has no free slot for a new key
    #[error("flow table full ({capacity} slots)")]
    TableFull { capacity: usize },

    /// Invalid or missing configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Reaper invoked with a timestamp earlier than the wheel's last tick
    #[error("clock went backwards: now {now}ms is before last reaped tick at {last}ms")]
    ClockRegression { now: u64, last: u64 },

    /// Configuration file could not be read or parsed
    #[error("config file error: {0}")]
    ConfigFile(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Check if this error is recoverable on the data path
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::TableFull { .. })
    }

    /// Check if this error is an admission failure
    pub fn is_table_full(&self) -> bool {
        matches!(self, Error::TableFull { .. })
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::ConfigFile(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::TableFull { capacity: 2 };
        assert_eq!(err.to_string(), "flow table full (2 slots)");

        let err = Error::ClockRegression { now: 10, last: 40 };
        assert_eq!(
            err.to_string(),
            "clock went backwards: now 10ms is before last reaped tick at 40ms"
        );
    }

    #[test]
    fn test_error_recoverable() {
        assert!(Error::TableFull { capacity: 1 }.is_recoverable());
        assert!(!Error::config("capacity must be > 0").is_recoverable());
        assert!(!Error::ClockRegression { now: 0, last: 1 }.is_recoverable());
    }
}
