//! Error types for gpuwatch

use std::io;
use thiserror::Error;

/// Result type alias for gpuwatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Kind of CSV record a [`Error::MalformedRecord`] refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// A `--query-gpu` line
    Device,
    /// A `--query-compute-apps` line
    Process,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::Device => write!(f, "device"),
            RecordKind::Process => write!(f, "process"),
        }
    }
}

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The diagnostic tool is missing, exited non-zero or timed out
    #[error("Tool unavailable: {0}")]
    ToolUnavailable(String),

    /// A single CSV line could not be turned into a record
    #[error("Malformed {kind} record: {reason}")]
    MalformedRecord {
        /// Which query the line came from
        kind: RecordKind,
        /// What was wrong with it
        reason: String,
    },

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected failure during a poll cycle
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a malformed device line
    pub fn malformed_device(reason: impl Into<String>) -> Self {
        Error::MalformedRecord {
            kind: RecordKind::Device,
            reason: reason.into(),
        }
    }

    /// Shorthand for a malformed process line
    pub fn malformed_process(reason: impl Into<String>) -> Self {
        Error::MalformedRecord {
            kind: RecordKind::Process,
            reason: reason.into(),
        }
    }

    /// Whether the cycle should degrade rather than fail on this error
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            Error::ToolUnavailable(_) | Error::MalformedRecord { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_display() {
        let err = Error::malformed_device("expected 10 fields, got 3");
        assert_eq!(
            err.to_string(),
            "Malformed device record: expected 10 fields, got 3"
        );
        assert!(err.is_degradable());
    }

    #[test]
    fn test_internal_not_degradable() {
        assert!(!Error::Internal("lock poisoned".to_string()).is_degradable());
        assert!(Error::ToolUnavailable("nvidia-smi".to_string()).is_degradable());
    }
}
