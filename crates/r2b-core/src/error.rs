//! Error types for r2b core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.

use thiserror::Error;

/// Result type alias for r2b operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for r2b.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Record source error
    #[error("Source error: {0}")]
    Source(String),

    /// Sink-related error
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sink-specific errors.
///
/// Every variant is scoped to a single partition key: a sink failure never
/// describes more than one key's batch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    /// The backend rejected or failed the write
    #[error("Write failed for key {key}: {message}")]
    WriteFailed { key: String, message: String },

    /// The write did not complete within the configured timeout
    #[error("Write for key {key} timed out after {timeout_ms}ms")]
    Timeout { key: String, timeout_ms: u64 },

    /// The storage location could not be parsed or opened
    #[error("Invalid storage location: {0}")]
    InvalidLocation(String),

    /// Backend construction error
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl SinkError {
    /// Partition key the failure belongs to, when there is one.
    pub fn key(&self) -> Option<&str> {
        match self {
            SinkError::WriteFailed { key, .. } | SinkError::Timeout { key, .. } => Some(key),
            SinkError::InvalidLocation(_) | SinkError::Backend(_) => None,
        }
    }

    /// Check if this failure was a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SinkError::Timeout { .. })
    }
}

// Conversion implementations for external error types

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Config("invalid value".into());
        assert_eq!(err.to_string(), "Configuration error: invalid value");

        let sink_err = SinkError::WriteFailed {
            key: "groupA-1".into(),
            message: "connection refused".into(),
        };
        let err: Error = sink_err.into();
        assert!(err.to_string().contains("Write failed for key groupA-1"));
    }

    #[test]
    fn test_sink_error_key() {
        let err = SinkError::Timeout {
            key: "groupA-2".into(),
            timeout_ms: 500,
        };
        assert_eq!(err.key(), Some("groupA-2"));
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Write for key groupA-2 timed out after 500ms");

        let err = SinkError::InvalidLocation("ftp://nope".into());
        assert_eq!(err.key(), None);
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_source_error() {
        let err = Error::Source("stream did not contain valid UTF-8".into());
        assert_eq!(
            err.to_string(),
            "Source error: stream did not contain valid UTF-8"
        );
    }

    #[test]
    fn test_toml_error_is_config() {
        let parse: std::result::Result<toml::Value, _> = toml::from_str("not = [valid");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Config(_)));
    }
}
