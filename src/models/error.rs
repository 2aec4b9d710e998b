//! Error types for sensemake.
//!
//! Taxonomy:
//! - Backend failures: the model endpoint answered, but not with success
//! - Transport failures: the endpoint could not be reached in time
//! - Output failures: the endpoint answered with text we cannot use
//! - Budget failures: a retry loop never produced an acceptable value

use std::time::Duration;
use thiserror::Error;

/// Top-level error type for sensemake.
#[derive(Debug, Error)]
pub enum SensemakeError {
    // ═══════════════════════════════════════════════════════════════════
    // Input and configuration
    // ═══════════════════════════════════════════════════════════════════
    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ═══════════════════════════════════════════════════════════════════
    // Backend and transport
    // ═══════════════════════════════════════════════════════════════════
    #[error("Backend error (status {status}): {message}")]
    Backend { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    // ═══════════════════════════════════════════════════════════════════
    // Model output
    // ═══════════════════════════════════════════════════════════════════
    /// The raw text is kept so a failed generation can be diagnosed from logs.
    #[error("Parse error: {reason}")]
    Parse { reason: String, raw: String },

    #[error("{label}: no valid result after {attempts} attempts")]
    RetryExhausted { label: String, attempts: u32 },

    // ═══════════════════════════════════════════════════════════════════
    // Local failures
    // ═══════════════════════════════════════════════════════════════════
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SensemakeError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a parse error that keeps the unparsed text.
    pub fn parse(reason: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
            raw: raw.into(),
        }
    }

    /// Raw model output attached to a parse failure, if any.
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            Self::Parse { raw, .. } => Some(raw),
            _ => None,
        }
    }

    /// Whether this error came from talking to the backend rather than from
    /// what it said.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Backend { .. } | Self::Network(_) | Self::Timeout(_)
        )
    }
}

/// Result type alias for sensemake.
pub type Result<T> = std::result::Result<T, SensemakeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_keeps_raw_text() {
        let err = SensemakeError::parse("expected value at line 1", "not json");
        assert_eq!(err.raw_output(), Some("not json"));
        assert!(!err.is_transport());
        assert_eq!(err.to_string(), "Parse error: expected value at line 1");
    }

    #[test]
    fn test_retry_exhausted_message_embeds_label_and_attempts() {
        let err = SensemakeError::RetryExhausted {
            label: "Topic categorization".to_string(),
            attempts: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("Topic categorization"));
        assert!(msg.contains('4'));
    }

    #[test]
    fn test_backend_error_is_transport() {
        let err = SensemakeError::Backend {
            status: 503,
            message: "Service Unavailable".to_string(),
        };
        assert!(err.is_transport());
        assert!(err.raw_output().is_none());
    }
}
