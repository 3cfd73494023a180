//! Error types for record delivery and synchronization passes.
//!
//! `DeliveryError` classifies one failed exchange with the downstream
//! service and never escapes its record: the engine turns it into a `Failed`
//! state. `SyncError` covers faults that abort a whole pass or on-demand
//! invocation and trigger a rollback.

use std::fmt;

use rowsync_core::CoreError;
use thiserror::Error;

/// Result type alias for synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Failure of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The record could not be encoded as JSON.
    #[error("serialization failed: {message}")]
    Serialization {
        /// Encoder error message
        message: String,
    },

    /// Connecting to or sending to the downstream service failed.
    #[error("network connection failed: {message}")]
    Network {
        /// Error message describing the network failure
        message: String,
    },

    /// The configured request timeout elapsed.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Configured timeout in seconds
        timeout_seconds: u64,
    },

    /// The response body could not be read.
    #[error("failed to read response body: {message}")]
    ReadBody {
        /// Error message from the transport
        message: String,
    },

    /// The response body was not a valid reply object.
    #[error("malformed response (HTTP {status_code}): {message}")]
    MalformedResponse {
        /// HTTP status of the response
        status_code: u16,
        /// Parser error message
        message: String,
    },

    /// The downstream service answered with a non-success code.
    #[error("unexpected downstream code: {message}")]
    Rejected {
        /// Code returned by the downstream service
        code: i64,
        /// Message returned by the downstream service
        message: String,
    },

    /// The HTTP client could not be built.
    #[error("invalid client configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into() }
    }

    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a body read error.
    pub fn read_body(message: impl Into<String>) -> Self {
        Self::ReadBody { message: message.into() }
    }

    /// Creates a malformed response error.
    pub fn malformed(status_code: u16, message: impl Into<String>) -> Self {
        Self::MalformedResponse { status_code, message: message.into() }
    }

    /// Creates a downstream rejection.
    pub fn rejected(code: i64, message: impl Into<String>) -> Self {
        Self::Rejected { code, message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Result code reported to on-demand callers for this failure.
    ///
    /// A downstream rejection echoes the downstream code. Every other
    /// failure reports the generic failure code `2`.
    pub fn result_code(&self) -> i64 {
        match self {
            Self::Rejected { code, .. } => *code,
            _ => 2,
        }
    }
}

/// Category of delivery error for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Encoding the outgoing payload.
    Encoding,
    /// Network connectivity and timeouts.
    Transport,
    /// Unreadable or unparsable response.
    Response,
    /// Structured rejection by the downstream service.
    Downstream,
    /// Client setup problems.
    Configuration,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::Serialization { .. } => Self::Encoding,
            DeliveryError::Network { .. } | DeliveryError::Timeout { .. } => Self::Transport,
            DeliveryError::ReadBody { .. } | DeliveryError::MalformedResponse { .. } => {
                Self::Response
            },
            DeliveryError::Rejected { .. } => Self::Downstream,
            DeliveryError::Configuration { .. } => Self::Configuration,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encoding => write!(f, "encoding"),
            Self::Transport => write!(f, "transport"),
            Self::Response => write!(f, "response"),
            Self::Downstream => write!(f, "downstream"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

/// Fault that aborts a pass or an on-demand invocation.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The record store failed.
    #[error("store error: {0}")]
    Store(#[from] CoreError),

    /// Invalid engine or client configuration.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },

    /// The requested record does not exist.
    #[error("record not found")]
    RecordNotFound {
        /// Code that was looked up
        code: String,
    },

    /// Unexpected internal failure, such as a panicked pass.
    #[error("internal error: {message}")]
    Internal {
        /// Internal error message
        message: String,
    },
}

impl SyncError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }
}

impl From<DeliveryError> for SyncError {
    fn from(error: DeliveryError) -> Self {
        match error {
            DeliveryError::Configuration { message } => Self::Configuration { message },
            other => Self::Internal { message: other.to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_echoes_downstream_code() {
        let error = DeliveryError::rejected(5, "duplicate customer");

        assert_eq!(error.result_code(), 5);
        assert_eq!(error.to_string(), "unexpected downstream code: duplicate customer");
    }

    #[test]
    fn transport_failures_report_generic_code() {
        assert_eq!(DeliveryError::network("connection refused").result_code(), 2);
        assert_eq!(DeliveryError::timeout(30).result_code(), 2);
        assert_eq!(DeliveryError::malformed(200, "expected value").result_code(), 2);
    }

    #[test]
    fn error_categories_mapped_correctly() {
        assert_eq!(ErrorCategory::from(&DeliveryError::network("x")), ErrorCategory::Transport);
        assert_eq!(ErrorCategory::from(&DeliveryError::timeout(1)), ErrorCategory::Transport);
        assert_eq!(ErrorCategory::from(&DeliveryError::read_body("x")), ErrorCategory::Response);
        assert_eq!(
            ErrorCategory::from(&DeliveryError::rejected(0, "x")),
            ErrorCategory::Downstream
        );
        assert_eq!(ErrorCategory::Transport.to_string(), "transport");
    }

    #[test]
    fn store_errors_convert() {
        let error = SyncError::from(CoreError::Database("connection reset".to_string()));

        assert!(matches!(error, SyncError::Store(_)));
        assert_eq!(error.to_string(), "store error: Database error: connection reset");
    }
}
