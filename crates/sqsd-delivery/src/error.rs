//! Error types for message delivery and supervisor lifecycle.
//!
//! Delivery errors never escape a worker: they are logged and the message is
//! left unacknowledged. Lifecycle errors are returned from the supervisor to
//! the surrounding program.

use std::{fmt, time::Duration};

use thiserror::Error;

use crate::supervisor::SupervisorState;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error types for delivery attempts and supervisor operations.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// HTTP request timeout exceeded.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Number of seconds before the request timed out
        timeout_seconds: u64,
    },

    /// Endpoint answered with a status outside the 2xx range.
    #[error("endpoint returned HTTP {status_code}")]
    UnexpectedStatus {
        /// HTTP status code
        status_code: u16,
        /// Response body content, truncated
        body: String,
    },

    /// Invalid delivery or client configuration.
    #[error("invalid configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },

    /// Lifecycle operation called in the wrong supervisor state.
    #[error("supervisor is {actual}, expected {expected}")]
    InvalidState {
        /// State the operation requires
        expected: SupervisorState,
        /// State the supervisor was in
        actual: SupervisorState,
    },

    /// Worker task panicked.
    #[error("worker {worker_id} panicked: {error}")]
    WorkerPanic {
        /// Identifier of the worker
        worker_id: usize,
        /// Join error description
        error: String,
    },

    /// Receiver task panicked.
    #[error("receiver panicked: {error}")]
    ReceiverPanic {
        /// Join error description
        error: String,
    },

    /// Workers did not drain within the shutdown timeout.
    #[error("shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Timeout that was exceeded
        timeout: Duration,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates an unexpected status error from an HTTP response.
    pub fn unexpected_status(status_code: u16, body: impl Into<String>) -> Self {
        Self::UnexpectedStatus { status_code, body: body.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Returns the HTTP status code if the endpoint answered.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::UnexpectedStatus { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }
}

/// Category of delivery error for structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connection failures and timeouts.
    Network,
    /// HTTP client errors (4xx).
    Client,
    /// HTTP server errors (5xx) and other non-2xx statuses.
    Server,
    /// Configuration problems.
    Configuration,
    /// Lifecycle and task failures.
    Internal,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::NetworkError { .. } | DeliveryError::Timeout { .. } => Self::Network,
            DeliveryError::UnexpectedStatus { status_code: 400..=499, .. } => Self::Client,
            DeliveryError::UnexpectedStatus { .. } => Self::Server,
            DeliveryError::ConfigurationError { .. } => Self::Configuration,
            DeliveryError::InvalidState { .. }
            | DeliveryError::WorkerPanic { .. }
            | DeliveryError::ReceiverPanic { .. }
            | DeliveryError::ShutdownTimeout { .. } => Self::Internal,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
