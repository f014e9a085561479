//! Error types for queue client operations.
//!
//! Queue errors are always treated as transient by the daemon: receive
//! failures are retried with backoff and delete failures are logged and left
//! to the queue's redelivery.

use thiserror::Error;

/// Result type alias using `QueueError`.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Errors reported by a queue client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    /// Receiving a batch of messages failed.
    #[error("receive failed: {message}")]
    Receive {
        /// Error message from the queue service or transport
        message: String,
    },

    /// Deleting an acknowledged message failed.
    #[error("delete failed: {message}")]
    Delete {
        /// Error message from the queue service or transport
        message: String,
    },

    /// A request parameter could not be expressed in the queue's API.
    #[error("invalid queue request: {message}")]
    InvalidRequest {
        /// Description of the rejected parameter
        message: String,
    },
}

impl QueueError {
    /// Creates a receive error.
    pub fn receive(message: impl Into<String>) -> Self {
        Self::Receive { message: message.into() }
    }

    /// Creates a delete error.
    pub fn delete(message: impl Into<String>) -> Self {
        Self::Delete { message: message.into() }
    }

    /// Creates an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest { message: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_format() {
        assert_eq!(QueueError::receive("throttled").to_string(), "receive failed: throttled");
        assert_eq!(
            QueueError::delete("receipt handle expired").to_string(),
            "delete failed: receipt handle expired"
        );
        assert_eq!(
            QueueError::invalid_request("wait time too large").to_string(),
            "invalid queue request: wait time too large"
        );
    }
}
