//! Queue message model.
//!
//! A [`Message`] is owned by exactly one component at a time: the receiver
//! until it is dispatched, then the worker delivering it. The worker drops it
//! once the delivery outcome is resolved, so a receipt handle is never used
//! after acknowledgment or relinquishment.

use std::fmt;

use bytes::Bytes;

/// Queue-assigned message identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

impl MessageId {
    /// Creates a message id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque token identifying one received copy of a message.
///
/// Required to delete the message. A new handle is issued every time the
/// queue redelivers the message.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    /// Wraps a receipt handle returned by the queue.
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// Returns the raw handle to pass back to the queue.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Receipt handles are long and carry no diagnostic value in logs.
impl fmt::Debug for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(8).collect();
        write!(f, "ReceiptHandle({prefix}..)")
    }
}

/// A message received from the queue.
#[derive(Debug, Clone)]
pub struct Message {
    /// Queue-assigned message id, when the queue reported one.
    pub id: Option<MessageId>,
    /// Handle used to delete this received copy.
    pub receipt_handle: ReceiptHandle,
    /// Raw payload delivered as the HTTP request body.
    pub body: Bytes,
    /// Approximate number of times the queue has handed this message out.
    pub receive_count: Option<u32>,
}

impl Message {
    /// Creates a message with only a receipt handle and body.
    pub fn new(receipt_handle: ReceiptHandle, body: impl Into<Bytes>) -> Self {
        Self { id: None, receipt_handle, body: body.into(), receive_count: None }
    }

    /// Sets the queue-assigned message id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(MessageId::new(id));
        self
    }

    /// Sets the approximate receive count.
    #[must_use]
    pub fn with_receive_count(mut self, count: u32) -> Self {
        self.receive_count = Some(count);
        self
    }

    /// Returns the message id for logging, or `"unknown"` when absent.
    pub fn display_id(&self) -> &str {
        self.id.as_ref().map_or("unknown", MessageId::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_id_falls_back_to_unknown() {
        let message = Message::new(ReceiptHandle::new("handle-1"), "body");
        assert_eq!(message.display_id(), "unknown");

        let message = message.with_id("m1");
        assert_eq!(message.display_id(), "m1");
    }

    #[test]
    fn receipt_handle_debug_is_truncated() {
        let handle = ReceiptHandle::new("AQEBwJnKyrHigUMZj6rYigCgxlaS3SLy0a");
        assert_eq!(format!("{handle:?}"), "ReceiptHandle(AQEBwJnK..)");
        assert_eq!(handle.as_str(), "AQEBwJnKyrHigUMZj6rYigCgxlaS3SLy0a");
    }

    #[test]
    fn builder_sets_attributes() {
        let message =
            Message::new(ReceiptHandle::new("h"), "payload").with_id("m2").with_receive_count(3);

        assert_eq!(message.id, Some(MessageId::new("m2")));
        assert_eq!(message.receive_count, Some(3));
        assert_eq!(message.body, Bytes::from_static(b"payload"));
    }
}
