//! Queue acknowledgment.
//!
//! Deleting a message is the only way this process tells the queue a
//! delivery succeeded. A failed delete is logged and counted but never
//! retried: the message will be redelivered and delivered again, which is
//! the accepted at-least-once trade-off.

use std::sync::Arc;

use sqsd_core::{Message, QueueError};
use tracing::{debug, warn};

use crate::{queue::QueueClient, stats::DeliveryStats};

/// Deletes successfully delivered messages from the queue.
#[derive(Clone)]
pub struct Acknowledger {
    queue: Arc<dyn QueueClient>,
    queue_url: String,
    stats: Arc<DeliveryStats>,
}

impl Acknowledger {
    /// Creates an acknowledger for the queue at `queue_url`.
    pub fn new(queue: Arc<dyn QueueClient>, queue_url: String, stats: Arc<DeliveryStats>) -> Self {
        Self { queue, queue_url, stats }
    }

    /// Deletes `message` from the queue.
    ///
    /// # Errors
    ///
    /// Returns the queue error after logging it. Callers treat it as
    /// informational.
    pub async fn ack(&self, message: &Message) -> Result<(), QueueError> {
        match self.queue.delete_message(&self.queue_url, &message.receipt_handle).await {
            Ok(()) => {
                self.stats.record_acknowledged();
                debug!(message_id = %message.display_id(), "message deleted from queue");
                Ok(())
            },
            Err(error) => {
                self.stats.record_ack_failure();
                warn!(
                    message_id = %message.display_id(),
                    error = %error,
                    "failed to delete delivered message, it will be redelivered"
                );
                Err(error)
            },
        }
    }
}

impl std::fmt::Debug for Acknowledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acknowledger").field("queue_url", &self.queue_url).finish_non_exhaustive()
    }
}
