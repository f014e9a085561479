//! Queue client abstraction.
//!
//! The receiver and acknowledger only need two operations from the queue:
//! long-poll a batch and delete one received copy. The trait keeps them
//! independent of the SQS SDK so the pipeline can be tested against an
//! in-memory queue.

use std::{future::Future, pin::Pin, time::Duration};

use aws_sdk_sqs::{
    config::Region,
    error::DisplayErrorContext,
    types::{Message as SqsMessage, MessageSystemAttributeName},
};
use sqsd_core::{Message, QueueError, ReceiptHandle, Result};
use tracing::warn;

/// Queue operations required by the delivery pipeline.
pub trait QueueClient: Send + Sync + 'static {
    /// Receives up to `max_messages` messages, waiting up to `wait_time` for
    /// at least one to become available.
    ///
    /// An empty result after the wait is not an error.
    fn receive_messages<'a>(
        &'a self,
        queue_url: &'a str,
        max_messages: u32,
        wait_time: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Message>>> + Send + 'a>>;

    /// Deletes the received copy identified by `receipt_handle`.
    fn delete_message<'a>(
        &'a self,
        queue_url: &'a str,
        receipt_handle: &'a ReceiptHandle,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Amazon SQS implementation of [`QueueClient`].
#[derive(Debug, Clone)]
pub struct SqsQueueClient {
    client: aws_sdk_sqs::Client,
}

impl SqsQueueClient {
    /// Wraps an already configured SDK client.
    pub fn new(client: aws_sdk_sqs::Client) -> Self {
        Self { client }
    }

    /// Builds a client from the default AWS credential chain.
    ///
    /// `endpoint` overrides the service endpoint, for local SQS-compatible
    /// brokers.
    pub async fn connect(region: &str, endpoint: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(region.to_owned()));

        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;
        Self::new(aws_sdk_sqs::Client::new(&sdk_config))
    }
}

impl QueueClient for SqsQueueClient {
    fn receive_messages<'a>(
        &'a self,
        queue_url: &'a str,
        max_messages: u32,
        wait_time: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Message>>> + Send + 'a>> {
        Box::pin(async move {
            let max_messages = i32::try_from(max_messages).map_err(|e| {
                QueueError::invalid_request(format!("max messages {max_messages}: {e}"))
            })?;
            let wait_seconds = i32::try_from(wait_time.as_secs()).map_err(|e| {
                QueueError::invalid_request(format!("wait time {wait_time:?}: {e}"))
            })?;

            let output = self
                .client
                .receive_message()
                .queue_url(queue_url)
                .max_number_of_messages(max_messages)
                .wait_time_seconds(wait_seconds)
                .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
                .send()
                .await
                .map_err(|e| QueueError::receive(DisplayErrorContext(&e).to_string()))?;

            Ok(output.messages().iter().filter_map(convert_message).collect())
        })
    }

    fn delete_message<'a>(
        &'a self,
        queue_url: &'a str,
        receipt_handle: &'a ReceiptHandle,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.client
                .delete_message()
                .queue_url(queue_url)
                .receipt_handle(receipt_handle.as_str())
                .send()
                .await
                .map_err(|e| QueueError::delete(DisplayErrorContext(&e).to_string()))?;
            Ok(())
        })
    }
}

/// Converts an SDK message, skipping copies that cannot be acknowledged.
fn convert_message(message: &SqsMessage) -> Option<Message> {
    let Some(receipt_handle) = message.receipt_handle() else {
        warn!(
            message_id = message.message_id().unwrap_or("unknown"),
            "received message without receipt handle, skipping"
        );
        return None;
    };

    let mut converted = Message::new(
        ReceiptHandle::new(receipt_handle),
        message.body().unwrap_or_default().as_bytes().to_vec(),
    );

    if let Some(id) = message.message_id() {
        converted = converted.with_id(id);
    }

    let receive_count = message
        .attributes()
        .and_then(|attributes| attributes.get(&MessageSystemAttributeName::ApproximateReceiveCount))
        .and_then(|count| count.parse().ok());
    if let Some(count) = receive_count {
        converted = converted.with_receive_count(count);
    }

    Some(converted)
}

pub mod mock {
    //! In-memory queue for testing the delivery pipeline.
    //!
    //! Records every receive and delete so tests can verify acknowledgment
    //! invariants, and supports injecting receive and delete failures.

    use std::{
        collections::{HashMap, VecDeque},
        future::Future,
        pin::Pin,
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
        time::Duration,
    };

    use bytes::Bytes;
    use sqsd_core::{Message, QueueError, ReceiptHandle, Result};
    use tokio::sync::{Notify, RwLock};

    use super::QueueClient;

    /// Mock queue client with configurable behavior.
    #[derive(Debug, Clone, Default)]
    pub struct MockQueueClient {
        pending: Arc<RwLock<VecDeque<Message>>>,
        deleted: Arc<RwLock<Vec<ReceiptHandle>>>,
        ids_by_handle: Arc<RwLock<HashMap<ReceiptHandle, String>>>,
        receive_errors: Arc<RwLock<VecDeque<String>>>,
        delete_errors: Arc<RwLock<VecDeque<String>>>,
        receive_calls: Arc<AtomicU64>,
        next_handle: Arc<AtomicU64>,
        arrivals: Arc<Notify>,
    }

    impl MockQueueClient {
        /// Creates an empty mock queue.
        pub fn new() -> Self {
            Self::default()
        }

        /// Enqueues a message with the given id and body, returning its
        /// receipt handle.
        pub async fn push(&self, id: &str, body: impl Into<Bytes>) -> ReceiptHandle {
            let sequence = self.next_handle.fetch_add(1, Ordering::AcqRel);
            let handle = ReceiptHandle::new(format!("receipt-{sequence}-{id}"));
            let message = Message::new(handle.clone(), body).with_id(id).with_receive_count(1);

            self.ids_by_handle.write().await.insert(handle.clone(), id.to_string());
            self.pending.write().await.push_back(message);
            self.arrivals.notify_waiters();
            handle
        }

        /// Makes the next receive call fail with `error`.
        pub async fn inject_receive_error(&self, error: impl Into<String>) {
            self.receive_errors.write().await.push_back(error.into());
        }

        /// Makes the next delete call fail with `error`.
        pub async fn inject_delete_error(&self, error: impl Into<String>) {
            self.delete_errors.write().await.push_back(error.into());
        }

        /// Returns the receipt handles of every successful delete.
        pub async fn deleted_handles(&self) -> Vec<ReceiptHandle> {
            self.deleted.read().await.clone()
        }

        /// Returns the message ids of every successful delete.
        pub async fn deleted_ids(&self) -> Vec<String> {
            let ids = self.ids_by_handle.read().await;
            self.deleted.read().await.iter().filter_map(|handle| ids.get(handle).cloned()).collect()
        }

        /// Counts successful deletes of the message with `id`.
        pub async fn delete_count(&self, id: &str) -> usize {
            self.deleted_ids().await.iter().filter(|deleted| deleted.as_str() == id).count()
        }

        /// Returns the number of messages not yet received.
        pub async fn pending_count(&self) -> usize {
            self.pending.read().await.len()
        }

        /// Returns the number of receive calls made so far.
        pub fn receive_calls(&self) -> u64 {
            self.receive_calls.load(Ordering::Acquire)
        }

        async fn take_batch(&self, max_messages: u32) -> Vec<Message> {
            let mut pending = self.pending.write().await;
            let count = pending.len().min(max_messages as usize);
            pending.drain(..count).collect()
        }
    }

    impl QueueClient for MockQueueClient {
        fn receive_messages<'a>(
            &'a self,
            _queue_url: &'a str,
            max_messages: u32,
            wait_time: Duration,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<Message>>> + Send + 'a>> {
            Box::pin(async move {
                self.receive_calls.fetch_add(1, Ordering::AcqRel);

                let error = self.receive_errors.write().await.pop_front();
                if let Some(error) = error {
                    return Err(QueueError::receive(error));
                }

                // Register for arrivals before checking so a concurrent push
                // between the check and the wait is not missed
                let arrival = self.arrivals.notified();
                tokio::pin!(arrival);
                arrival.as_mut().enable();

                let batch = self.take_batch(max_messages).await;
                if !batch.is_empty() {
                    return Ok(batch);
                }

                let _ = tokio::time::timeout(wait_time, arrival).await;
                Ok(self.take_batch(max_messages).await)
            })
        }

        fn delete_message<'a>(
            &'a self,
            _queue_url: &'a str,
            receipt_handle: &'a ReceiptHandle,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
            Box::pin(async move {
                let error = self.delete_errors.write().await.pop_front();
                if let Some(error) = error {
                    return Err(QueueError::delete(error));
                }

                self.deleted.write().await.push(receipt_handle.clone());
                Ok(())
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{mock::MockQueueClient, *};

    #[test]
    fn converts_sdk_message_with_attributes() {
        let sdk_message = SqsMessage::builder()
            .message_id("m1")
            .receipt_handle("handle-1")
            .body("{\"job\":1}")
            .set_attributes(Some(HashMap::from([(
                MessageSystemAttributeName::ApproximateReceiveCount,
                "3".to_string(),
            )])))
            .build();

        let message = convert_message(&sdk_message).expect("message should convert");

        assert_eq!(message.display_id(), "m1");
        assert_eq!(message.receipt_handle.as_str(), "handle-1");
        assert_eq!(&message.body[..], b"{\"job\":1}");
        assert_eq!(message.receive_count, Some(3));
    }

    #[test]
    fn skips_sdk_message_without_receipt_handle() {
        let sdk_message = SqsMessage::builder().message_id("m1").body("x").build();
        assert!(convert_message(&sdk_message).is_none());
    }

    #[test]
    fn missing_body_becomes_empty_payload() {
        let sdk_message = SqsMessage::builder().receipt_handle("handle-2").build();
        let message = convert_message(&sdk_message).expect("message should convert");

        assert!(message.body.is_empty());
        assert_eq!(message.display_id(), "unknown");
        assert_eq!(message.receive_count, None);
    }

    #[tokio::test]
    async fn mock_queue_respects_batch_size() {
        let queue = MockQueueClient::new();
        for i in 0..5 {
            queue.push(&format!("m{i}"), "body").await;
        }

        let batch = queue.receive_messages("q", 3, Duration::ZERO).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].display_id(), "m0");
        assert_eq!(queue.pending_count().await, 2);
    }

    #[tokio::test]
    async fn mock_queue_returns_empty_after_wait() {
        let queue = MockQueueClient::new();

        let batch = queue.receive_messages("q", 10, Duration::from_millis(20)).await.unwrap();
        assert!(batch.is_empty());
        assert_eq!(queue.receive_calls(), 1);
    }

    #[tokio::test]
    async fn mock_queue_wakes_long_poll_on_push() {
        let queue = MockQueueClient::new();
        let poller = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.receive_messages("q", 10, Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push("late", "body").await;

        let batch = poller.await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].display_id(), "late");
    }

    #[tokio::test]
    async fn mock_queue_injected_errors_are_one_shot() {
        let queue = MockQueueClient::new();
        queue.inject_receive_error("throttled").await;
        let handle = queue.push("m1", "body").await;
        queue.inject_delete_error("expired").await;

        assert!(queue.receive_messages("q", 10, Duration::ZERO).await.is_err());
        assert_eq!(queue.receive_messages("q", 10, Duration::ZERO).await.unwrap().len(), 1);

        assert!(queue.delete_message("q", &handle).await.is_err());
        assert!(queue.delete_message("q", &handle).await.is_ok());
        assert_eq!(queue.delete_count("m1").await, 1);
    }
}
