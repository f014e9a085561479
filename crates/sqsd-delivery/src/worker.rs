//! Delivery workers.
//!
//! Each worker pulls one message at a time from the dispatch channel,
//! delivers it, and acknowledges it only when the endpoint answered with a
//! 2xx. Failures are logged and the message is dropped without deletion so
//! the queue redelivers it after the visibility timeout.

use std::{sync::Arc, time::Duration};

use sqsd_core::Message;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    acker::Acknowledger,
    client::{DeliveryClient, DeliveryOutcome},
    error::ErrorCategory,
    stats::DeliveryStats,
};

/// Immutable configuration shared by the receiver and all workers.
#[derive(Clone)]
pub struct WorkerConfig {
    /// Queue to receive from and delete on.
    pub queue_url: String,
    /// Maximum messages per receive call.
    pub queue_max_messages: u32,
    /// Long-poll wait per receive call.
    pub queue_wait_time: Duration,
    /// Delivery target.
    pub http_url: String,
    /// `Content-Type` for delivery requests; empty omits the header.
    pub http_content_type: String,
    /// Signature header name; empty disables signing.
    pub http_hmac_header: String,
    /// HMAC secret key; empty disables signing.
    pub hmac_secret_key: Vec<u8>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_url: String::new(),
            queue_max_messages: crate::DEFAULT_QUEUE_MAX_MESSAGES,
            queue_wait_time: crate::DEFAULT_QUEUE_WAIT_TIME,
            http_url: String::new(),
            http_content_type: String::new(),
            http_hmac_header: String::new(),
            hmac_secret_key: Vec::new(),
        }
    }
}

impl std::fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secret = if self.hmac_secret_key.is_empty() { "<empty>" } else { "<redacted>" };
        f.debug_struct("WorkerConfig")
            .field("queue_url", &self.queue_url)
            .field("queue_max_messages", &self.queue_max_messages)
            .field("queue_wait_time", &self.queue_wait_time)
            .field("http_url", &self.http_url)
            .field("http_content_type", &self.http_content_type)
            .field("http_hmac_header", &self.http_hmac_header)
            .field("hmac_secret_key", &secret)
            .finish()
    }
}

/// Receiving half of the dispatch channel, shared by every worker.
///
/// Only the worker holding the lock waits on the channel; the others queue on
/// the lock, so each message goes to exactly one idle worker.
pub type DispatchReceiver = Arc<Mutex<mpsc::Receiver<Message>>>;

/// Worker that delivers messages from the dispatch channel.
pub struct DeliveryWorker {
    id: usize,
    dispatch: DispatchReceiver,
    client: Arc<DeliveryClient>,
    acker: Acknowledger,
    stats: Arc<DeliveryStats>,
    cancellation_token: CancellationToken,
}

impl DeliveryWorker {
    /// Creates a worker reading from `dispatch`.
    pub fn new(
        id: usize,
        dispatch: DispatchReceiver,
        client: Arc<DeliveryClient>,
        acker: Acknowledger,
        stats: Arc<DeliveryStats>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self { id, dispatch, client, acker, stats, cancellation_token }
    }

    /// Main worker loop.
    ///
    /// Exits when cancellation is raised or every sender of the dispatch
    /// channel is gone. A message already taken from the channel is always
    /// processed to completion first.
    pub async fn run(&self) {
        debug!(worker_id = self.id, "delivery worker starting");

        loop {
            let message = tokio::select! {
                biased;
                () = self.cancellation_token.cancelled() => {
                    debug!(worker_id = self.id, "delivery worker received shutdown signal");
                    break;
                }
                received = async { self.dispatch.lock().await.recv().await } => match received {
                    Some(message) => message,
                    None => {
                        debug!(worker_id = self.id, "dispatch channel closed");
                        break;
                    },
                },
            };

            self.process_message(message).await;
        }

        debug!(worker_id = self.id, "delivery worker stopped");
    }

    /// Delivers one message and acknowledges it on success.
    ///
    /// Returns the delivery outcome. Acknowledgment failures are logged by
    /// the acknowledger and do not change the outcome.
    pub async fn process_message(&self, message: Message) -> DeliveryOutcome {
        let outcome = {
            let _in_flight = self.stats.begin_delivery();
            self.client.deliver(&message).await
        };

        match &outcome {
            DeliveryOutcome::Delivered { status_code, duration } => {
                self.stats.record_delivered();
                info!(
                    worker_id = self.id,
                    message_id = %message.display_id(),
                    status_code,
                    duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                    "message delivered"
                );
                // Errors are logged and counted by the acknowledger
                let _ = self.acker.ack(&message).await;
            },
            DeliveryOutcome::Failed(error) => {
                self.stats.record_failed();
                warn!(
                    worker_id = self.id,
                    message_id = %message.display_id(),
                    receive_count = message.receive_count,
                    status_code = error.status_code(),
                    category = %ErrorCategory::from(error),
                    error = %error,
                    "message delivery failed, leaving it for redelivery"
                );
            },
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{client::ClientConfig, queue::mock::MockQueueClient};

    struct Fixture {
        queue: MockQueueClient,
        stats: Arc<DeliveryStats>,
        worker: DeliveryWorker,
        sender: mpsc::Sender<Message>,
        token: CancellationToken,
    }

    fn fixture(server: &MockServer) -> Fixture {
        let queue = MockQueueClient::new();
        let stats = Arc::new(DeliveryStats::new());
        let config = WorkerConfig {
            queue_url: "q".into(),
            http_url: format!("{}/work", server.uri()),
            ..WorkerConfig::default()
        };
        let client = Arc::new(DeliveryClient::new(ClientConfig::default(), &config).unwrap());
        let acker = Acknowledger::new(Arc::new(queue.clone()), config.queue_url, stats.clone());
        let (sender, receiver) = mpsc::channel(1);
        let token = CancellationToken::new();
        let dispatch = Arc::new(Mutex::new(receiver));
        let worker = DeliveryWorker::new(0, dispatch, client, acker, stats.clone(), token.clone());

        Fixture { queue, stats, worker, sender, token }
    }

    #[tokio::test]
    async fn delivered_message_is_acknowledged() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/work"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let fx = fixture(&server);
        let handle = fx.queue.push("m2", "body").await;

        let outcome = fx.worker.process_message(Message::new(handle, "body").with_id("m2")).await;

        assert!(outcome.is_delivered());
        assert_eq!(fx.queue.delete_count("m2").await, 1);
        assert_eq!(fx.stats.snapshot().delivered, 1);
        assert_eq!(fx.stats.snapshot().in_flight, 0);
    }

    #[tokio::test]
    async fn failed_message_is_not_acknowledged() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let fx = fixture(&server);
        let handle = fx.queue.push("m1", "body").await;

        let outcome = fx.worker.process_message(Message::new(handle, "body").with_id("m1")).await;

        assert!(matches!(&outcome, DeliveryOutcome::Failed(e) if e.status_code() == Some(500)));
        assert!(fx.queue.deleted_handles().await.is_empty());
        assert_eq!(fx.stats.snapshot().failed, 1);
    }

    #[tokio::test]
    async fn ack_failure_does_not_change_outcome() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let fx = fixture(&server);
        let handle = fx.queue.push("m1", "body").await;
        fx.queue.inject_delete_error("throttled").await;

        let outcome = fx.worker.process_message(Message::new(handle, "body")).await;

        assert!(outcome.is_delivered());
        assert_eq!(fx.stats.snapshot().ack_failures, 1);
    }

    #[tokio::test]
    async fn worker_exits_when_channel_closes() {
        let server = MockServer::start().await;
        let fx = fixture(&server);
        drop(fx.sender);

        tokio::time::timeout(Duration::from_secs(1), fx.worker.run())
            .await
            .expect("worker should exit once the channel is closed");
    }

    #[tokio::test]
    async fn worker_exits_on_cancellation() {
        let server = MockServer::start().await;
        let fx = fixture(&server);
        fx.token.cancel();

        tokio::time::timeout(Duration::from_secs(1), fx.worker.run())
            .await
            .expect("worker should exit once cancelled");
        drop(fx.sender);
    }

    #[test]
    fn debug_output_redacts_secret() {
        let config = WorkerConfig { hmac_secret_key: b"hunter2".to_vec(), ..Default::default() };
        let output = format!("{config:?}");
        assert!(!output.contains("hunter2"));
        assert!(output.contains("<redacted>"));
    }
}
