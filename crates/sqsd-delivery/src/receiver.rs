//! Queue receiver loop.
//!
//! A single receiver long-polls the queue and pushes each message into the
//! dispatch channel in the order it was received. The channel is bounded, so
//! while every worker is busy and the buffer is full the receiver blocks and
//! stops polling.

use std::{sync::Arc, time::Duration};

use sqsd_core::{Clock, Message, RealClock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{backoff::Backoff, queue::QueueClient, stats::DeliveryStats, worker::WorkerConfig};

/// Long-polls the queue and feeds the dispatch channel.
pub struct Receiver {
    queue: Arc<dyn QueueClient>,
    queue_url: String,
    max_messages: u32,
    wait_time: Duration,
    stats: Arc<DeliveryStats>,
    cancellation_token: CancellationToken,
    clock: Arc<dyn Clock>,
    backoff: Backoff,
}

impl Receiver {
    /// Creates a receiver for the queue described by `config`.
    pub fn new(
        queue: Arc<dyn QueueClient>,
        config: &WorkerConfig,
        stats: Arc<DeliveryStats>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            queue,
            queue_url: config.queue_url.clone(),
            max_messages: config.queue_max_messages,
            wait_time: config.queue_wait_time,
            stats,
            cancellation_token,
            clock: Arc::new(RealClock::new()),
            backoff: Backoff::default(),
        }
    }

    /// Uses `clock` for error backoff sleeps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the error backoff policy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Issues one receive call.
    ///
    /// An empty batch after the long-poll wait is not an error.
    ///
    /// # Errors
    ///
    /// Returns the queue client's error unchanged.
    pub async fn poll_once(&self) -> sqsd_core::Result<Vec<Message>> {
        let batch = self
            .queue
            .receive_messages(&self.queue_url, self.max_messages, self.wait_time)
            .await?;

        if !batch.is_empty() {
            self.stats.record_received(batch.len());
            debug!(batch_size = batch.len(), "received message batch");
        }

        Ok(batch)
    }

    /// Runs until cancellation is raised or every worker is gone.
    ///
    /// Receive errors are never fatal: the loop backs off and polls again.
    /// Dropping `dispatch` on return closes the channel for the workers.
    pub async fn run(mut self, dispatch: mpsc::Sender<Message>) {
        info!(queue_url = %self.queue_url, "receiver starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            let polled = tokio::select! {
                biased;
                () = self.cancellation_token.cancelled() => break,
                polled = self.poll_once() => polled,
            };

            match polled {
                Ok(batch) => {
                    self.backoff.reset();
                    if !self.dispatch_batch(&dispatch, batch).await {
                        break;
                    }
                },
                Err(error) => {
                    let delay = self.backoff.next_delay();
                    warn!(
                        error = %error,
                        attempt = self.backoff.attempt(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "failed to receive messages, backing off"
                    );

                    tokio::select! {
                        biased;
                        () = self.cancellation_token.cancelled() => break,
                        () = self.clock.sleep(delay) => {},
                    }
                },
            }
        }

        info!("receiver stopped");
    }

    /// Hands each message to a worker in order.
    ///
    /// Returns false when the receiver should stop. Messages not handed over
    /// are relinquished: they are dropped without deletion and reappear on
    /// the queue after their visibility timeout.
    async fn dispatch_batch(&self, dispatch: &mpsc::Sender<Message>, batch: Vec<Message>) -> bool {
        let total = batch.len();

        for (index, message) in batch.into_iter().enumerate() {
            let sent = tokio::select! {
                biased;
                () = self.cancellation_token.cancelled() => false,
                sent = dispatch.send(message) => sent.is_ok(),
            };

            if !sent {
                let relinquished = total - index;
                self.stats.record_relinquished(relinquished);
                info!(relinquished, "receiver stopping with undispatched messages");
                return false;
            }
        }

        true
    }
}

impl std::fmt::Debug for Receiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("queue_url", &self.queue_url)
            .field("max_messages", &self.max_messages)
            .field("wait_time", &self.wait_time)
            .finish_non_exhaustive()
    }
}
