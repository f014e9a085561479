//! Fixed-size pool of delivery workers.
//!
//! The pool is sized once at spawn time and never grows or shrinks. Workers
//! share one dispatch channel, so the number of concurrent deliveries can
//! never exceed the number of workers.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    acker::Acknowledger,
    client::DeliveryClient,
    error::{DeliveryError, Result},
    stats::DeliveryStats,
    worker::{DeliveryWorker, DispatchReceiver},
};

/// Supervised set of worker tasks.
pub struct WorkerPool {
    dispatch: DispatchReceiver,
    client: Arc<DeliveryClient>,
    acker: Acknowledger,
    stats: Arc<DeliveryStats>,
    cancellation_token: CancellationToken,
    worker_handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Creates an empty pool whose workers will read from `dispatch`.
    pub fn new(
        dispatch: DispatchReceiver,
        client: Arc<DeliveryClient>,
        acker: Acknowledger,
        stats: Arc<DeliveryStats>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self { dispatch, client, acker, stats, cancellation_token, worker_handles: Vec::new() }
    }

    /// Spawns `worker_count` workers.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if `worker_count` is zero
    /// or workers were already spawned.
    pub fn spawn_workers(&mut self, worker_count: usize) -> Result<()> {
        if worker_count == 0 {
            return Err(DeliveryError::configuration("worker count must be greater than zero"));
        }
        if !self.worker_handles.is_empty() {
            return Err(DeliveryError::configuration("worker pool already spawned"));
        }

        for worker_id in 0..worker_count {
            let worker = DeliveryWorker::new(
                worker_id,
                self.dispatch.clone(),
                self.client.clone(),
                self.acker.clone(),
                self.stats.clone(),
                self.cancellation_token.clone(),
            );

            self.worker_handles.push(tokio::spawn(async move { worker.run().await }));
        }

        info!(worker_count, "delivery workers spawned");
        Ok(())
    }

    /// Returns the number of spawned workers.
    pub fn worker_count(&self) -> usize {
        self.worker_handles.len()
    }

    /// Returns true if any worker task has not finished.
    pub fn has_active_workers(&self) -> bool {
        self.worker_handles.iter().any(|handle| !handle.is_finished())
    }

    /// Waits for every worker to exit.
    ///
    /// Does not raise cancellation itself; the caller decides when workers
    /// should stop. Workers are never aborted, so an in-flight delivery always
    /// runs to completion or to its HTTP timeout. Messages still buffered in
    /// the dispatch channel afterwards are relinquished to the queue.
    ///
    /// # Errors
    ///
    /// Returns the first `DeliveryError::WorkerPanic` if any worker panicked.
    /// All workers are joined regardless.
    pub async fn join(&mut self) -> Result<()> {
        let mut first_panic = None;

        for (worker_id, handle) in std::mem::take(&mut self.worker_handles).into_iter().enumerate()
        {
            if let Err(join_error) = handle.await {
                error!(worker_id, error = %join_error, "worker task panicked");
                first_panic.get_or_insert(DeliveryError::WorkerPanic {
                    worker_id,
                    error: join_error.to_string(),
                });
            }
        }

        let relinquished = self.drain_dispatch().await;
        if relinquished > 0 {
            info!(relinquished, "undelivered messages left in dispatch channel");
        }

        first_panic.map_or(Ok(()), Err)
    }

    /// Closes the dispatch channel and drops whatever it still buffers.
    async fn drain_dispatch(&self) -> usize {
        let mut dispatch = self.dispatch.lock().await;
        dispatch.close();

        let mut relinquished = 0;
        while dispatch.try_recv().is_ok() {
            relinquished += 1;
        }

        self.stats.record_relinquished(relinquished);
        relinquished
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.has_active_workers() && !self.cancellation_token.is_cancelled() {
            warn!(
                worker_count = self.worker_count(),
                "worker pool dropped without shutdown, cancelling workers"
            );
            self.cancellation_token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sqsd_core::{Message, ReceiptHandle};
    use tokio::sync::{mpsc, Mutex};

    use super::*;
    use crate::{client::ClientConfig, queue::mock::MockQueueClient, worker::WorkerConfig};

    fn pool(dispatch: mpsc::Receiver<Message>, token: CancellationToken) -> WorkerPool {
        let config =
            WorkerConfig { http_url: "http://127.0.0.1:9/".into(), ..WorkerConfig::default() };
        let client = Arc::new(DeliveryClient::new(ClientConfig::default(), &config).unwrap());
        let stats = Arc::new(DeliveryStats::new());
        let acker = Acknowledger::new(Arc::new(MockQueueClient::new()), "q".into(), stats.clone());
        WorkerPool::new(Arc::new(Mutex::new(dispatch)), client, acker, stats, token)
    }

    #[tokio::test]
    async fn spawns_requested_number_of_workers() {
        let (_sender, receiver) = mpsc::channel(1);
        let token = CancellationToken::new();
        let mut pool = pool(receiver, token.clone());

        pool.spawn_workers(5).unwrap();
        assert_eq!(pool.worker_count(), 5);
        assert!(pool.has_active_workers());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), pool.join())
            .await
            .expect("workers should stop after cancellation")
            .unwrap();
        assert_eq!(pool.worker_count(), 0);
    }

    #[tokio::test]
    async fn rejects_zero_workers() {
        let (_sender, receiver) = mpsc::channel(1);
        let mut pool = pool(receiver, CancellationToken::new());

        assert!(matches!(pool.spawn_workers(0), Err(DeliveryError::ConfigurationError { .. })));
    }

    #[tokio::test]
    async fn rejects_second_spawn() {
        let (sender, receiver) = mpsc::channel(1);
        let mut pool = pool(receiver, CancellationToken::new());

        pool.spawn_workers(1).unwrap();
        assert!(pool.spawn_workers(1).is_err());

        drop(sender);
        pool.join().await.unwrap();
    }

    #[tokio::test]
    async fn workers_exit_when_senders_dropped() {
        let (sender, receiver) = mpsc::channel(1);
        let mut pool = pool(receiver, CancellationToken::new());
        pool.spawn_workers(3).unwrap();

        drop(sender);

        tokio::time::timeout(Duration::from_secs(1), pool.join())
            .await
            .expect("workers should stop once the channel closes")
            .unwrap();
    }

    #[tokio::test]
    async fn buffered_messages_relinquished_on_join() {
        let (sender, receiver) = mpsc::channel(4);
        let token = CancellationToken::new();
        let mut pool = pool(receiver, token.clone());
        pool.spawn_workers(1).unwrap();

        // Cancel first so no worker takes the buffered messages
        token.cancel();
        for id in ["a", "b"] {
            sender.send(Message::new(ReceiptHandle::new(id), "body")).await.unwrap();
        }
        pool.join().await.unwrap();

        assert_eq!(pool.stats.snapshot().relinquished, 2);
        assert!(sender.is_closed());
    }

    #[tokio::test]
    async fn drop_without_shutdown_cancels_workers() {
        let (_sender, receiver) = mpsc::channel(1);
        let token = CancellationToken::new();
        let mut pool = pool(receiver, token.clone());
        pool.spawn_workers(2).unwrap();

        drop(pool);

        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn drop_after_join_leaves_token_alone() {
        let (sender, receiver) = mpsc::channel(1);
        let token = CancellationToken::new();
        let mut pool = pool(receiver, token.clone());
        pool.spawn_workers(2).unwrap();

        drop(sender);
        pool.join().await.unwrap();
        assert!(!pool.has_active_workers());
        drop(pool);

        assert!(!token.is_cancelled());
    }
}
