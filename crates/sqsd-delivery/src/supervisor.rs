//! Supervisor owning the receiver and worker pool lifecycle.
//!
//! States move strictly forward:
//! `Created -> Starting -> Running -> Stopping -> Stopped`. A supervisor that
//! was never started may go directly from `Created` to `Stopped`. Once stopped
//! it cannot be started again.

use std::{fmt, future::Future, sync::Arc, time::Duration};

use sqsd_core::{Clock, RealClock};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    acker::Acknowledger,
    client::DeliveryClient,
    error::{DeliveryError, Result},
    queue::QueueClient,
    receiver::Receiver,
    stats::{DeliveryStats, StatsSnapshot},
    worker::WorkerConfig,
    worker_pool::WorkerPool,
};

/// Grace added to the HTTP timeout when bounding the shutdown drain.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Messages buffered between the receiver and idle workers.
const DISPATCH_CAPACITY: usize = 1;

/// Lifecycle state of a [`Supervisor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Constructed, nothing running.
    Created,
    /// Spawning the receiver and workers.
    Starting,
    /// Receiving and delivering.
    Running,
    /// Cancellation raised, draining in-flight deliveries.
    Stopping,
    /// Every task has exited.
    Stopped,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Runs one receiver and a fixed pool of delivery workers.
pub struct Supervisor {
    state: SupervisorState,
    queue: Arc<dyn QueueClient>,
    client: Arc<DeliveryClient>,
    config: WorkerConfig,
    stats: Arc<DeliveryStats>,
    cancellation_token: CancellationToken,
    clock: Arc<dyn Clock>,
    shutdown_timeout: Duration,
    receiver_handle: Option<JoinHandle<()>>,
    worker_pool: Option<WorkerPool>,
}

impl Supervisor {
    /// Creates a supervisor in the `Created` state.
    ///
    /// The configuration is taken by value and never changes afterwards.
    pub fn new(queue: Arc<dyn QueueClient>, client: DeliveryClient, config: WorkerConfig) -> Self {
        let shutdown_timeout = client.timeout() + SHUTDOWN_GRACE;

        Self {
            state: SupervisorState::Created,
            queue,
            client: Arc::new(client),
            config,
            stats: Arc::new(DeliveryStats::new()),
            cancellation_token: CancellationToken::new(),
            clock: Arc::new(RealClock::new()),
            shutdown_timeout,
            receiver_handle: None,
            worker_pool: None,
        }
    }

    /// Uses `clock` for the receiver's error backoff.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Overrides how long shutdown waits for workers to drain.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Returns the configuration the supervisor was built with.
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Returns a copy of the delivery counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns a token that stops the supervisor when cancelled.
    ///
    /// Cancelling it has the same effect as the shutdown future passed to
    /// [`Supervisor::wait`] completing.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Starts the receiver and `worker_count` workers.
    ///
    /// Returns once every task is spawned.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::InvalidState` unless the supervisor is
    /// `Created`, and `DeliveryError::ConfigurationError` if `worker_count`
    /// is zero.
    pub fn start(&mut self, worker_count: usize) -> Result<()> {
        self.expect_state(SupervisorState::Created)?;
        if worker_count == 0 {
            return Err(DeliveryError::configuration("worker count must be greater than zero"));
        }

        self.state = SupervisorState::Starting;
        info!(
            worker_count,
            queue_url = %self.config.queue_url,
            target_url = %self.client.url(),
            signing = self.client.is_signing(),
            "starting supervisor"
        );

        // Outstanding work is at most one message per worker, one buffered
        // message and the rest of the receiver's current batch
        let (sender, dispatch) = mpsc::channel(DISPATCH_CAPACITY);

        let acker = Acknowledger::new(
            self.queue.clone(),
            self.config.queue_url.clone(),
            self.stats.clone(),
        );
        let mut worker_pool = WorkerPool::new(
            Arc::new(Mutex::new(dispatch)),
            self.client.clone(),
            acker,
            self.stats.clone(),
            self.cancellation_token.clone(),
        );
        worker_pool.spawn_workers(worker_count)?;
        self.worker_pool = Some(worker_pool);

        let receiver = Receiver::new(
            self.queue.clone(),
            &self.config,
            self.stats.clone(),
            self.cancellation_token.clone(),
        )
        .with_clock(self.clock.clone());
        self.receiver_handle = Some(tokio::spawn(receiver.run(sender)));

        self.state = SupervisorState::Running;
        info!("supervisor running");
        Ok(())
    }

    /// Blocks until `shutdown` completes or the cancellation token is
    /// cancelled, then stops gracefully.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::InvalidState` unless the supervisor is
    /// `Running`, and any error from [`Supervisor::stop`].
    pub async fn wait(&mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        self.expect_state(SupervisorState::Running)?;

        tokio::select! {
            () = shutdown => info!("shutdown requested"),
            () = self.cancellation_token.cancelled() => info!("supervisor cancelled"),
        }

        self.stop().await
    }

    /// Stops receiving and waits for every in-flight delivery to finish.
    ///
    /// Calling `stop` on a supervisor that was never started moves it
    /// straight to `Stopped`. Calling it again once stopped is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ShutdownTimeout` if the drain exceeds the
    /// shutdown timeout, or a panic error if a task panicked. The supervisor
    /// is `Stopped` in every case.
    pub async fn stop(&mut self) -> Result<()> {
        match self.state {
            SupervisorState::Created => {
                self.state = SupervisorState::Stopped;
                info!("supervisor stopped before start");
                return Ok(());
            },
            SupervisorState::Stopped => return Ok(()),
            SupervisorState::Starting | SupervisorState::Running | SupervisorState::Stopping => {},
        }

        self.state = SupervisorState::Stopping;
        info!(
            in_flight = self.stats.in_flight(),
            timeout_ms = u64::try_from(self.shutdown_timeout.as_millis()).unwrap_or(u64::MAX),
            "stopping supervisor, draining in-flight deliveries"
        );
        self.cancellation_token.cancel();

        let receiver_handle = self.receiver_handle.take();
        let worker_pool = self.worker_pool.take();
        let drain = async move {
            let receiver_result = match receiver_handle {
                Some(handle) => handle.await.map_err(|e| {
                    error!(error = %e, "receiver task panicked");
                    DeliveryError::ReceiverPanic { error: e.to_string() }
                }),
                None => Ok(()),
            };

            let workers_result = match worker_pool {
                Some(mut pool) => pool.join().await,
                None => Ok(()),
            };

            receiver_result.and(workers_result)
        };

        let result = match tokio::time::timeout(self.shutdown_timeout, drain).await {
            Ok(result) => result,
            Err(_elapsed) => {
                error!(
                    timeout_ms = u64::try_from(self.shutdown_timeout.as_millis()).unwrap_or(u64::MAX),
                    in_flight = self.stats.in_flight(),
                    "shutdown timed out, some deliveries may still be running"
                );
                Err(DeliveryError::ShutdownTimeout { timeout: self.shutdown_timeout })
            },
        };

        self.state = SupervisorState::Stopped;
        let stats = self.stats.snapshot();
        info!(
            received = stats.received,
            delivered = stats.delivered,
            failed = stats.failed,
            acknowledged = stats.acknowledged,
            ack_failures = stats.ack_failures,
            relinquished = stats.relinquished,
            peak_in_flight = stats.peak_in_flight,
            "supervisor stopped"
        );

        result
    }

    fn expect_state(&self, expected: SupervisorState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(DeliveryError::InvalidState { expected, actual: self.state })
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if matches!(self.state, SupervisorState::Running) {
            error!("supervisor dropped while running, cancelling tasks");
            self.cancellation_token.cancel();
        }
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{client::ClientConfig, queue::mock::MockQueueClient};

    fn supervisor() -> Supervisor {
        let config = WorkerConfig {
            queue_url: "q".into(),
            queue_wait_time: Duration::from_millis(20),
            http_url: "http://127.0.0.1:9/".into(),
            ..WorkerConfig::default()
        };
        let client = DeliveryClient::new(ClientConfig::default(), &config).unwrap();
        Supervisor::new(Arc::new(MockQueueClient::new()), client, config)
    }

    #[test]
    fn state_display_is_lowercase() {
        assert_eq!(SupervisorState::Created.to_string(), "created");
        assert_eq!(SupervisorState::Stopping.to_string(), "stopping");
    }

    #[test]
    fn shutdown_timeout_defaults_to_http_timeout_plus_grace() {
        let supervisor = supervisor();
        assert_eq!(supervisor.shutdown_timeout, crate::DEFAULT_HTTP_TIMEOUT + SHUTDOWN_GRACE);
    }

    #[tokio::test]
    async fn lifecycle_moves_forward() {
        let mut supervisor = supervisor();
        assert_eq!(supervisor.state(), SupervisorState::Created);

        supervisor.start(2).unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Running);

        supervisor.stop().await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn stopped_supervisor_cannot_restart() {
        let mut supervisor = supervisor();
        supervisor.start(1).unwrap();
        supervisor.stop().await.unwrap();

        let result = supervisor.start(1);

        assert!(matches!(
            result,
            Err(DeliveryError::InvalidState {
                expected: SupervisorState::Created,
                actual: SupervisorState::Stopped,
            })
        ));
    }

    #[tokio::test]
    async fn stop_before_start_goes_straight_to_stopped() {
        let mut supervisor = supervisor();

        supervisor.stop().await.unwrap();

        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert!(supervisor.start(1).is_err());
    }

    #[tokio::test]
    async fn wait_requires_running() {
        let mut supervisor = supervisor();

        let result = supervisor.wait(std::future::ready(())).await;

        assert!(matches!(result, Err(DeliveryError::InvalidState { .. })));
        assert_eq!(supervisor.state(), SupervisorState::Created);
    }

    #[tokio::test]
    async fn zero_workers_rejected_without_state_change() {
        let mut supervisor = supervisor();

        assert!(matches!(supervisor.start(0), Err(DeliveryError::ConfigurationError { .. })));
        assert_eq!(supervisor.state(), SupervisorState::Created);
    }

    #[tokio::test]
    async fn cancellation_token_ends_wait() {
        let mut supervisor = supervisor();
        supervisor.start(1).unwrap();
        let token = supervisor.cancellation_token();

        let waiter = supervisor.wait(std::future::pending());
        token.cancel();

        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("wait should return after cancellation")
            .unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }
}
