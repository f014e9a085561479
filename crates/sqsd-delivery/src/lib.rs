//! Queue-to-HTTP delivery pipeline.
//!
//! A single receiver long-polls the queue and hands messages to a bounded
//! pool of workers. Each worker POSTs the message body to the target endpoint
//! and deletes the message from the queue only after a 2xx response. Any
//! other outcome leaves the message to reappear after its visibility timeout,
//! giving at-least-once delivery.
//!
//! The [`Supervisor`] owns the lifecycle: it starts the receiver and workers,
//! and on shutdown stops receiving, lets in-flight deliveries finish, and
//! waits for every task to exit.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::time::Duration;

pub mod acker;
pub mod backoff;
pub mod client;
pub mod error;
pub mod health;
pub mod queue;
pub mod receiver;
pub mod signing;
pub mod stats;
pub mod supervisor;
pub mod worker;
pub mod worker_pool;

pub use acker::Acknowledger;
pub use backoff::Backoff;
pub use client::{ClientConfig, DeliveryClient, DeliveryOutcome};
pub use error::{DeliveryError, ErrorCategory, Result};
pub use health::{HealthCheckConfig, HealthGate};
pub use queue::{QueueClient, SqsQueueClient};
pub use receiver::Receiver;
pub use signing::RequestSigner;
pub use stats::{DeliveryStats, StatsSnapshot};
pub use supervisor::{Supervisor, SupervisorState};
pub use worker::{DeliveryWorker, DispatchReceiver, WorkerConfig};
pub use worker_pool::WorkerPool;

/// Default maximum messages requested per receive call.
pub const DEFAULT_QUEUE_MAX_MESSAGES: u32 = 10;

/// Default long-poll wait per receive call.
pub const DEFAULT_QUEUE_WAIT_TIME: Duration = Duration::from_secs(10);

/// Default worker count and HTTP connection pool size.
pub const DEFAULT_HTTP_MAX_CONNS: usize = 50;

/// Default timeout for one HTTP delivery.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
