//! sqsd queue-to-HTTP delivery daemon.
//!
//! Loads configuration, optionally waits for the target application to
//! become healthy, then receives messages from the queue and delivers them
//! until a termination signal arrives.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqsd_core::RealClock;
use sqsd_delivery::{DeliveryClient, HealthGate, SqsQueueClient, Supervisor};
use tracing::info;

mod config;

use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.log_level)?;

    info!(
        queue_region = %config.queue_region,
        queue_url = %config.queue_url,
        http_url = %config.http_url,
        http_max_conns = config.http_max_conns,
        http_timeout_seconds = config.http_timeout,
        signing = config.signing_enabled(),
        health_check = !config.http_health_url.is_empty(),
        "configuration loaded"
    );

    let worker_config = config.to_worker_config();
    let client = DeliveryClient::new(config.to_client_config(), &worker_config)
        .context("invalid delivery configuration")?;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    if let Some(health_config) = config.to_health_check_config() {
        let gate = HealthGate::new(health_config, Arc::new(RealClock::new()))
            .context("invalid health check configuration")?;

        tokio::select! {
            _probes = gate.wait_until_healthy() => {
                info!("health check succeeded, starting message processing");
            },
            () = &mut shutdown => {
                info!("shutdown requested before startup completed");
                return Ok(());
            },
        }
    }

    let queue = SqsQueueClient::connect(&config.queue_region, config.aws_endpoint()).await;

    let mut supervisor = Supervisor::new(Arc::new(queue), client, worker_config);
    supervisor.start(config.http_max_conns).context("failed to start supervisor")?;
    supervisor.wait(shutdown).await.context("supervisor did not stop cleanly")?;

    info!("sqsd shutdown complete");
    Ok(())
}

/// Initializes JSON logging filtered by `log_level`.
fn init_tracing(log_level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let directive = if log_level.is_empty() { "info" } else { log_level };
    let filter = EnvFilter::try_new(directive)
        .with_context(|| format!("invalid LOG_LEVEL '{log_level}'"))?;

    let fmt_layer = fmt::layer().json().with_current_span(true).with_target(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    Ok(())
}

/// Completes on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C signal"),
        () = terminate => info!("received SIGTERM signal"),
    }
}
