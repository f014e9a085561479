//! Startup health gate.
//!
//! Before any message is received, the target application can be probed
//! until it answers `200 OK` a configured number of times in a row. This
//! keeps messages from being burned against an application that is still
//! booting.

use std::{sync::Arc, time::Duration};

use reqwest::{StatusCode, Url};
use sqsd_core::Clock;
use tracing::{debug, info};

use crate::error::{DeliveryError, Result};

/// Health probe settings.
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// URL probed with GET.
    pub url: String,
    /// Pause before the first probe.
    pub initial_wait: Duration,
    /// Pause after a failed probe.
    pub interval: Duration,
    /// Consecutive `200 OK` responses required.
    pub success_count: u32,
    /// Timeout for a single probe.
    pub timeout: Duration,
}

/// Probes the target until it reports healthy.
#[derive(Debug)]
pub struct HealthGate {
    client: reqwest::Client,
    url: Url,
    config: HealthCheckConfig,
    clock: Arc<dyn Clock>,
}

impl HealthGate {
    /// Creates a gate for `config`.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the URL is invalid, the
    /// success count is zero, or the HTTP client cannot be built.
    pub fn new(config: HealthCheckConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let url = Url::parse(&config.url).map_err(|e| {
            DeliveryError::configuration(format!("invalid health URL '{}': {e}", config.url))
        })?;
        if config.success_count == 0 {
            return Err(DeliveryError::configuration("health success count must be at least 1"));
        }

        let client = reqwest::Client::builder().timeout(config.timeout).build().map_err(|e| {
            DeliveryError::configuration(format!("failed to build health check client: {e}"))
        })?;

        Ok(Self { client, url, config, clock })
    }

    /// Waits until the target answers `200 OK` the configured number of times
    /// in a row.
    ///
    /// Never gives up; wrap the call in a `select!` to make it cancellable.
    /// Returns the total number of probes sent.
    pub async fn wait_until_healthy(&self) -> u32 {
        info!(
            url = %self.url,
            success_count = self.config.success_count,
            initial_wait_ms = u64::try_from(self.config.initial_wait.as_millis()).unwrap_or(u64::MAX),
            "waiting for target to become healthy"
        );
        self.clock.sleep(self.config.initial_wait).await;

        let mut probes = 0_u32;
        let mut consecutive = 0_u32;

        loop {
            probes = probes.saturating_add(1);

            match self.probe().await {
                Ok(()) => {
                    consecutive += 1;
                    debug!(consecutive, probes, "health probe succeeded");
                    if consecutive >= self.config.success_count {
                        info!(probes, "target is healthy");
                        return probes;
                    }
                },
                Err(error) => {
                    consecutive = 0;
                    info!(
                        error = %error,
                        probes,
                        retry_in_ms = u64::try_from(self.config.interval.as_millis()).unwrap_or(u64::MAX),
                        "target not healthy yet"
                    );
                    self.clock.sleep(self.config.interval).await;
                },
            }
        }
    }

    async fn probe(&self) -> Result<()> {
        let response = self.client.get(self.url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                DeliveryError::timeout(self.config.timeout.as_secs())
            } else {
                DeliveryError::network(e.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::OK {
            Ok(())
        } else {
            Err(DeliveryError::unexpected_status(status.as_u16(), String::new()))
        }
    }
}
