//! Daemon configuration.

use std::time::Duration;

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use sqsd_delivery::{ClientConfig, HealthCheckConfig, WorkerConfig};

const CONFIG_FILE: &str = "sqsd.toml";
const ENV_PREFIX: &str = "SQSD_";

/// Free-text settings and their environment variables. These are read
/// verbatim so that values like `0123` or `[abc]` are not parsed as numbers
/// or lists.
const TEXT_SETTINGS: &[(&str, &str)] = &[
    ("queue_region", "SQSD_QUEUE_REGION"),
    ("queue_url", "SQSD_QUEUE_URL"),
    ("aws_endpoint", "SQSD_AWS_ENDPOINT"),
    ("http_url", "SQSD_HTTP_URL"),
    ("http_content_type", "SQSD_HTTP_CONTENT_TYPE"),
    ("http_hmac_header", "SQSD_HTTP_HMAC_HEADER"),
    ("hmac_secret_key", "SQSD_HMAC_SECRET_KEY"),
    ("http_health_url", "SQSD_HTTP_HEALTH_URL"),
    ("log_level", "LOG_LEVEL"),
];

/// Complete daemon configuration.
///
/// Loaded in priority order:
/// 1. Environment variables prefixed with `SQSD_`, plus `LOG_LEVEL`
/// 2. Configuration file (`sqsd.toml`)
/// 3. Built-in defaults
///
/// Field names are the environment variable names without the prefix, in
/// lowercase: `SQSD_HTTP_MAX_CONNS` sets `http_max_conns`.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Queue
    /// AWS region of the queue. Required.
    pub queue_region: String,
    /// Queue URL. Required.
    pub queue_url: String,
    /// Maximum messages per receive call, 1 to 10.
    pub queue_max_msgs: u32,
    /// Long-poll wait in seconds, 0 to 20.
    pub queue_wait_time: u64,
    /// Override for the queue service endpoint, for local brokers.
    pub aws_endpoint: String,

    // Delivery
    /// Worker count and connection pool size.
    pub http_max_conns: usize,
    /// Delivery target. Required.
    pub http_url: String,
    /// `Content-Type` of delivery requests; empty omits the header.
    pub http_content_type: String,
    /// Per-delivery timeout in seconds.
    pub http_timeout: u64,
    /// Signature header name; empty disables signing.
    pub http_hmac_header: String,
    /// HMAC secret key; empty disables signing.
    pub hmac_secret_key: String,

    // Health gate
    /// URL probed before startup; empty disables the gate.
    pub http_health_url: String,
    /// Seconds to wait before the first probe.
    pub http_health_wait: u64,
    /// Seconds to wait after a failed probe.
    pub http_health_interval: u64,
    /// Consecutive `200 OK` responses required.
    pub http_health_success_count: u32,

    // Logging
    /// Tracing filter directive, for example `info` or `sqsd_delivery=debug`.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_region: String::new(),
            queue_url: String::new(),
            queue_max_msgs: sqsd_delivery::DEFAULT_QUEUE_MAX_MESSAGES,
            queue_wait_time: sqsd_delivery::DEFAULT_QUEUE_WAIT_TIME.as_secs(),
            aws_endpoint: String::new(),
            http_max_conns: sqsd_delivery::DEFAULT_HTTP_MAX_CONNS,
            http_url: String::new(),
            http_content_type: String::new(),
            http_timeout: sqsd_delivery::DEFAULT_HTTP_TIMEOUT.as_secs(),
            http_hmac_header: String::new(),
            hmac_secret_key: String::new(),
            http_health_url: String::new(),
            http_health_wait: 5,
            http_health_interval: 5,
            http_health_success_count: 1,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Loads and validates configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be parsed or fails validation.
    pub fn load() -> Result<Self> {
        Self::from_figment(&Self::figment())
    }

    /// Layered providers, lowest priority first.
    pub fn figment() -> Figment {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX));

        TEXT_SETTINGS.iter().fold(figment, |figment, (key, var)| match std::env::var(var) {
            Ok(value) => figment.merge(Serialized::default(key, value)),
            Err(_) => figment,
        })
    }

    fn from_figment(figment: &Figment) -> Result<Self> {
        let config: Self = figment.extract().context("failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Converts to the delivery crate's worker configuration.
    pub fn to_worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            queue_url: self.queue_url.clone(),
            queue_max_messages: self.queue_max_msgs,
            queue_wait_time: Duration::from_secs(self.queue_wait_time),
            http_url: self.http_url.clone(),
            http_content_type: self.http_content_type.clone(),
            http_hmac_header: self.http_hmac_header.clone(),
            hmac_secret_key: self.hmac_secret_key.as_bytes().to_vec(),
        }
    }

    /// Converts to HTTP client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(self.http_timeout),
            max_idle_connections: self.http_max_conns,
            ..ClientConfig::default()
        }
    }

    /// Returns the health gate configuration, or `None` when no health URL
    /// is set.
    pub fn to_health_check_config(&self) -> Option<HealthCheckConfig> {
        if self.http_health_url.is_empty() {
            return None;
        }

        Some(HealthCheckConfig {
            url: self.http_health_url.clone(),
            initial_wait: Duration::from_secs(self.http_health_wait),
            interval: Duration::from_secs(self.http_health_interval),
            success_count: self.http_health_success_count,
            timeout: Duration::from_secs(self.http_timeout),
        })
    }

    /// Returns the endpoint override, if any.
    pub fn aws_endpoint(&self) -> Option<&str> {
        (!self.aws_endpoint.is_empty()).then_some(self.aws_endpoint.as_str())
    }

    /// Returns true if requests will carry a signature header.
    pub fn signing_enabled(&self) -> bool {
        !self.http_hmac_header.is_empty() && !self.hmac_secret_key.is_empty()
    }

    fn validate(&self) -> Result<()> {
        if self.queue_region.is_empty() {
            anyhow::bail!("SQSD_QUEUE_REGION cannot be empty");
        }

        if self.queue_url.is_empty() {
            anyhow::bail!("SQSD_QUEUE_URL cannot be empty");
        }

        if self.http_url.is_empty() {
            anyhow::bail!("SQSD_HTTP_URL cannot be empty");
        }

        if !(1..=10).contains(&self.queue_max_msgs) {
            anyhow::bail!("SQSD_QUEUE_MAX_MSGS must be between 1 and 10");
        }

        if self.queue_wait_time > 20 {
            anyhow::bail!("SQSD_QUEUE_WAIT_TIME must be at most 20 seconds");
        }

        if self.http_max_conns == 0 {
            anyhow::bail!("SQSD_HTTP_MAX_CONNS must be greater than 0");
        }

        if self.http_timeout == 0 {
            anyhow::bail!("SQSD_HTTP_TIMEOUT must be greater than 0");
        }

        if self.http_health_success_count == 0 {
            anyhow::bail!("SQSD_HTTP_HEALTH_SUCCESS_COUNT must be greater than 0");
        }

        Ok(())
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secret = if self.hmac_secret_key.is_empty() { "<empty>" } else { "<redacted>" };
        f.debug_struct("Config")
            .field("queue_region", &self.queue_region)
            .field("queue_url", &self.queue_url)
            .field("queue_max_msgs", &self.queue_max_msgs)
            .field("queue_wait_time", &self.queue_wait_time)
            .field("aws_endpoint", &self.aws_endpoint)
            .field("http_max_conns", &self.http_max_conns)
            .field("http_url", &self.http_url)
            .field("http_content_type", &self.http_content_type)
            .field("http_timeout", &self.http_timeout)
            .field("http_hmac_header", &self.http_hmac_header)
            .field("hmac_secret_key", &secret)
            .field("http_health_url", &self.http_health_url)
            .field("http_health_wait", &self.http_health_wait)
            .field("http_health_interval", &self.http_health_interval)
            .field("http_health_success_count", &self.http_health_success_count)
            .field("log_level", &self.log_level)
            .finish()
    }
}
