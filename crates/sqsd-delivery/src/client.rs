//! HTTP client that delivers queue messages to the target endpoint.
//!
//! Handles request construction, optional HMAC signing, and classification of
//! the response into a [`DeliveryOutcome`]. The client never retries; a failed
//! outcome leaves the message for the queue to redeliver.

use std::time::{Duration, Instant};

use reqwest::{
    header::{HeaderValue, CONTENT_TYPE},
    Response, Url,
};
use sqsd_core::Message;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::{
    error::{DeliveryError, Result},
    signing::RequestSigner,
    worker::WorkerConfig,
};

const MAX_LOGGED_BODY_SIZE: usize = 1024;

/// Configuration for the shared HTTP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Overall timeout for one delivery, including reading the response.
    pub timeout: Duration,
    /// Idle connections kept per host; sized to the worker count.
    pub max_idle_connections: usize,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: crate::DEFAULT_HTTP_TIMEOUT,
            max_idle_connections: crate::DEFAULT_HTTP_MAX_CONNS,
            user_agent: format!("sqsd/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Result of delivering one message.
#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    /// The endpoint answered with a 2xx status.
    Delivered {
        /// HTTP status code
        status_code: u16,
        /// Total duration of the request
        duration: Duration,
    },
    /// Non-2xx status, transport error, or timeout.
    Failed(DeliveryError),
}

impl DeliveryOutcome {
    /// Returns true if the message may be acknowledged.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// HTTP client for message delivery.
///
/// Cheap to share behind an `Arc`; all workers use one connection pool.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
    url: Url,
    content_type: Option<HeaderValue>,
    signer: Option<RequestSigner>,
}

impl DeliveryClient {
    /// Creates a delivery client for the target described by `worker_config`.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the target URL, content
    /// type, or HMAC header is invalid, or the HTTP client cannot be built.
    pub fn new(config: ClientConfig, worker_config: &WorkerConfig) -> Result<Self> {
        let url = Url::parse(&worker_config.http_url).map_err(|e| {
            DeliveryError::configuration(format!(
                "invalid target URL '{}': {e}",
                worker_config.http_url
            ))
        })?;

        let content_type = if worker_config.http_content_type.is_empty() {
            None
        } else {
            Some(HeaderValue::from_str(&worker_config.http_content_type).map_err(|e| {
                DeliveryError::configuration(format!("invalid content type: {e}"))
            })?)
        };

        let signer = RequestSigner::from_config(
            &worker_config.http_hmac_header,
            &worker_config.hmac_secret_key,
        )?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.max_idle_connections)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config, url, content_type, signer })
    }

    /// Returns the delivery target.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// Returns true if requests carry a signature header.
    pub fn is_signing(&self) -> bool {
        self.signer.is_some()
    }

    /// Delivers a message as a single POST to the target endpoint.
    pub async fn deliver(&self, message: &Message) -> DeliveryOutcome {
        let delivery_id = Uuid::new_v4();
        let span = info_span!(
            "delivery",
            message_id = %message.display_id(),
            delivery_id = %delivery_id,
            url = %self.url,
        );

        async move {
            let start_time = Instant::now();
            tracing::debug!(body_size = message.body.len(), "starting delivery");

            let mut request = self.client.post(self.url.clone()).body(message.body.clone());

            if let Some(content_type) = &self.content_type {
                request = request.header(CONTENT_TYPE, content_type.clone());
            }

            if let Some(signer) = &self.signer {
                request = request.header(signer.header().clone(), signer.sign(&message.body));
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    let duration = start_time.elapsed();
                    tracing::debug!(duration_ms = duration.as_millis(), "request failed: {}", e);
                    return DeliveryOutcome::Failed(self.classify_transport_error(&e));
                },
            };

            let status = response.status();
            if status.is_success() {
                // Drain the body so the connection returns to the pool
                let _ = response.bytes().await;
                let duration = start_time.elapsed();
                tracing::debug!(
                    status = status.as_u16(),
                    duration_ms = duration.as_millis(),
                    "received success response"
                );
                return DeliveryOutcome::Delivered { status_code: status.as_u16(), duration };
            }

            let body = read_body_for_logging(response).await;
            tracing::debug!(
                status = status.as_u16(),
                duration_ms = start_time.elapsed().as_millis(),
                "received non-success response"
            );
            DeliveryOutcome::Failed(DeliveryError::unexpected_status(status.as_u16(), body))
        }
        .instrument(span)
        .await
    }

    fn classify_transport_error(&self, error: &reqwest::Error) -> DeliveryError {
        if error.is_timeout() {
            DeliveryError::timeout(self.config.timeout.as_secs())
        } else if error.is_connect() {
            DeliveryError::network(format!("connection failed: {error}"))
        } else {
            DeliveryError::network(error.to_string())
        }
    }
}

/// Reads at most a short prefix of a failed response for diagnostics.
async fn read_body_for_logging(response: Response) -> String {
    match response.bytes().await {
        Ok(bytes) if bytes.len() > MAX_LOGGED_BODY_SIZE => {
            let truncated = String::from_utf8_lossy(&bytes[..MAX_LOGGED_BODY_SIZE]);
            format!("{truncated}... (truncated)")
        },
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => format!("[failed to read response body: {e}]"),
    }
}
