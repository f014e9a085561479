//! Tests for the startup health gate.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use sqsd_core::TestClock;
use sqsd_delivery::{HealthCheckConfig, HealthGate};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

fn health_config(url: String, success_count: u32) -> HealthCheckConfig {
    HealthCheckConfig {
        url,
        initial_wait: Duration::from_secs(5),
        interval: Duration::from_secs(3),
        success_count,
        timeout: Duration::from_secs(1),
    }
}

async fn respond_once(server: &MockServer, status: u16) {
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(status))
        .up_to_n_times(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn healthy_target_passes_after_initial_wait() {
    let server = MockServer::start().await;
    respond_once(&server, 200).await;
    let clock = TestClock::new();

    let gate = HealthGate::new(
        health_config(format!("{}/health", server.uri()), 1),
        Arc::new(clock.clone()),
    )
    .unwrap();

    assert_eq!(gate.wait_until_healthy().await, 1);
    assert_eq!(clock.recorded_sleeps(), vec![Duration::from_secs(5)]);
}

#[tokio::test]
async fn failures_sleep_interval_then_retry() {
    let server = MockServer::start().await;
    respond_once(&server, 503).await;
    respond_once(&server, 503).await;
    respond_once(&server, 200).await;
    respond_once(&server, 200).await;
    let clock = TestClock::new();

    let gate = HealthGate::new(
        health_config(format!("{}/health", server.uri()), 2),
        Arc::new(clock.clone()),
    )
    .unwrap();

    assert_eq!(gate.wait_until_healthy().await, 4);
    assert_eq!(
        clock.recorded_sleeps(),
        vec![Duration::from_secs(5), Duration::from_secs(3), Duration::from_secs(3)],
        "successful probes are not followed by a sleep"
    );
}

#[tokio::test]
async fn failure_resets_consecutive_successes() {
    let server = MockServer::start().await;
    respond_once(&server, 200).await;
    respond_once(&server, 500).await;
    respond_once(&server, 200).await;
    respond_once(&server, 200).await;
    let clock = TestClock::new();

    let gate = HealthGate::new(
        health_config(format!("{}/health", server.uri()), 2),
        Arc::new(clock.clone()),
    )
    .unwrap();

    assert_eq!(gate.wait_until_healthy().await, 4);
}

#[tokio::test]
async fn only_200_counts_as_healthy() {
    let server = MockServer::start().await;
    respond_once(&server, 204).await;
    respond_once(&server, 200).await;
    let clock = TestClock::new();

    let gate = HealthGate::new(
        health_config(format!("{}/health", server.uri()), 1),
        Arc::new(clock.clone()),
    )
    .unwrap();

    assert_eq!(gate.wait_until_healthy().await, 2);
}

#[tokio::test]
async fn unreachable_target_keeps_probing() {
    let clock = TestClock::new();
    let gate =
        HealthGate::new(health_config("http://127.0.0.1:9/health".into(), 1), Arc::new(clock.clone()))
            .unwrap();

    let result = tokio::time::timeout(Duration::from_millis(300), gate.wait_until_healthy()).await;

    assert!(result.is_err(), "gate must not pass while the target is unreachable");
    assert!(clock.recorded_sleeps().len() >= 2);
}
