// ============================
// crates/backend-lib/tests/stream_relay.rs
// ============================
//! Relaying, isolation, cleanup and shutdown on `/ws/metrics`.
mod common;

use backend_lib::config::Environment;
use common::{expect_close, next_text, test_settings, TestServer};
use dashboard_common::MetricSample;
use futures_util::SinkExt;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

#[tokio::test]
async fn test_payloads_arrive_in_publish_order() {
    let server = TestServer::start().await;
    let mut ws = server.connect(&format!("?type=cpu&token={}", server.token())).await;
    server.wait_for_subscriptions("metrics:cpu", 1).await;

    for i in 0..5 {
        server.publish("metrics:cpu", &format!(r#"{{"seq":{i}}}"#)).await;
    }
    for i in 0..5 {
        assert_eq!(next_text(&mut ws).await, format!(r#"{{"seq":{i}}}"#));
    }
    server.stop().await;
}

#[tokio::test]
async fn test_default_type_is_cpu() {
    let server = TestServer::start().await;
    let _ws = server.connect(&format!("?token={}", server.token())).await;

    server.wait_for_subscriptions("metrics:cpu", 1).await;
    server.stop().await;
}

#[tokio::test]
async fn test_types_are_isolated() {
    let server = TestServer::start().await;
    let token = server.token();
    let mut cpu = server.connect(&format!("?type=cpu&token={token}")).await;
    let mut mem = server.connect(&format!("?type=mem&token={token}")).await;
    server.wait_for_subscriptions("metrics:cpu", 1).await;
    server.wait_for_subscriptions("metrics:mem", 1).await;

    server.publish("metrics:mem", "mem-1").await;
    server.publish("metrics:cpu", "cpu-1").await;

    assert_eq!(next_text(&mut cpu).await, "cpu-1");
    assert_eq!(next_text(&mut mem).await, "mem-1");
    server.stop().await;
}

#[tokio::test]
async fn test_disconnect_releases_subscription_and_spares_others() {
    let server = TestServer::start().await;
    let token = server.token();
    let mut leaving = server.connect(&format!("?type=cpu&token={token}")).await;
    let mut staying = server.connect(&format!("?type=cpu&token={token}")).await;
    server.wait_for_subscriptions("metrics:cpu", 2).await;

    leaving.close(None).await.unwrap();
    drop(leaving);
    server.wait_for_subscriptions("metrics:cpu", 1).await;

    server.publish("metrics:cpu", "still-here").await;
    assert_eq!(next_text(&mut staying).await, "still-here");

    // new connections are still served
    let mut late = server.connect(&format!("?type=cpu&token={token}")).await;
    server.wait_for_subscriptions("metrics:cpu", 2).await;
    server.publish("metrics:cpu", "welcome").await;
    assert_eq!(next_text(&mut late).await, "welcome");
    server.stop().await;
}

#[tokio::test]
async fn test_dropped_client_releases_subscription() {
    let server = TestServer::start().await;
    let ws = server.connect(&format!("?type=cpu&token={}", server.token())).await;
    server.wait_for_subscriptions("metrics:cpu", 1).await;

    // no close handshake, just gone
    drop(ws);
    server.wait_for_subscriptions("metrics:cpu", 0).await;
    server.stop().await;
}

#[tokio::test]
async fn test_client_frames_after_handshake_are_ignored() {
    let server = TestServer::start().await;
    let mut ws = server.connect(&format!("?type=cpu&token={}", server.token())).await;
    server.wait_for_subscriptions("metrics:cpu", 1).await;

    ws.send(Message::text("chatter")).await.unwrap();
    server.publish("metrics:cpu", "payload").await;

    assert_eq!(next_text(&mut ws).await, "payload");
    assert_eq!(server.backbone.active_subscriptions("metrics:cpu"), 1);
    server.stop().await;
}

#[tokio::test]
async fn test_upstream_unavailable_closes_with_1011() {
    let server = TestServer::start().await;
    server.backbone.set_available(false);

    let mut ws = server.connect(&format!("?type=cpu&token={}", server.token())).await;
    assert_eq!(
        expect_close(&mut ws).await,
        (1011, "Upstream unavailable".to_string())
    );
    assert_eq!(server.backbone.total_active_subscriptions(), 0);

    // the process keeps serving once the backbone is back
    server.backbone.set_available(true);
    let mut ws = server.connect(&format!("?type=cpu&token={}", server.token())).await;
    server.wait_for_subscriptions("metrics:cpu", 1).await;
    server.publish("metrics:cpu", "recovered").await;
    assert_eq!(next_text(&mut ws).await, "recovered");
    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_with_1001_and_unsubscribes() {
    let server = TestServer::start().await;
    let token = server.token();
    let mut first = server.connect(&format!("?type=cpu&token={token}")).await;
    let mut second = server.connect(&format!("?type=mem&token={token}")).await;
    server.wait_for_subscriptions("metrics:cpu", 1).await;
    server.wait_for_subscriptions("metrics:mem", 1).await;

    server.shutdown_token().cancel();

    assert_eq!(expect_close(&mut first).await.0, 1001);
    assert_eq!(expect_close(&mut second).await.0, 1001);

    let backbone = server.backbone.clone();
    server.stop().await;
    assert_eq!(backbone.total_active_subscriptions(), 0);
}

#[tokio::test]
async fn test_sample_publisher_feeds_cpu_stream() {
    let mut settings = test_settings();
    settings.environment = Environment::Development;
    settings.publisher.interval_ms = 20;
    settings.publisher.value = 50.0;
    let server = TestServer::start_with(settings).await;

    let mut ws = server.connect(&format!("?type=cpu&token={}", server.token())).await;

    let sample: MetricSample = serde_json::from_str(&next_text(&mut ws).await).unwrap();
    assert_eq!(sample.metric_type, "cpu");
    assert_eq!(sample.value, 50.0);
    assert!(sample.timestamp.ends_with('Z'));
    server.stop().await;
}

#[tokio::test]
async fn test_client_that_stops_reading_is_released() {
    let mut settings = test_settings();
    settings.relay.send_timeout_secs = 1;
    let server = TestServer::start_with(settings).await;

    // connected but never polled again, so its receive buffer fills up
    let _ws = server.connect(&format!("?type=cpu&token={}", server.token())).await;
    server.wait_for_subscriptions("metrics:cpu", 1).await;

    let payload = "x".repeat(1024 * 1024);
    let stalled = tokio::time::timeout(Duration::from_secs(30), async {
        while server.backbone.active_subscriptions("metrics:cpu") > 0 {
            server.publish("metrics:cpu", &payload).await;
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(stalled.is_ok(), "relay never gave up on the blocked client");

    let connections = server.state.connections.clone();
    tokio::time::timeout(Duration::from_secs(5), async {
        while connections.open() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("connection task still running after the relay stalled");

    server.stop().await;
}
