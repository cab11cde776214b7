// ============================
// crates/backend-lib/tests/stream_auth.rs
// ============================
//! In-band authentication on `/ws/metrics`, end to end.
mod common;

use backend_lib::auth::TokenIssuer;
use chrono::Duration;
use common::{expect_close, next_text, test_settings, TestServer, ADMIN};
use futures_util::SinkExt;
use jsonwebtoken::Algorithm;
use tokio_tungstenite::tungstenite::{self, Message};

const SAMPLE: &str = r#"{"timestamp":"2025-01-01T00:00:00Z","value":50,"type":"cpu"}"#;

#[tokio::test]
async fn test_non_credential_first_frame_closes_with_1008() {
    let server = TestServer::start().await;
    let mut ws = server.connect("?type=cpu").await;

    ws.send(Message::text(r#"{"hello":"world"}"#)).await.unwrap();

    assert_eq!(expect_close(&mut ws).await, (1008, "Missing auth token".to_string()));
    assert_eq!(server.backbone.subscriptions_opened(), 0);
    server.stop().await;
}

#[tokio::test]
async fn test_unparseable_first_frame_closes_with_1008() {
    let server = TestServer::start().await;
    let mut ws = server.connect("?type=cpu").await;

    ws.send(Message::text("definitely not json")).await.unwrap();

    assert_eq!(expect_close(&mut ws).await, (1008, "Missing auth token".to_string()));
    assert_eq!(server.backbone.subscriptions_opened(), 0);
    server.stop().await;
}

#[tokio::test]
async fn test_silent_client_closes_with_1008_after_timeout() {
    let mut settings = test_settings();
    settings.auth.handshake_timeout_secs = 1;
    let server = TestServer::start_with(settings).await;
    let mut ws = server.connect("?type=cpu").await;

    assert_eq!(expect_close(&mut ws).await, (1008, "Missing auth token".to_string()));
    assert_eq!(server.backbone.subscriptions_opened(), 0);
    server.stop().await;
}

#[tokio::test]
async fn test_query_token_relays_exact_payload() {
    let server = TestServer::start().await;
    let mut ws = server.connect(&format!("?type=cpu&token={}", server.token())).await;

    server.wait_for_subscriptions("metrics:cpu", 1).await;
    assert_eq!(server.publish("metrics:cpu", SAMPLE).await, 1);

    assert_eq!(next_text(&mut ws).await, SAMPLE);
    assert_eq!(server.backbone.subscriptions_opened(), 1);
    server.stop().await;
}

#[tokio::test]
async fn test_bearer_header_authenticates() {
    let server = TestServer::start().await;
    let mut ws = server.connect_with_bearer("?type=cpu", &server.token()).await;

    server.wait_for_subscriptions("metrics:cpu", 1).await;
    server.publish("metrics:cpu", SAMPLE).await;

    assert_eq!(next_text(&mut ws).await, SAMPLE);
    server.stop().await;
}

#[tokio::test]
async fn test_first_frame_token_authenticates() {
    let server = TestServer::start().await;
    let mut ws = server.connect("?type=cpu").await;

    let handshake = serde_json::json!({ "token": server.token() }).to_string();
    ws.send(Message::text(handshake)).await.unwrap();

    server.wait_for_subscriptions("metrics:cpu", 1).await;
    server.publish("metrics:cpu", SAMPLE).await;

    assert_eq!(next_text(&mut ws).await, SAMPLE);
    server.stop().await;
}

#[tokio::test]
async fn test_query_token_wins_over_header() {
    let server = TestServer::start().await;
    let mut ws = server
        .connect_with_bearer("?type=cpu&token=garbage", &server.token())
        .await;

    assert_eq!(
        expect_close(&mut ws).await,
        (1008, "Could not validate credentials".to_string())
    );
    assert_eq!(server.backbone.subscriptions_opened(), 0);
    server.stop().await;
}

#[tokio::test]
async fn test_rejected_tokens_never_subscribe() {
    let server = TestServer::start().await;
    let secret = server.state.settings.auth.secret_key.clone();

    let forged = TokenIssuer::new(b"someone-elses-secret", Algorithm::HS256, Duration::minutes(5))
        .mint(ADMIN)
        .unwrap()
        .access_token;
    let expired = TokenIssuer::new(secret.as_bytes(), Algorithm::HS256, Duration::minutes(-10))
        .mint(ADMIN)
        .unwrap()
        .access_token;
    let stranger = server.state.tokens.mint("ghost@example.com").unwrap().access_token;

    for token in [forged, expired, stranger] {
        let mut ws = server.connect(&format!("?type=cpu&token={token}")).await;
        assert_eq!(
            expect_close(&mut ws).await,
            (1008, "Could not validate credentials".to_string())
        );
    }

    assert_eq!(server.backbone.subscriptions_opened(), 0);
    server.stop().await;
}

#[tokio::test]
async fn test_removed_identity_is_locked_out() {
    let server = TestServer::start().await;
    let token = server.token();
    server.store.remove(ADMIN);

    let mut ws = server.connect(&format!("?token={token}")).await;
    assert_eq!(expect_close(&mut ws).await.0, 1008);
    assert_eq!(server.backbone.subscriptions_opened(), 0);
    server.stop().await;
}

#[tokio::test]
async fn test_invalid_metric_type_is_rejected_before_upgrade() {
    let server = TestServer::start().await;
    let url = server.url(&format!("?type=bad%20type&token={}", server.token()));

    match tokio_tungstenite::connect_async(url).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 400),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("upgrade should have been refused"),
    }
    server.stop().await;
}
