// ============================
// crates/backend-lib/tests/common/mod.rs
// ============================
//! Shared setup for integration tests: a real server on an ephemeral port,
//! an in-memory backbone the test can publish into, and a WebSocket client.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use backend_lib::config::{BackboneKind, Environment, Settings, StorageKind};
use backend_lib::pubsub::MemoryBackbone;
use backend_lib::server::Application;
use backend_lib::storage::MemoryUserStore;
use backend_lib::AppState;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const ADMIN: &str = "admin@example.com";
pub const ADMIN_PASSWORD: &str = "adminpass";

const WAIT: Duration = Duration::from_secs(5);

/// Settings for a fast, self-contained server. The sample publisher is off
/// (production environment) so tests decide what gets published.
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.bind_addr = SocketAddr::from(([127, 0, 0, 1], 0));
    settings.environment = Environment::Production;
    settings.auth.secret_key = "integration-test-secret".to_string();
    settings.auth.password_cost = 4;
    settings.auth.handshake_timeout_secs = 2;
    settings.shutdown_grace_secs = 2;
    settings.pubsub.backend = BackboneKind::Memory;
    settings.storage.backend = StorageKind::Memory;
    settings
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub backbone: Arc<MemoryBackbone>,
    pub store: Arc<MemoryUserStore>,
    pub state: AppState,
    shutdown: CancellationToken,
    task: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(test_settings()).await
    }

    pub async fn start_with(settings: Settings) -> Self {
        let backbone = Arc::new(MemoryBackbone::new());
        let store = Arc::new(MemoryUserStore::new());
        let app = Application::build_with(settings, store.clone(), backbone.clone())
            .await
            .expect("failed to build application");

        let addr = app.local_addr().unwrap();
        let state = app.state().clone();
        let shutdown = app.shutdown_token();
        let task = tokio::spawn(app.run_until(std::future::pending()));

        Self {
            addr,
            backbone,
            store,
            state,
            shutdown,
            task,
        }
    }

    pub fn token(&self) -> String {
        self.state.tokens.mint(ADMIN).unwrap().access_token
    }

    pub fn url(&self, query: &str) -> String {
        format!("ws://{}/ws/metrics{query}", self.addr)
    }

    pub async fn connect(&self, query: &str) -> WsClient {
        let (ws, _) = connect_async(self.url(query)).await.expect("failed to connect");
        ws
    }

    pub async fn connect_with_bearer(&self, query: &str, token: &str) -> WsClient {
        let mut request = self.url(query).into_client_request().unwrap();
        request
            .headers_mut()
            .insert(AUTHORIZATION, format!("Bearer {token}").parse().unwrap());
        let (ws, _) = connect_async(request).await.expect("failed to connect");
        ws
    }

    /// Wait until `channel` has exactly `count` active subscriptions
    pub async fn wait_for_subscriptions(&self, channel: &str, count: usize) {
        let backbone = self.backbone.clone();
        let channel = channel.to_string();
        tokio::time::timeout(WAIT, async move {
            while backbone.active_subscriptions(&channel) != count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {count} subscriptions"));
    }

    pub async fn publish(&self, channel: &str, payload: &str) -> usize {
        use backend_lib::pubsub::Backbone;
        self.backbone.publish(channel, payload).await.unwrap()
    }

    /// Trigger shutdown and wait for the server to finish
    pub async fn stop(self) {
        self.shutdown.cancel();
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("server did not stop in time")
            .unwrap()
            .unwrap();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

/// Next text frame, failing on anything else
pub async fn next_text(ws: &mut WsClient) -> String {
    loop {
        let frame = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("stream error");
        match frame {
            Message::Text(text) => return text.as_str().to_owned(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

/// Wait for the server's close frame and return its code and reason.
/// Fails if any data frame arrives first.
pub async fn expect_close(ws: &mut WsClient) -> (u16, String) {
    loop {
        let frame = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for close")
            .expect("stream ended without a close frame")
            .expect("stream error");
        match frame {
            Message::Close(Some(frame)) => return (u16::from(frame.code), frame.reason.as_str().to_owned()),
            Message::Close(None) => panic!("close frame without a code"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected close, got {other:?}"),
        }
    }
}
