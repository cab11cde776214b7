// ============================
// crates/backend-lib/src/lib.rs
// ============================
//! Core backend-lib functionality for the dashboard metrics server.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod publisher;
pub mod pubsub;
pub mod relay;
pub mod server;
pub mod storage;
pub mod telemetry;
pub mod websocket;
pub mod ws_router;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::{AuthNegotiator, IdentityResolver, TokenIssuer};
use crate::config::{ConfigError, Settings};
use crate::pubsub::Backbone;
use crate::storage::UserStore;
use crate::websocket::Connections;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Settings, resolved once at startup
    pub settings: Arc<Settings>,
    /// Token minting and verification
    pub tokens: Arc<TokenIssuer>,
    /// Identity lookups
    pub identities: IdentityResolver,
    /// Credential negotiation for streaming and HTTP requests
    pub negotiator: AuthNegotiator,
    /// Pub/sub backbone
    pub backbone: Arc<dyn Backbone>,
    /// Open streaming connections
    pub connections: Connections,
}

impl AppState {
    /// Create a new application state
    pub fn new(
        settings: Settings,
        store: Arc<dyn UserStore>,
        backbone: Arc<dyn Backbone>,
        shutdown: CancellationToken,
    ) -> Result<Self, ConfigError> {
        let tokens = Arc::new(TokenIssuer::from_settings(&settings)?);
        let identities = IdentityResolver::new(store);
        let negotiator = AuthNegotiator::new(tokens.clone(), identities.clone());

        Ok(Self {
            settings: Arc::new(settings),
            tokens,
            identities,
            negotiator,
            backbone,
            connections: Connections::new(shutdown),
        })
    }
}
