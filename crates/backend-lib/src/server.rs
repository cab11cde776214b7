// ============================
// crates/backend-lib/src/server.rs
// ============================
//! Application bootstrap and shutdown sequence.
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::{BackboneKind, Settings, StorageKind};
use crate::publisher::{self, PublisherHandle};
use crate::pubsub::{Backbone, MemoryBackbone, RedisBackbone};
use crate::storage::{seed_admin_user, FlatFileUserStore, MemoryUserStore, UserStore};
use crate::ws_router::create_router;
use crate::AppState;

/// A bound, fully wired server that has not started serving yet
pub struct Application {
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
    publisher: Option<PublisherHandle>,
}

impl Application {
    /// Wire the store and backbone named in `settings` and bind the listener.
    pub async fn build(settings: Settings) -> anyhow::Result<Self> {
        let store = build_store(&settings)?;
        let backbone = build_backbone(&settings)?;
        Self::build_with(settings, store, backbone).await
    }

    /// Like [`Application::build`] with caller-provided collaborators.
    pub async fn build_with(
        settings: Settings,
        store: Arc<dyn UserStore>,
        backbone: Arc<dyn Backbone>,
    ) -> anyhow::Result<Self> {
        settings.validate()?;
        seed_admin_user(store.as_ref(), &settings.seed, settings.password_cost()?)
            .await
            .context("failed to seed admin user")?;

        let listener = TcpListener::bind(settings.bind_addr)
            .await
            .with_context(|| format!("failed to bind {}", settings.bind_addr))?;

        let shutdown = CancellationToken::new();
        let state = AppState::new(settings, store, backbone.clone(), shutdown.clone())?;
        let publisher = publisher::start_if_enabled(
            state.settings.environment,
            backbone,
            &state.settings.publisher,
            &shutdown,
        );

        Ok(Self {
            listener,
            state,
            shutdown,
            publisher,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Token whose cancellation shuts the server down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve until `signal` resolves or the shutdown token is cancelled.
    ///
    /// Shutdown order: stop accepting, cancel every connection (each one
    /// unsubscribes and closes with 1001), stop the publisher, then wait up
    /// to `shutdown_grace_secs` for connection tasks to finish.
    pub async fn run_until<F>(self, signal: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Self {
            listener,
            state,
            shutdown,
            publisher,
        } = self;
        let connections = state.connections.clone();
        let grace = state.settings.shutdown_grace();

        tracing::info!(
            addr = %listener.local_addr()?,
            app = %state.settings.app_name,
            environment = ?state.settings.environment,
            "listening"
        );

        let trigger = shutdown.clone();
        let graceful = async move {
            tokio::select! {
                () = signal => tracing::info!("shutdown signal received"),
                () = trigger.cancelled() => {},
            }
            trigger.cancel();
        };

        let served = axum::serve(listener, create_router(state))
            .with_graceful_shutdown(graceful)
            .await;
        shutdown.cancel();

        if let Some(publisher) = publisher {
            publisher.stop().await;
        }

        connections.tracker.close();
        if tokio::time::timeout(grace, connections.tracker.wait()).await.is_err() {
            tracing::warn!(open = connections.open(), "connections still open after grace period");
        }

        served.context("server error")?;
        tracing::info!("server stopped");
        Ok(())
    }
}

fn build_store(settings: &Settings) -> anyhow::Result<Arc<dyn UserStore>> {
    let store: Arc<dyn UserStore> = match settings.storage.backend {
        StorageKind::File => Arc::new(
            FlatFileUserStore::new(&settings.storage.path).with_context(|| {
                format!("failed to open store at {}", settings.storage.path.display())
            })?,
        ),
        StorageKind::Memory => Arc::new(MemoryUserStore::new()),
    };
    Ok(store)
}

fn build_backbone(settings: &Settings) -> anyhow::Result<Arc<dyn Backbone>> {
    let backbone: Arc<dyn Backbone> = match settings.pubsub.backend {
        BackboneKind::Redis => Arc::new(RedisBackbone::new(&settings.pubsub.connection_url())?),
        BackboneKind::Memory => Arc::new(MemoryBackbone::new()),
    };
    Ok(backbone)
}
