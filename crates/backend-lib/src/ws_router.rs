// ============================
// crates/backend-lib/src/ws_router.rs
// ============================
//! HTTP router: the metrics stream plus its collaborators.
use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::{HeaderMap, HeaderValue, Method},
    response::Response,
    routing::{get, post},
    Router,
};
use dashboard_common::MetricType;
use metrics::counter;
use serde::Deserialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::PresentedCredentials;
use crate::error::AppError;
use crate::handlers;
use crate::telemetry::WS_CONNECTION;
use crate::websocket::{supervise, ConnectionRequest};
use crate::AppState;

/// Query string of the streaming endpoint
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    #[serde(rename = "type")]
    pub metric_type: Option<String>,
    pub token: Option<String>,
}

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.settings.cors_origins);

    Router::new()
        .route("/ws/metrics", get(ws_metrics_handler))
        .route("/auth/login", post(handlers::login))
        .route("/metrics", get(handlers::query_metrics))
        .route("/health", get(handlers::health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring invalid CORS origin");
                None
            },
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

/// `GET /ws/metrics?type=<metric_type>`
///
/// The metric type is checked before upgrading. Credentials are not: they
/// are negotiated on the open connection so that failures close with 1008.
pub async fn ws_metrics_handler(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let metric_type = MetricType::parse(query.metric_type.as_deref())
        .map_err(|e| AppError::InvalidInput(e.to_string()))?;
    counter!(WS_CONNECTION).increment(1);

    let request = ConnectionRequest {
        metric_type,
        presented: PresentedCredentials::from_request(query.token, &headers),
    };
    let tracker = state.connections.tracker.clone();

    Ok(ws.on_upgrade(move |socket| tracker.track_future(supervise(socket, state, request))))
}
