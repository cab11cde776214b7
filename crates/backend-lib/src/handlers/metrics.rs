// ============================
// crates/backend-lib/src/handlers/metrics.rs
// ============================
//! Mocked metrics query and health check.
use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use dashboard_common::{MetricSample, MetricSeriesResponse, MetricType};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::AppState;

/// Default window when `from` is missing or after `to`
const DEFAULT_WINDOW_MINUTES: i64 = 5;
/// Upper bound on points in one response
pub const MAX_SERIES_POINTS: usize = 3600;

/// Query string of `GET /metrics`
#[derive(Debug, Default, Deserialize)]
pub struct SeriesQuery {
    #[serde(rename = "type")]
    pub metric_type: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// `GET /metrics?type&from&to`
pub async fn query_metrics(
    AuthenticatedUser(identity): AuthenticatedUser,
    Query(query): Query<SeriesQuery>,
) -> Result<Json<MetricSeriesResponse>, AppError> {
    let metric_type = MetricType::parse(query.metric_type.as_deref())
        .map_err(|e| AppError::InvalidInput(e.to_string()))?;
    let (from, to) = resolve_window(query.from, query.to, Utc::now());

    let series = mock_series(&metric_type, from, to);
    tracing::debug!(subject = %identity.subject, %metric_type, points = series.len(), "metrics queried");
    Ok(Json(MetricSeriesResponse { series }))
}

/// Fill in the query window. A missing `to` is `now`; a missing `from`, or
/// one after `to`, is five minutes before `to`.
pub fn resolve_window(
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let to = to.unwrap_or(now);
    let window = Duration::minutes(DEFAULT_WINDOW_MINUTES);
    let from = match from {
        Some(from) if from <= to => from,
        _ => to - window,
    };
    (from, to)
}

/// One synthetic point per second from `from` through `to`, both included.
pub fn mock_series(
    metric_type: &MetricType,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Vec<MetricSample> {
    let seconds = (to - from).num_seconds().max(0) as usize;
    let points = (seconds + 1).min(MAX_SERIES_POINTS);

    (0..points)
        .map(|idx| {
            let at = from + Duration::seconds(idx as i64);
            MetricSample::new(at, 50.0 + (idx % 10) as f64, metric_type.as_str())
        })
        .collect()
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    state.backbone.ping().await?;
    Ok(Json(json!({ "status": "ok" })))
}
