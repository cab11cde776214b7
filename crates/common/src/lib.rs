// ================
// crates/common/src/lib.rs
// ================
//! Common types shared between the dashboard server and its clients.
//!
//! This module defines the JSON bodies of the HTTP API, the first-frame
//! handshake of the metrics stream and the pub/sub channel naming convention.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Prefix shared by every metrics channel on the pub/sub backbone.
pub const CHANNEL_PREFIX: &str = "metrics:";

/// Metric type used when a client does not ask for one.
pub const DEFAULT_METRIC_TYPE: &str = "cpu";

/// Longest metric type accepted from a client.
pub const MAX_METRIC_TYPE_LEN: usize = 64;

/// Token type reported by the login endpoint.
pub const BEARER: &str = "bearer";

/// Derive the pub/sub channel for a metric type.
///
/// Publishers and subscribers must both go through this function so that the
/// same metric type always maps to the same key.
pub fn channel_name(metric_type: &str) -> String {
    format!("{CHANNEL_PREFIX}{metric_type}")
}

/// Role of an identity
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    User,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => f.write_str("admin"),
            Role::User => f.write_str("user"),
        }
    }
}

/// Rejected metric type
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidMetricType {
    #[error("metric type is longer than 64 characters")]
    TooLong,
    #[error("metric type contains whitespace or control characters")]
    BadCharacter,
}

/// A validated metric type, e.g. `cpu`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricType(String);

impl MetricType {
    /// Parse a client-supplied metric type. Absent or empty input falls back to
    /// [`DEFAULT_METRIC_TYPE`].
    pub fn parse(raw: Option<&str>) -> Result<Self, InvalidMetricType> {
        let raw = raw.map(str::trim).unwrap_or_default();
        if raw.is_empty() {
            return Ok(Self(DEFAULT_METRIC_TYPE.to_string()));
        }
        if raw.chars().count() > MAX_METRIC_TYPE_LEN {
            return Err(InvalidMetricType::TooLong);
        }
        if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(InvalidMetricType::BadCharacter);
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Channel carrying samples of this type.
    pub fn channel(&self) -> String {
        channel_name(&self.0)
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single metric sample, as published on the backbone and streamed to clients.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MetricSample {
    /// RFC3339 timestamp in UTC
    pub timestamp: String,
    pub value: f64,
    #[serde(rename = "type")]
    pub metric_type: String,
}

impl MetricSample {
    pub fn new(at: DateTime<Utc>, value: f64, metric_type: impl Into<String>) -> Self {
        Self {
            timestamp: format_timestamp(at),
            value,
            metric_type: metric_type.into(),
        }
    }

    /// Compact JSON form used on the wire.
    pub fn to_payload(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Format a timestamp as RFC3339 with a `Z` suffix.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Response of the metrics query endpoint
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct MetricSeriesResponse {
    #[serde(default)]
    pub series: Vec<MetricSample>,
}

/// Body of `POST /auth/login`
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Successful login response
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

impl TokenResponse {
    pub fn bearer(access_token: String) -> Self {
        Self {
            access_token,
            token_type: BEARER.to_string(),
        }
    }
}

/// First frame a client may send on the metrics stream to authenticate.
///
/// Only used when the credential is neither in the URL nor in the
/// `Authorization` header. Unknown fields are ignored.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthHandshake {
    #[serde(default)]
    pub token: Option<String>,
}
