// ==============
// crates/backend-lib/src/telemetry.rs

//! Central place for metric keys
pub const WS_CONNECTION: &str = "ws.connection";
pub const WS_ACTIVE: &str = "ws.active";
pub const WS_AUTH_FAILED: &str = "ws.auth_failed";
pub const RELAY_FORWARDED: &str = "relay.forwarded";
pub const RELAY_SUBSCRIPTIONS: &str = "relay.subscriptions";
pub const PUBLISHER_PUBLISHED: &str = "publisher.published";
pub const PUBLISHER_DROPPED: &str = "publisher.dropped";
