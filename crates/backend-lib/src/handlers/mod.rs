// ============================
// crates/backend-lib/src/handlers/mod.rs
// ============================
//! HTTP handlers next to the metrics stream.

pub mod auth;
pub mod metrics;

pub use self::auth::login;
pub use self::metrics::{health, query_metrics};
