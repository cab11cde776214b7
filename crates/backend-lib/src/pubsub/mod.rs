// ============================
// crates/backend-lib/src/pubsub/mod.rs
// ============================
//! Publish/subscribe backbone abstraction.
//!
//! Channels are plain string keys (see [`dashboard_common::channel_name`]).
//! Payloads are opaque text; nothing here looks inside them.
pub mod memory;
pub mod redis;

use async_trait::async_trait;

use crate::error::RelayError;

pub use self::memory::MemoryBackbone;
pub use self::redis::RedisBackbone;

/// An event delivered on a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackboneEvent {
    /// Control event confirming the subscription; carries no data
    Subscribed { channel: String },
    /// A published payload
    Message { channel: String, payload: String },
}

/// A message bus addressed by channel name.
#[async_trait]
pub trait Backbone: Send + Sync + 'static {
    /// Open a dedicated subscription to exactly one channel
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, RelayError>;

    /// Publish a payload, returning how many subscribers received it.
    /// A channel without subscribers silently drops the message.
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, RelayError>;

    /// Check that the backbone is reachable
    async fn ping(&self) -> Result<(), RelayError>;
}

/// One live subscription.
///
/// Dropping the handle releases the subscription as well; `unsubscribe`
/// is the orderly path that also reports failures.
#[async_trait]
pub trait Subscription: Send {
    fn channel(&self) -> &str;

    /// Next event, or `None` once the subscription can deliver nothing more
    async fn next_event(&mut self) -> Option<Result<BackboneEvent, RelayError>>;

    async fn unsubscribe(self: Box<Self>) -> Result<(), RelayError>;
}
