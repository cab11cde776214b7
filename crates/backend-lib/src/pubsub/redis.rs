// ============================
// crates/backend-lib/src/pubsub/redis.rs
// ============================
//! Redis-backed pub/sub.
//!
//! Publishing and health checks share one lazily established
//! `ConnectionManager`, which reconnects on its own. Every subscription gets
//! a dedicated pub/sub connection that lives exactly as long as the handle.
use ::redis::aio::{ConnectionManager, PubSub};
use ::redis::{AsyncCommands, Client};
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::OnceCell;

use super::{Backbone, BackboneEvent, Subscription};
use crate::error::RelayError;

pub struct RedisBackbone {
    client: Client,
    commands: OnceCell<ConnectionManager>,
}

impl RedisBackbone {
    /// Build a backbone for `url`. No connection is made until first use, so
    /// an unreachable server surfaces per operation rather than at startup.
    pub fn new(url: &str) -> Result<Self, RelayError> {
        let client = Client::open(url)
            .map_err(|e| RelayError::UpstreamUnavailable(format!("invalid redis url: {e}")))?;
        Ok(Self {
            client,
            commands: OnceCell::new(),
        })
    }

    async fn commands(&self) -> Result<ConnectionManager, RelayError> {
        let manager = self
            .commands
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        Ok(manager.clone())
    }
}

#[async_trait]
impl Backbone for RedisBackbone {
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, RelayError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        tracing::debug!(channel, "redis subscription opened");

        Ok(Box::new(RedisSubscription {
            channel: channel.to_string(),
            pubsub,
        }))
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, RelayError> {
        let mut conn = self.commands().await?;
        let receivers: i64 = conn.publish(channel, payload).await?;
        Ok(usize::try_from(receivers).unwrap_or(0))
    }

    async fn ping(&self) -> Result<(), RelayError> {
        let mut conn = self.commands().await?;
        let _: String = ::redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

struct RedisSubscription {
    channel: String,
    pubsub: PubSub,
}

#[async_trait]
impl Subscription for RedisSubscription {
    fn channel(&self) -> &str {
        &self.channel
    }

    // Redis consumes subscribe confirmations inside `subscribe`, so only
    // payload events ever come out of here.
    async fn next_event(&mut self) -> Option<Result<BackboneEvent, RelayError>> {
        let Some(msg) = self.pubsub.on_message().next().await else {
            return Some(Err(RelayError::UpstreamUnavailable(
                "redis subscription connection closed".into(),
            )));
        };

        let event = msg
            .get_payload::<String>()
            .map(|payload| BackboneEvent::Message {
                channel: msg.get_channel_name().to_string(),
                payload,
            })
            .map_err(|e| RelayError::Malformed(e.to_string()));
        Some(event)
    }

    async fn unsubscribe(mut self: Box<Self>) -> Result<(), RelayError> {
        self.pubsub.unsubscribe(&self.channel).await?;
        tracing::debug!(channel = %self.channel, "redis subscription released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_malformed_url() {
        assert!(matches!(
            RedisBackbone::new("not a url"),
            Err(RelayError::UpstreamUnavailable(_))
        ));
        assert!(RedisBackbone::new("redis://127.0.0.1:6379/").is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_subscribe() {
        // port 1 is reserved and nothing listens there
        let backbone = RedisBackbone::new("redis://127.0.0.1:1/").unwrap();
        assert!(matches!(
            backbone.subscribe("metrics:cpu").await,
            Err(RelayError::UpstreamUnavailable(_))
        ));
    }
}
