// ============================
// crates/backend-lib/src/relay.rs
// ============================
//! Channel relay: one backbone subscription forwarded to one client.
//!
//! The relay owns its subscription for the whole call and releases it on
//! every way out, including cancellation. If the future is dropped
//! mid-flight the subscription handle's own drop releases it instead.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, gauge};
use tokio_util::sync::CancellationToken;

use crate::error::RelayError;
use crate::pubsub::{Backbone, BackboneEvent, Subscription};
use crate::telemetry::{RELAY_FORWARDED, RELAY_SUBSCRIPTIONS};

/// Where relayed payloads go
#[async_trait]
pub trait FrameSink: Send {
    /// Whether the consumer can still accept frames
    fn is_open(&self) -> bool;

    /// Write one text frame. Fails with [`RelayError::ClientDisconnected`]
    /// when the consumer has gone away.
    async fn send_text(&mut self, payload: String) -> Result<(), RelayError>;
}

/// Why a relay ended without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The consumer closed or went away
    SinkClosed,
    /// The consumer did not take a frame within the send timeout
    Stalled,
    /// The cancellation token fired
    Cancelled,
    /// The subscription delivered its last event
    UpstreamEnded,
}

/// Forwards every payload on a channel to a sink, in arrival order
#[derive(Clone)]
pub struct ChannelRelay {
    backbone: Arc<dyn Backbone>,
    send_timeout: Duration,
}

impl ChannelRelay {
    pub fn new(backbone: Arc<dyn Backbone>, send_timeout: Duration) -> Self {
        Self {
            backbone,
            send_timeout,
        }
    }

    /// Subscribe to `channel` and forward until the sink closes, the
    /// upstream fails or ends, or `cancel` fires.
    pub async fn relay<S>(
        &self,
        channel: &str,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<RelayOutcome, RelayError>
    where
        S: FrameSink + ?Sized,
    {
        if cancel.is_cancelled() {
            return Ok(RelayOutcome::Cancelled);
        }

        let mut subscription = self.backbone.subscribe(channel).await?;
        gauge!(RELAY_SUBSCRIPTIONS).increment(1.0);
        tracing::debug!(channel, "subscribed");

        let result = self.forward(subscription.as_mut(), sink, cancel).await;

        if let Err(e) = subscription.unsubscribe().await {
            tracing::warn!(channel, error = %e, "unsubscribe failed, dropping subscription");
        }
        gauge!(RELAY_SUBSCRIPTIONS).decrement(1.0);
        tracing::debug!(channel, outcome = ?result, "unsubscribed");
        result
    }

    async fn forward<S>(
        &self,
        subscription: &mut dyn Subscription,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<RelayOutcome, RelayError>
    where
        S: FrameSink + ?Sized,
    {
        loop {
            if !sink.is_open() {
                return Ok(RelayOutcome::SinkClosed);
            }

            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(RelayOutcome::Cancelled),
                event = subscription.next_event() => event,
            };

            let payload = match event {
                None => return Ok(RelayOutcome::UpstreamEnded),
                Some(Err(e)) => return Err(e),
                Some(Ok(BackboneEvent::Subscribed { .. })) => continue,
                Some(Ok(BackboneEvent::Message { payload, .. })) => payload,
            };

            if !sink.is_open() {
                return Ok(RelayOutcome::SinkClosed);
            }

            match tokio::time::timeout(self.send_timeout, sink.send_text(payload)).await {
                Ok(Ok(())) => counter!(RELAY_FORWARDED).increment(1),
                Ok(Err(RelayError::ClientDisconnected)) => return Ok(RelayOutcome::SinkClosed),
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    tracing::warn!(
                        channel = subscription.channel(),
                        timeout_ms = self.send_timeout.as_millis() as u64,
                        "consumer stalled, ending relay"
                    );
                    return Ok(RelayOutcome::Stalled);
                },
            }
        }
    }
}
