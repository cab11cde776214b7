// ============================
// crates/backend-lib/src/pubsub/memory.rs
// ============================
//! In-process backbone built on `tokio::sync::broadcast`.
//!
//! Used by the test suite and by single-process deployments that set
//! `pubsub.backend = "memory"`.
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast::{self, error::RecvError};

use super::{Backbone, BackboneEvent, Subscription};
use crate::error::RelayError;

/// Messages buffered per channel before slow subscribers start lagging
const DEFAULT_CAPACITY: usize = 256;

/// In-memory pub/sub with per-channel fan-out
pub struct MemoryBackbone {
    channels: Arc<DashMap<String, broadcast::Sender<String>>>,
    active: Arc<DashMap<String, usize>>,
    opened: AtomicUsize,
    available: AtomicBool,
    capacity: usize,
}

impl Default for MemoryBackbone {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl MemoryBackbone {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            active: Arc::new(DashMap::new()),
            opened: AtomicUsize::new(0),
            available: AtomicBool::new(true),
            capacity: capacity.max(1),
        }
    }

    /// Simulate the backbone going away (or coming back)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Subscriptions opened since creation
    pub fn subscriptions_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Subscriptions currently held on `channel`
    pub fn active_subscriptions(&self, channel: &str) -> usize {
        self.active.get(channel).map(|count| *count).unwrap_or(0)
    }

    /// Subscriptions currently held on any channel
    pub fn total_active_subscriptions(&self) -> usize {
        self.active.iter().map(|entry| *entry.value()).sum()
    }

    /// Channels with at least one live subscriber
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn ensure_available(&self) -> Result<(), RelayError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RelayError::UpstreamUnavailable("memory backbone is offline".into()))
        }
    }
}

#[async_trait]
impl Backbone for MemoryBackbone {
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, RelayError> {
        self.ensure_available()?;

        let receiver = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        self.opened.fetch_add(1, Ordering::SeqCst);
        *self.active.entry(channel.to_string()).or_insert(0) += 1;

        Ok(Box::new(MemorySubscription {
            channel: channel.to_string(),
            receiver,
            acknowledged: false,
            _guard: ActiveGuard {
                channel: channel.to_string(),
                channels: Arc::clone(&self.channels),
                active: Arc::clone(&self.active),
            },
        }))
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, RelayError> {
        self.ensure_available()?;

        let Some(sender) = self.channels.get(channel) else {
            return Ok(0);
        };
        // no receivers is not an error for a best-effort bus
        Ok(sender.send(payload.to_string()).unwrap_or(0))
    }

    async fn ping(&self) -> Result<(), RelayError> {
        self.ensure_available()
    }
}

/// Decrements the active count for its channel when dropped, and forgets
/// the channel once nobody listens to it
struct ActiveGuard {
    channel: String,
    channels: Arc<DashMap<String, broadcast::Sender<String>>>,
    active: Arc<DashMap<String, usize>>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if let Some(mut count) = self.active.get_mut(&self.channel) {
            *count = count.saturating_sub(1);
        }
        self.active.remove_if(&self.channel, |_, count| *count == 0);
        self.channels
            .remove_if(&self.channel, |_, sender| sender.receiver_count() == 0);
    }
}

// fields drop in order: the receiver must be gone before the guard runs
struct MemorySubscription {
    channel: String,
    receiver: broadcast::Receiver<String>,
    acknowledged: bool,
    _guard: ActiveGuard,
}

#[async_trait]
impl Subscription for MemorySubscription {
    fn channel(&self) -> &str {
        &self.channel
    }

    async fn next_event(&mut self) -> Option<Result<BackboneEvent, RelayError>> {
        if !self.acknowledged {
            self.acknowledged = true;
            return Some(Ok(BackboneEvent::Subscribed {
                channel: self.channel.clone(),
            }));
        }

        loop {
            match self.receiver.recv().await {
                Ok(payload) => {
                    return Some(Ok(BackboneEvent::Message {
                        channel: self.channel.clone(),
                        payload,
                    }))
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(channel = %self.channel, skipped, "subscriber lagged, messages dropped");
                },
                Err(RecvError::Closed) => return None,
            }
        }
    }

    async fn unsubscribe(self: Box<Self>) -> Result<(), RelayError> {
        // dropping the receiver and guard is the whole release
        Ok(())
    }
}
