// ============================
// crates/backend-lib/src/publisher.rs
// ============================
//! Background task feeding synthetic samples into the `cpu` channel.
//!
//! Publishing is fire-and-forget: a failed publish is counted and logged,
//! never retried. The task runs until its handle is stopped or the parent
//! token is cancelled.
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashboard_common::{channel_name, MetricSample, DEFAULT_METRIC_TYPE};
use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::{Environment, PublisherSettings};
use crate::pubsub::Backbone;
use crate::telemetry::{PUBLISHER_DROPPED, PUBLISHER_PUBLISHED};

/// Owning handle of the running publisher
pub struct PublisherHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PublisherHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the task and wait for it to exit
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            if e.is_panic() {
                tracing::error!(error = %e, "sample publisher panicked");
            }
        }
    }
}

/// Start the publisher unless running in production.
pub fn start_if_enabled(
    environment: Environment,
    backbone: Arc<dyn Backbone>,
    settings: &PublisherSettings,
    parent: &CancellationToken,
) -> Option<PublisherHandle> {
    if environment.is_production() {
        tracing::info!("sample publisher disabled in production");
        return None;
    }
    Some(spawn_sample_publisher(backbone, settings, parent))
}

/// Spawn the publisher as a child of `parent`.
pub fn spawn_sample_publisher(
    backbone: Arc<dyn Backbone>,
    settings: &PublisherSettings,
    parent: &CancellationToken,
) -> PublisherHandle {
    let cancel = parent.child_token();
    let span = tracing::info_span!("sample_publisher", metric_type = DEFAULT_METRIC_TYPE);
    let task = tokio::spawn(
        run(backbone, settings.interval(), settings.value, cancel.clone()).instrument(span),
    );
    PublisherHandle { cancel, task }
}

async fn run(backbone: Arc<dyn Backbone>, interval: Duration, value: f64, cancel: CancellationToken) {
    let channel = channel_name(DEFAULT_METRIC_TYPE);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(%channel, interval_ms = interval.as_millis() as u64, "sample publisher started");

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {},
        }

        let payload = match MetricSample::new(Utc::now(), value, DEFAULT_METRIC_TYPE).to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize sample");
                continue;
            },
        };

        let published = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            published = backbone.publish(&channel, &payload) => published,
        };

        match published {
            Ok(receivers) => {
                counter!(PUBLISHER_PUBLISHED).increment(1);
                tracing::trace!(receivers, "sample published");
            },
            Err(e) => {
                counter!(PUBLISHER_DROPPED).increment(1);
                tracing::warn!(error = %e, "sample dropped");
            },
        }
    }

    tracing::info!("sample publisher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::{BackboneEvent, MemoryBackbone, Subscription};

    fn fast() -> PublisherSettings {
        PublisherSettings {
            interval_ms: 10,
            value: 42.0,
        }
    }

    async fn next_sample(sub: &mut Box<dyn Subscription>) -> MetricSample {
        loop {
            match sub.next_event().await.unwrap().unwrap() {
                BackboneEvent::Subscribed { .. } => continue,
                BackboneEvent::Message { payload, .. } => {
                    return serde_json::from_str(&payload).unwrap();
                },
            }
        }
    }

    #[tokio::test]
    async fn test_publishes_cpu_samples_until_stopped() {
        let backbone = Arc::new(MemoryBackbone::new());
        let mut sub = backbone.subscribe("metrics:cpu").await.unwrap();

        let handle = spawn_sample_publisher(backbone.clone(), &fast(), &CancellationToken::new());

        for _ in 0..2 {
            let sample = next_sample(&mut sub).await;
            assert_eq!(sample.metric_type, "cpu");
            assert_eq!(sample.value, 42.0);
            assert!(sample.timestamp.ends_with('Z'));
        }

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_parent_cancellation_stops_publisher() {
        let backbone = Arc::new(MemoryBackbone::new());
        let parent = CancellationToken::new();
        let handle = spawn_sample_publisher(backbone, &fast(), &parent);

        parent.cancel();
        tokio::time::timeout(Duration::from_secs(1), async {
            while !handle.is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_survives_backbone_outage() {
        let backbone = Arc::new(MemoryBackbone::new());
        backbone.set_available(false);
        let handle = spawn_sample_publisher(backbone.clone(), &fast(), &CancellationToken::new());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        backbone.set_available(true);
        let mut sub = backbone.subscribe("metrics:cpu").await.unwrap();
        assert_eq!(next_sample(&mut sub).await.metric_type, "cpu");

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_disabled_in_production() {
        let backbone: Arc<dyn Backbone> = Arc::new(MemoryBackbone::new());
        let parent = CancellationToken::new();

        assert!(start_if_enabled(Environment::Production, backbone.clone(), &fast(), &parent).is_none());

        let handle = start_if_enabled(Environment::Development, backbone, &fast(), &parent).unwrap();
        handle.stop().await;
    }
}
