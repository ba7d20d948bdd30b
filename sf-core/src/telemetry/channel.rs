//! Bounded sample channel between producers and the decision pipeline

use sf_error::{Result, SmartFanError};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use super::{Metric, Sample, SourceKind, TelemetryEvent};

/// Create a bounded channel; `capacity` bounds the backlog per pipeline
pub fn sample_channel(capacity: usize) -> (SampleSender, SampleReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (SampleSender { tx, tap: None }, SampleReceiver { rx })
}

/// Producer side of the sample channel
#[derive(Clone)]
pub struct SampleSender {
    tx: mpsc::Sender<TelemetryEvent>,
    tap: Option<broadcast::Sender<TelemetryEvent>>,
}

impl SampleSender {
    /// Mirror every event into a broadcast tap (used by the bridge)
    pub fn with_tap(mut self, tap: broadcast::Sender<TelemetryEvent>) -> Self {
        self.tap = Some(tap);
        self
    }

    /// Bind this sender to one producer identity
    pub fn for_source(&self, source: SourceKind) -> SourceSender {
        SourceSender {
            source,
            inner: self.clone(),
        }
    }

    pub async fn send(&self, event: TelemetryEvent) -> Result<()> {
        if let Some(tap) = &self.tap {
            // No subscribers is fine
            let _ = tap.send(event);
        }
        self.tx
            .send(event)
            .await
            .map_err(|_| SmartFanError::ChannelClosed(format!("{} {}", event.source, event.metric)))
    }
}

/// A sender stamped with its producer identity
#[derive(Clone)]
pub struct SourceSender {
    source: SourceKind,
    inner: SampleSender,
}

impl SourceSender {
    pub fn source(&self) -> SourceKind {
        self.source
    }

    /// Send a power reading stamped with the current time
    pub async fn power(&self, watts: f64) -> Result<()> {
        self.send(Metric::Power, watts).await
    }

    /// Send a heart rate reading stamped with the current time
    pub async fn heart_rate(&self, bpm: f64) -> Result<()> {
        self.send(Metric::HeartRate, bpm).await
    }

    async fn send(&self, metric: Metric, value: f64) -> Result<()> {
        self.inner
            .send(TelemetryEvent {
                source: self.source,
                metric,
                sample: Sample::new(Instant::now(), value),
            })
            .await
    }
}

/// Pipeline side of the sample channel
pub struct SampleReceiver {
    rx: mpsc::Receiver<TelemetryEvent>,
}

impl SampleReceiver {
    /// Next event, or `None` once every producer has dropped its sender
    pub async fn recv(&mut self) -> Option<TelemetryEvent> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_source_sender_tags_events() {
        let (tx, mut rx) = sample_channel(4);
        let zwift = tx.for_source(SourceKind::Zwift);
        zwift.power(180.0).await.unwrap();
        zwift.heart_rate(130.0).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.source, SourceKind::Zwift);
        assert_eq!(first.metric, Metric::Power);
        assert_eq!(first.sample.value, 180.0);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.metric, Metric::HeartRate);
        assert!(second.sample.at >= first.sample.at);
    }

    #[tokio::test]
    async fn test_tap_mirrors_events() {
        let (tap, mut tap_rx) = broadcast::channel(4);
        let (tx, mut rx) = sample_channel(4);
        let ant = tx.with_tap(tap).for_source(SourceKind::AntPlus);
        ant.power(250.0).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().sample.value, 250.0);
        assert_eq!(tap_rx.recv().await.unwrap().source, SourceKind::AntPlus);
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped() {
        let (tx, rx) = sample_channel(1);
        drop(rx);
        let err = tx.for_source(SourceKind::Zwift).power(1.0).await.unwrap_err();
        assert!(matches!(err, SmartFanError::ChannelClosed(_)));
    }
}
