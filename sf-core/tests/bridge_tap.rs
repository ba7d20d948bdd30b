//! The bridge sees ANT+ samples through the sample channel's broadcast tap

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;

use sf_core::settings::BridgeSettings;
use sf_core::{
    sample_channel, shutdown_channel, BridgeConfig, BridgeService, PeripheralServer, Result,
    SourceKind, SubscriberHandle, Subscription, TelemetryBridge,
};

type Received = Arc<Mutex<Vec<(BridgeService, Vec<u8>)>>>;

struct Listener {
    received: Received,
}

impl PeripheralServer for Listener {
    fn notify(&self, subscription: Subscription, payload: &[u8]) -> Result<()> {
        self.received
            .lock()
            .push((subscription.service, payload.to_vec()));
        Ok(())
    }
}

#[tokio::test]
async fn test_tap_feeds_bridge_while_pipeline_consumes() {
    let received = Received::default();
    let bridge = Arc::new(TelemetryBridge::new(
        Listener {
            received: Arc::clone(&received),
        },
        BridgeConfig::from_settings(&BridgeSettings::default()),
    ));
    bridge
        .subscribe(SubscriberHandle(1), BridgeService::CyclingPower)
        .unwrap();
    bridge
        .subscribe(SubscriberHandle(1), BridgeService::HeartRate)
        .unwrap();

    let (tap, tap_rx) = broadcast::channel(16);
    let (sender, mut receiver) = sample_channel(16);
    let sender = sender.with_tap(tap);
    let (trigger, shutdown) = shutdown_channel();
    let task = tokio::spawn({
        let bridge = Arc::clone(&bridge);
        async move { bridge.run(tap_rx, shutdown).await }
    });

    let ant = sender.for_source(SourceKind::AntPlus);
    ant.power(321.0).await.unwrap();
    ant.heart_rate(141.0).await.unwrap();
    sender.for_source(SourceKind::Zwift).power(99.0).await.unwrap();

    // The pipeline side still gets every event
    for _ in 0..3 {
        assert!(receiver.recv().await.is_some());
    }

    drop(ant);
    drop(sender);
    task.await.unwrap();
    drop(trigger);

    let received = received.lock();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].0, BridgeService::CyclingPower);
    assert_eq!(&received[0].1[2..4], &321i16.to_le_bytes());
    assert_eq!(received[1], (BridgeService::HeartRate, vec![0x00, 141]));
}
