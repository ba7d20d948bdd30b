//! Protocol Bridge
//!
//! Re-publishes ANT+ power and heart rate as Cycling Power (0x1818) and
//! Heart Rate (0x180D) notifications for third-party listeners. The bridge
//! only reads telemetry; it never feeds back into the fan decision.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use sf_error::{Result, SmartFanError};
use sf_protocol::{
    encode_cycling_power_measurement, encode_heart_rate_measurement, CYCLING_POWER_MEASUREMENT,
    CYCLING_POWER_SERVICE, HEART_RATE_MEASUREMENT, HEART_RATE_SERVICE,
};

use crate::settings::BridgeSettings;
use crate::shutdown::Shutdown;
use crate::telemetry::{Metric, Sample, SourceKind, TelemetryEvent};

/// Notify services offered by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeService {
    CyclingPower,
    HeartRate,
}

impl BridgeService {
    pub fn service_uuid(self) -> u16 {
        match self {
            BridgeService::CyclingPower => CYCLING_POWER_SERVICE,
            BridgeService::HeartRate => HEART_RATE_SERVICE,
        }
    }

    pub fn characteristic_uuid(self) -> u16 {
        match self {
            BridgeService::CyclingPower => CYCLING_POWER_MEASUREMENT,
            BridgeService::HeartRate => HEART_RATE_MEASUREMENT,
        }
    }
}

impl fmt::Display for BridgeService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeService::CyclingPower => write!(f, "cycling power"),
            BridgeService::HeartRate => write!(f, "heart rate"),
        }
    }
}

/// Opaque identity of a connected listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Subscription {
    pub service: BridgeService,
    pub subscriber: SubscriberHandle,
}

/// GATT peripheral backend able to push a notification to one subscriber
pub trait PeripheralServer: Send + Sync {
    fn notify(&self, subscription: Subscription, payload: &[u8]) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub device_name: String,
    pub power_service: bool,
    pub heart_rate_service: bool,
}

impl BridgeConfig {
    pub fn from_settings(settings: &BridgeSettings) -> Self {
        Self {
            device_name: settings.ble_broadcast.device_name.clone(),
            power_service: settings.ble_broadcast.power_service,
            heart_rate_service: settings.ble_broadcast.heart_rate_service,
        }
    }

    pub fn is_enabled(&self, service: BridgeService) -> bool {
        match service {
            BridgeService::CyclingPower => self.power_service,
            BridgeService::HeartRate => self.heart_rate_service,
        }
    }
}

/// Per-service notification counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    pub power_notifications: u64,
    pub heart_rate_notifications: u64,
    pub accumulated_energy_kj: u16,
}

/// Integrates power over sample timestamps
#[derive(Debug, Default)]
struct EnergyCounter {
    joules: f64,
    last: Option<(Instant, f64)>,
}

impl EnergyCounter {
    fn add(&mut self, sample: Sample) {
        if let Some((at, watts)) = self.last {
            self.joules += watts * sample.at.saturating_duration_since(at).as_secs_f64();
        }
        self.last = Some((sample.at, sample.value));
    }

    /// Kilojoules, wrapping like the 16-bit GATT field
    fn kilojoules(&self) -> u16 {
        ((self.joules / 1000.0) as u64 % 65_536) as u16
    }
}

pub struct TelemetryBridge<S> {
    server: S,
    config: BridgeConfig,
    subscriptions: Mutex<BTreeSet<Subscription>>,
    energy: Mutex<EnergyCounter>,
    stats: Mutex<BridgeStats>,
}

impl<S: PeripheralServer> TelemetryBridge<S> {
    pub fn new(server: S, config: BridgeConfig) -> Self {
        Self {
            server,
            config,
            subscriptions: Mutex::new(BTreeSet::new()),
            energy: Mutex::new(EnergyCounter::default()),
            stats: Mutex::new(BridgeStats::default()),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn subscribe(&self, subscriber: SubscriberHandle, service: BridgeService) -> Result<()> {
        if !self.config.is_enabled(service) {
            return Err(SmartFanError::ServiceDisabled(service.to_string()));
        }
        if self.subscriptions.lock().insert(Subscription { service, subscriber }) {
            debug!(subscriber = subscriber.0, service = %service, "BRIDGE: subscribed");
        }
        Ok(())
    }

    pub fn unsubscribe(&self, subscriber: SubscriberHandle, service: BridgeService) -> bool {
        self.subscriptions
            .lock()
            .remove(&Subscription { service, subscriber })
    }

    /// Drop every subscription held by a disconnected listener
    pub fn peer_disconnected(&self, subscriber: SubscriberHandle) -> usize {
        let mut subscriptions = self.subscriptions.lock();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.subscriber != subscriber);
        let removed = before - subscriptions.len();
        if removed > 0 {
            debug!(subscriber = subscriber.0, removed, "BRIDGE: listener disconnected");
        }
        removed
    }

    pub fn subscriber_count(&self, service: BridgeService) -> usize {
        self.subscriptions
            .lock()
            .iter()
            .filter(|s| s.service == service)
            .count()
    }

    pub fn stats(&self) -> BridgeStats {
        *self.stats.lock()
    }

    /// Publish a power sample; returns how many listeners were notified
    pub fn publish_power(&self, sample: Sample) -> usize {
        if !self.config.power_service {
            return 0;
        }
        let kilojoules = {
            let mut energy = self.energy.lock();
            energy.add(sample);
            energy.kilojoules()
        };
        self.stats.lock().accumulated_energy_kj = kilojoules;
        let payload = encode_cycling_power_measurement(sample.value.round() as i32, kilojoules);
        self.notify_all(BridgeService::CyclingPower, &payload)
    }

    /// Publish a heart rate sample; returns how many listeners were notified
    pub fn publish_heart_rate(&self, sample: Sample) -> usize {
        if !self.config.heart_rate_service {
            return 0;
        }
        let payload = encode_heart_rate_measurement(sample.value.round() as i32);
        self.notify_all(BridgeService::HeartRate, &payload)
    }

    fn notify_all(&self, service: BridgeService, payload: &[u8]) -> usize {
        let targets: Vec<Subscription> = self
            .subscriptions
            .lock()
            .iter()
            .filter(|s| s.service == service)
            .copied()
            .collect();
        if targets.is_empty() {
            return 0;
        }

        let mut delivered = 0;
        for subscription in targets {
            match self.server.notify(subscription, payload) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        subscriber = subscription.subscriber.0,
                        service = %service,
                        error = %e,
                        "BRIDGE: notify failed, dropping subscriber"
                    );
                    self.subscriptions.lock().remove(&subscription);
                }
            }
        }

        let mut stats = self.stats.lock();
        match service {
            BridgeService::CyclingPower => stats.power_notifications += 1,
            BridgeService::HeartRate => stats.heart_rate_notifications += 1,
        }
        delivered
    }

    /// Forward ANT+ samples from the broadcast tap until shutdown
    pub async fn run(&self, mut events: broadcast::Receiver<TelemetryEvent>, mut shutdown: Shutdown) {
        info!(
            device = %self.config.device_name,
            power = self.config.power_service,
            heart_rate = self.config.heart_rate_service,
            "STARTUP: telemetry bridge running"
        );
        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(event) if event.source == SourceKind::AntPlus => match event.metric {
                    Metric::Power => {
                        self.publish_power(event.sample);
                    }
                    Metric::HeartRate => {
                        self.publish_heart_rate(event.sample);
                    }
                },
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "BRIDGE: fell behind, skipped samples");
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!("Telemetry bridge stopped");
    }
}
