//! Decision pipeline
//!
//! The single task that owns the windows, the failover controllers and the
//! hysteresis engine. It waits on the sample channel and a liveness tick,
//! whichever fires first, and forwards every committed level change to the
//! actuator supervisor. Readers observe it through a `watch` snapshot.

use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use sf_error::Result;

use super::failover::SourceFailover;
use super::fusion::{Liveness, ZonePolicy};
use super::hysteresis::{FanLevel, FanLevelEngine, Transition};
use super::zones::{HeartRateZones, PowerZones, Zone};
use crate::actuator::ActuatorHandle;
use crate::constants::pipeline::{
    ANTPLUS_STARTUP_GRACE, COOLDOWN_LOG_INTERVAL, DROPOUT_TICK, SOURCE_SUMMARY_INTERVAL,
};
use crate::constants::telemetry::{HEART_RATE_MAX, HEART_RATE_MIN, HR_DISPLAY_INTERVAL};
use crate::settings::Settings;
use crate::shutdown::Shutdown;
use crate::telemetry::{Metric, SampleReceiver, SourceKind, TelemetryEvent, WindowedAverager};

/// Snapshot of the pipeline for display and status queries
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStatus {
    pub level: FanLevel,
    pub target: Option<Zone>,
    pub power_average: Option<f64>,
    pub power_zone: Option<Zone>,
    pub heart_rate_average: Option<f64>,
    pub heart_rate_zone: Option<Zone>,
    /// Active power producer, `None` while it is silent
    pub power_source: Option<SourceKind>,
    pub heart_rate_source: Option<SourceKind>,
    pub dropout: bool,
    pub pending_decrease: Option<Duration>,
    pub transitions: u64,
}

/// Failover, window and last decision for one metric
struct MetricTrack {
    failover: SourceFailover,
    window: WindowedAverager,
    average: Option<f64>,
    zone: Option<Zone>,
}

impl MetricTrack {
    fn new(failover: SourceFailover, settings: &Settings) -> Self {
        Self {
            failover,
            window: WindowedAverager::new(
                settings.buffer_span(),
                settings.buffer_capacity(),
                settings.minimum_samples as usize,
            ),
            average: None,
            zone: None,
        }
    }

    fn refresh(&mut self, classify: impl Fn(f64) -> Zone) {
        self.average = self.window.average();
        self.zone = self.average.map(classify);
    }

    fn reset(&mut self) {
        self.window.clear();
        self.average = None;
        self.zone = None;
    }
}

pub struct DecisionPipeline {
    power_zones: PowerZones,
    hr_zones: HeartRateZones,
    policy: ZonePolicy,
    hr_zones_enabled: bool,
    max_watt: f64,
    engine: FanLevelEngine,
    power: MetricTrack,
    heart_rate: MetricTrack,
    target: Option<Zone>,
    dropout: bool,
    transitions: u64,
    tick: Duration,
    last_cooldown_log: Option<Instant>,
    last_hr_display: Option<Instant>,
    last_summary: Instant,
    status_tx: watch::Sender<PipelineStatus>,
}

impl DecisionPipeline {
    /// Build the pipeline from settings; `started_at` anchors the ANT+ startup grace
    pub fn new(settings: &Settings, started_at: Instant) -> Result<Self> {
        let dropout_timeout = settings.dropout_timeout();

        let (primary, fallback) = settings.power_producers();
        let mut power = SourceFailover::new(Metric::Power, primary, fallback, dropout_timeout)?;
        if primary == SourceKind::AntPlus {
            power = power.with_startup_grace(started_at + ANTPLUS_STARTUP_GRACE);
        }

        let (hr_primary, hr_fallback) = settings.data_source.heart_rate_source.producers();
        let mut heart_rate =
            SourceFailover::new(Metric::HeartRate, hr_primary, hr_fallback, dropout_timeout)?;
        if hr_primary == SourceKind::AntPlus {
            heart_rate = heart_rate.with_startup_grace(started_at + ANTPLUS_STARTUP_GRACE);
        }

        let hr_settings = &settings.heart_rate_zones;
        let (status_tx, _) = watch::channel(PipelineStatus {
            dropout: true,
            ..PipelineStatus::default()
        });

        Ok(Self {
            power_zones: PowerZones::from_settings(settings),
            hr_zones: HeartRateZones::from_settings(hr_settings),
            policy: ZonePolicy::new(hr_settings.zone_mode, hr_settings.enabled),
            hr_zones_enabled: hr_settings.enabled,
            max_watt: f64::from(settings.max_watt),
            engine: FanLevelEngine::from_settings(settings),
            power: MetricTrack::new(power, settings),
            heart_rate: MetricTrack::new(heart_rate, settings),
            target: None,
            // Nothing has been heard yet
            dropout: true,
            transitions: 0,
            tick: DROPOUT_TICK.min(dropout_timeout),
            last_cooldown_log: None,
            last_hr_display: None,
            last_summary: started_at,
            status_tx,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> PipelineStatus {
        self.status_tx.borrow().clone()
    }

    pub fn committed_level(&self) -> FanLevel {
        self.engine.committed()
    }

    /// Liveness check period
    pub fn tick_interval(&self) -> Duration {
        self.tick
    }

    /// Ingest one sample
    pub fn handle_event(&mut self, event: TelemetryEvent) -> Option<Transition> {
        let TelemetryEvent { source, metric, sample } = event;
        if !self.is_valid(metric, sample.value) {
            debug!(source = %source, metric = %metric, value = sample.value, "Rejected invalid sample");
            return None;
        }

        let track = match metric {
            Metric::Power => &mut self.power,
            Metric::HeartRate => &mut self.heart_rate,
        };
        if !track.failover.accept(source, sample.at) {
            return None;
        }
        track.window.push(sample);

        if metric == Metric::HeartRate && !self.hr_zones_enabled {
            self.display_heart_rate(sample.value, sample.at);
        }

        let transition = self.decide(sample.at);
        self.publish(sample.at);
        transition
    }

    /// Liveness tick: failover re-selection, dropout, cooldown expiry
    pub fn handle_tick(&mut self, now: Instant) -> Option<Transition> {
        self.power.failover.reselect(now);
        self.heart_rate.failover.reselect(now);

        let transition = if self.policy.is_dropout(self.liveness(now)) {
            self.enter_dropout()
        } else {
            self.engine.on_tick(now)
        };
        let transition = self.record(transition);

        self.log_cooldown(now);
        if now.saturating_duration_since(self.last_summary) >= SOURCE_SUMMARY_INTERVAL {
            self.last_summary = now;
            self.log_summary(now);
        }
        self.publish(now);
        transition
    }

    /// Drive the pipeline until shutdown, forwarding level changes to the actuator
    pub async fn run(mut self, mut samples: SampleReceiver, actuator: ActuatorHandle, mut shutdown: Shutdown) {
        info!(
            mode = %self.policy.mode(),
            power_primary = %self.power.failover.primary(),
            tick_ms = self.tick.as_millis() as u64,
            "STARTUP: decision pipeline running"
        );
        actuator.set_level(self.engine.committed());

        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut producers_open = true;

        loop {
            let transition = tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                event = samples.recv(), if producers_open => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        warn!("All telemetry producers stopped");
                        producers_open = false;
                        None
                    }
                },
                _ = ticker.tick() => self.handle_tick(Instant::now()),
            };
            if let Some(transition) = transition {
                actuator.set_level(transition.to);
            }
        }

        info!(level = %self.engine.committed(), "Decision pipeline stopped");
    }

    fn is_valid(&self, metric: Metric, value: f64) -> bool {
        match metric {
            Metric::Power => value.is_finite() && value >= 0.0 && value <= self.max_watt,
            Metric::HeartRate => (HEART_RATE_MIN..=HEART_RATE_MAX).contains(&value),
        }
    }

    fn liveness(&self, now: Instant) -> Liveness {
        Liveness {
            power: self.power.failover.has_live_source(now),
            heart_rate: self.heart_rate.failover.has_live_source(now),
        }
    }

    fn decide(&mut self, now: Instant) -> Option<Transition> {
        let liveness = self.liveness(now);
        if self.policy.is_dropout(liveness) {
            let transition = self.enter_dropout();
            return self.record(transition);
        }
        if self.dropout {
            self.dropout = false;
            info!(
                power = liveness.power,
                heart_rate = liveness.heart_rate,
                "TELEMETRY: receiving samples"
            );
        }

        let power_zones = self.power_zones;
        self.power.refresh(|avg| power_zones.classify(avg));
        if self.hr_zones_enabled {
            let hr_zones = self.hr_zones;
            self.heart_rate.refresh(|avg| hr_zones.classify(avg));
        }

        let power_zone = self.power.zone.filter(|_| liveness.power);
        let hr_zone = self.heart_rate.zone.filter(|_| liveness.heart_rate);
        self.target = self.policy.target(power_zone, hr_zone);

        let transition = match self.target {
            Some(target) => self.engine.on_target(target, now),
            None => self.engine.on_tick(now),
        };
        self.record(transition)
    }

    fn enter_dropout(&mut self) -> Option<Transition> {
        if !self.dropout {
            self.dropout = true;
            self.power.reset();
            self.heart_rate.reset();
            self.target = None;
            warn!(
                level = %self.engine.committed(),
                "DROPOUT: no live telemetry source, forcing fan off"
            );
        }
        self.engine.on_dropout()
    }

    fn record(&mut self, transition: Option<Transition>) -> Option<Transition> {
        if let Some(t) = &transition {
            self.transitions += 1;
            self.last_cooldown_log = None;
            info!(
                from = %t.from,
                to = %t.to,
                cause = ?t.cause,
                "ACTION: fan level {} -> {}",
                t.from,
                t.to
            );
        }
        transition
    }

    fn log_cooldown(&mut self, now: Instant) {
        let (Some(pending), Some(remaining)) = (self.engine.pending(), self.engine.pending_remaining(now)) else {
            self.last_cooldown_log = None;
            return;
        };
        let due = self
            .last_cooldown_log
            .map_or(true, |at| now.saturating_duration_since(at) >= COOLDOWN_LOG_INTERVAL);
        if due {
            self.last_cooldown_log = Some(now);
            info!(
                target_level = %pending.target,
                remaining_secs = remaining.as_secs(),
                "COOLDOWN: holding level {}",
                self.engine.committed()
            );
        }
    }

    fn display_heart_rate(&mut self, bpm: f64, at: Instant) {
        let due = self
            .last_hr_display
            .map_or(true, |last| at.saturating_duration_since(last) >= HR_DISPLAY_INTERVAL);
        if due {
            self.last_hr_display = Some(at);
            info!(bpm = bpm.round() as u32, "Heart rate");
        }
    }

    fn log_summary(&self, now: Instant) {
        let power = &self.power.failover;
        let heart_rate = &self.heart_rate.failover;
        info!(
            power_active = %power.active(),
            power_alive = power.has_live_source(now),
            heart_rate_active = %heart_rate.active(),
            heart_rate_alive = heart_rate.has_live_source(now),
            level = %self.engine.committed(),
            dropout = self.dropout,
            "SOURCES: summary"
        );
    }

    fn publish(&self, now: Instant) {
        let liveness = self.liveness(now);
        let status = PipelineStatus {
            level: self.engine.committed(),
            target: self.target,
            power_average: self.power.average,
            power_zone: self.power.zone,
            heart_rate_average: self.heart_rate.average,
            heart_rate_zone: self.heart_rate.zone,
            power_source: liveness.power.then(|| self.power.failover.active()),
            heart_rate_source: liveness.heart_rate.then(|| self.heart_rate.failover.active()),
            dropout: self.dropout,
            pending_decrease: self.engine.pending_remaining(now),
            transitions: self.transitions,
        };
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}
