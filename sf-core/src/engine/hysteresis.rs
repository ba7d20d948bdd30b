//! Hysteresis & Dropout Engine
//!
//! Turns target zones into committed fan levels:
//! - increases commit immediately
//! - decreases commit only after the lower target has held for the cooldown
//! - dropout forces level 0 and discards any pending decrease
//!
//! The engine has no clock of its own. It reacts to new target zones and to
//! the pipeline's liveness tick, both carrying the time of the event.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use super::zones::Zone;
use crate::settings::Settings;

/// The committed fan level (0-3), as opposed to an instantaneous target zone
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FanLevel(Zone);

impl FanLevel {
    pub const OFF: FanLevel = FanLevel(Zone::Z0);

    pub fn zone(self) -> Zone {
        self.0
    }

    pub fn as_u8(self) -> u8 {
        self.0.as_u8()
    }
}

impl From<Zone> for FanLevel {
    fn from(zone: Zone) -> Self {
        Self(zone)
    }
}

impl TryFrom<u8> for FanLevel {
    type Error = sf_error::SmartFanError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Zone::from_u8(value)
            .map(FanLevel)
            .ok_or(sf_error::SmartFanError::InvalidLevel { value })
    }
}

impl fmt::Display for FanLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Why a level changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    Increase,
    CooldownElapsed,
    ZeroPowerImmediate,
    Dropout,
}

/// A committed level change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: FanLevel,
    pub to: FanLevel,
    pub cause: TransitionCause,
}

/// A decrease waiting out the cooldown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingDecrease {
    /// When the target first fell below the committed level
    pub since: Instant,
    /// Latest lower target; committed when the cooldown elapses
    pub target: Zone,
}

#[derive(Debug, Clone)]
pub struct FanLevelEngine {
    committed: FanLevel,
    pending: Option<PendingDecrease>,
    cooldown: Duration,
    zero_power_immediate: bool,
}

impl FanLevelEngine {
    /// Create an engine with level 0 committed
    pub fn new(cooldown: Duration, zero_power_immediate: bool) -> Self {
        Self {
            committed: FanLevel::OFF,
            pending: None,
            cooldown,
            zero_power_immediate,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.cooldown(), settings.zero_power_immediate)
    }

    pub fn committed(&self) -> FanLevel {
        self.committed
    }

    pub fn pending(&self) -> Option<PendingDecrease> {
        self.pending
    }

    /// Time left before the pending decrease commits
    pub fn pending_remaining(&self, now: Instant) -> Option<Duration> {
        self.pending
            .map(|p| self.cooldown.saturating_sub(now.saturating_duration_since(p.since)))
    }

    /// Apply a new target zone observed at `now`
    pub fn on_target(&mut self, target: Zone, now: Instant) -> Option<Transition> {
        let current = self.committed.zone();

        if target > current {
            self.pending = None;
            return self.commit(target, TransitionCause::Increase);
        }

        if target == current {
            self.pending = None;
            return None;
        }

        if target == Zone::Z0 && self.zero_power_immediate {
            self.pending = None;
            return self.commit(target, TransitionCause::ZeroPowerImmediate);
        }

        let pending = self.pending.get_or_insert(PendingDecrease { since: now, target });
        pending.target = target;
        self.expire_pending(now)
    }

    /// Liveness tick: commit a pending decrease whose cooldown has elapsed
    pub fn on_tick(&mut self, now: Instant) -> Option<Transition> {
        self.expire_pending(now)
    }

    /// Force level 0 and drop any pending decrease
    pub fn on_dropout(&mut self) -> Option<Transition> {
        self.pending = None;
        self.commit(Zone::Z0, TransitionCause::Dropout)
    }

    fn expire_pending(&mut self, now: Instant) -> Option<Transition> {
        let pending = self.pending?;
        if now.saturating_duration_since(pending.since) < self.cooldown {
            return None;
        }
        self.pending = None;
        self.commit(pending.target, TransitionCause::CooldownElapsed)
    }

    fn commit(&mut self, zone: Zone, cause: TransitionCause) -> Option<Transition> {
        let from = self.committed;
        let to = FanLevel::from(zone);
        if from == to {
            return None;
        }
        self.committed = to;
        Some(Transition { from, to, cause })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(120);

    fn secs(base: Instant, s: u64) -> Instant {
        base + Duration::from_secs(s)
    }

    fn engine_at(level: Zone, zero_power_immediate: bool, base: Instant) -> FanLevelEngine {
        let mut engine = FanLevelEngine::new(COOLDOWN, zero_power_immediate);
        engine.on_target(level, base);
        engine
    }

    #[test]
    fn test_starts_at_zero() {
        let engine = FanLevelEngine::new(COOLDOWN, false);
        assert_eq!(engine.committed(), FanLevel::OFF);
        assert!(engine.pending().is_none());
    }

    #[test]
    fn test_increase_is_immediate() {
        let base = Instant::now();
        let mut engine = engine_at(Zone::Z1, false, base);
        let transition = engine.on_target(Zone::Z3, base).unwrap();
        assert_eq!(transition.from.as_u8(), 1);
        assert_eq!(transition.to.as_u8(), 3);
        assert_eq!(transition.cause, TransitionCause::Increase);
    }

    #[test]
    fn test_short_dip_is_ignored() {
        let base = Instant::now();
        let mut engine = engine_at(Zone::Z3, false, base);
        for s in 1..COOLDOWN.as_secs() {
            assert_eq!(engine.on_target(Zone::Z1, secs(base, s)), None);
        }
        assert_eq!(engine.on_target(Zone::Z3, secs(base, COOLDOWN.as_secs())), None);
        assert_eq!(engine.committed().zone(), Zone::Z3);
        assert!(engine.pending().is_none());
    }

    #[test]
    fn test_sustained_decrease_commits_at_cooldown() {
        let base = Instant::now();
        let mut engine = engine_at(Zone::Z3, false, base);
        let mut committed_at = None;
        for s in 1..=COOLDOWN.as_secs() + 2 {
            if let Some(t) = engine.on_target(Zone::Z1, secs(base, s)) {
                assert_eq!(t.cause, TransitionCause::CooldownElapsed);
                committed_at = Some(s);
            }
        }
        // first lower target at s=1, so the cooldown elapses at s=121
        assert_eq!(committed_at, Some(COOLDOWN.as_secs() + 1));
        assert_eq!(engine.committed().zone(), Zone::Z1);
    }

    #[test]
    fn test_tick_commits_expired_pending() {
        let base = Instant::now();
        let mut engine = engine_at(Zone::Z2, false, base);
        engine.on_target(Zone::Z1, base);
        assert_eq!(engine.on_tick(secs(base, 119)), None);
        assert_eq!(engine.pending_remaining(secs(base, 119)), Some(Duration::from_secs(1)));
        let t = engine.on_tick(secs(base, 120)).unwrap();
        assert_eq!(t.to.zone(), Zone::Z1);
    }

    #[test]
    fn test_timer_not_restarted_between_lower_zones() {
        let base = Instant::now();
        let mut engine = engine_at(Zone::Z3, false, base);
        engine.on_target(Zone::Z2, base);
        engine.on_target(Zone::Z1, secs(base, 60));
        assert_eq!(engine.pending().unwrap().since, base);
        let t = engine.on_tick(secs(base, 120)).unwrap();
        assert_eq!(t.to.zone(), Zone::Z1);
    }

    #[test]
    fn test_zero_without_immediate_waits() {
        let base = Instant::now();
        let mut engine = engine_at(Zone::Z2, false, base);
        assert_eq!(engine.on_target(Zone::Z0, base), None);
        assert!(engine.pending().is_some());
    }

    #[test]
    fn test_zero_power_immediate() {
        let base = Instant::now();
        let mut engine = engine_at(Zone::Z2, true, base);
        let t = engine.on_target(Zone::Z0, base).unwrap();
        assert_eq!(t.cause, TransitionCause::ZeroPowerImmediate);
        assert_eq!(engine.committed(), FanLevel::OFF);
    }

    #[test]
    fn test_dropout_dominates_pending() {
        let base = Instant::now();
        let mut engine = engine_at(Zone::Z3, false, base);
        engine.on_target(Zone::Z1, secs(base, 10));
        let t = engine.on_dropout().unwrap();
        assert_eq!(t.cause, TransitionCause::Dropout);
        assert_eq!(engine.committed(), FanLevel::OFF);
        assert!(engine.pending().is_none());
        assert_eq!(engine.on_dropout(), None);
    }

    #[test]
    fn test_zero_cooldown_commits_immediately() {
        let base = Instant::now();
        let mut engine = FanLevelEngine::new(Duration::ZERO, false);
        engine.on_target(Zone::Z3, base);
        let t = engine.on_target(Zone::Z1, base).unwrap();
        assert_eq!(t.to.zone(), Zone::Z1);
    }

    #[test]
    fn test_fan_level_from_u8() {
        assert_eq!(FanLevel::try_from(2).unwrap().as_u8(), 2);
        assert!(FanLevel::try_from(4).is_err());
    }
}
