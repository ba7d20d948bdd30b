//! Source Failover Controller
//!
//! Decides which producer feeds a metric's window. The primary is preferred
//! whenever it is alive; a configured fallback takes over the moment the
//! primary goes silent for longer than the dropout timeout.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use sf_error::{Result, SmartFanError};

use crate::telemetry::{Metric, SourceKind};

/// Per-producer liveness record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceState {
    pub source: SourceKind,
    pub last_sample_at: Option<Instant>,
    pub is_primary: bool,
}

impl SourceState {
    fn new(source: SourceKind, is_primary: bool) -> Self {
        Self {
            source,
            last_sample_at: None,
            is_primary,
        }
    }

    fn is_alive(&self, now: Instant, timeout: Duration) -> bool {
        self.last_sample_at
            .is_some_and(|at| now.saturating_duration_since(at) <= timeout)
    }
}

/// An active-source change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Switch {
    pub from: SourceKind,
    pub to: SourceKind,
}

#[derive(Debug, Clone)]
pub struct SourceFailover {
    metric: Metric,
    primary: SourceState,
    fallback: Option<SourceState>,
    active: SourceKind,
    dropout_timeout: Duration,
    grace_until: Option<Instant>,
}

impl SourceFailover {
    /// Create a controller; fails if primary and fallback are the same producer
    pub fn new(
        metric: Metric,
        primary: SourceKind,
        fallback: Option<SourceKind>,
        dropout_timeout: Duration,
    ) -> Result<Self> {
        if fallback == Some(primary) {
            return Err(SmartFanError::invalid_config(
                "data_source.fallback",
                format!("{} cannot be both primary and fallback", primary),
            ));
        }
        Ok(Self {
            metric,
            primary: SourceState::new(primary, true),
            fallback: fallback.map(|source| SourceState::new(source, false)),
            active: primary,
            dropout_timeout,
            grace_until: None,
        })
    }

    /// Keep the fallback passive until `until`, giving the primary time to start
    pub fn with_startup_grace(mut self, until: Instant) -> Self {
        if self.fallback.is_some() {
            self.grace_until = Some(until);
        }
        self
    }

    pub fn active(&self) -> SourceKind {
        self.active
    }

    pub fn primary(&self) -> SourceKind {
        self.primary.source
    }

    pub fn fallback(&self) -> Option<SourceKind> {
        self.fallback.map(|s| s.source)
    }

    pub fn state(&self, source: SourceKind) -> Option<&SourceState> {
        if self.primary.source == source {
            Some(&self.primary)
        } else {
            self.fallback.as_ref().filter(|s| s.source == source)
        }
    }

    pub fn is_alive(&self, source: SourceKind, now: Instant) -> bool {
        self.state(source)
            .is_some_and(|s| s.is_alive(now, self.dropout_timeout))
    }

    /// Whether the currently active producer is delivering
    pub fn has_live_source(&self, now: Instant) -> bool {
        self.is_alive(self.active, now)
    }

    pub fn in_startup_grace(&self, now: Instant) -> bool {
        self.grace_until.is_some_and(|until| now < until)
    }

    /// Record a sample and report whether it should reach the window
    ///
    /// Recording, re-selection and routing happen in one step, so a sample
    /// from a revived primary is routed by the very call that revives it.
    /// Samples from unregistered producers are ignored entirely.
    pub fn accept(&mut self, source: SourceKind, at: Instant) -> bool {
        let state = if self.primary.source == source {
            &mut self.primary
        } else {
            match self.fallback.as_mut().filter(|s| s.source == source) {
                Some(state) => state,
                None => return false,
            }
        };
        state.last_sample_at = Some(at);
        self.reselect(at);
        self.active == source
    }

    /// Re-evaluate the active producer against liveness at `now`
    pub fn reselect(&mut self, now: Instant) -> Option<Switch> {
        let next = match &self.fallback {
            Some(fallback)
                if !self.primary.is_alive(now, self.dropout_timeout)
                    && !self.in_startup_grace(now) =>
            {
                fallback.source
            }
            _ => self.primary.source,
        };
        if next == self.active {
            return None;
        }

        let switch = Switch {
            from: self.active,
            to: next,
        };
        self.active = next;
        if next == self.primary.source {
            info!(metric = %self.metric, source = %next, "FAILOVER: primary source is back");
        } else {
            warn!(
                metric = %self.metric,
                from = %switch.from,
                to = %switch.to,
                timeout_secs = self.dropout_timeout.as_secs(),
                "FAILOVER: primary source silent, switching to fallback"
            );
        }
        Some(switch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn secs(base: Instant, s: u64) -> Instant {
        base + Duration::from_secs(s)
    }

    fn ant_with_zwift_fallback() -> SourceFailover {
        SourceFailover::new(Metric::Power, SourceKind::AntPlus, Some(SourceKind::Zwift), TIMEOUT)
            .unwrap()
    }

    #[test]
    fn test_equal_primary_and_fallback_rejected() {
        let result =
            SourceFailover::new(Metric::Power, SourceKind::Zwift, Some(SourceKind::Zwift), TIMEOUT);
        assert!(result.is_err());
    }

    #[test]
    fn test_primary_alive_routes_primary_only() {
        let base = Instant::now();
        let mut failover = ant_with_zwift_fallback();
        assert!(failover.accept(SourceKind::AntPlus, base));
        assert!(!failover.accept(SourceKind::Zwift, secs(base, 1)));
        assert_eq!(failover.active(), SourceKind::AntPlus);
    }

    #[test]
    fn test_fallback_takes_over_on_next_sample() {
        let base = Instant::now();
        let mut failover = ant_with_zwift_fallback();
        failover.accept(SourceKind::AntPlus, base);
        assert!(!failover.accept(SourceKind::Zwift, secs(base, 5)));
        assert!(failover.accept(SourceKind::Zwift, secs(base, 6)));
        assert_eq!(failover.active(), SourceKind::Zwift);
    }

    #[test]
    fn test_primary_resumes_immediately() {
        let base = Instant::now();
        let mut failover = ant_with_zwift_fallback();
        failover.accept(SourceKind::AntPlus, base);
        failover.accept(SourceKind::Zwift, secs(base, 10));
        assert!(failover.accept(SourceKind::AntPlus, secs(base, 11)));
        assert_eq!(failover.active(), SourceKind::AntPlus);
        assert!(!failover.accept(SourceKind::Zwift, secs(base, 11)));
    }

    #[test]
    fn test_reselect_reports_switch() {
        let base = Instant::now();
        let mut failover = ant_with_zwift_fallback();
        failover.accept(SourceKind::AntPlus, base);
        assert_eq!(failover.reselect(secs(base, 3)), None);
        let switch = failover.reselect(secs(base, 6)).unwrap();
        assert_eq!(switch.to, SourceKind::Zwift);
        assert!(!failover.has_live_source(secs(base, 6)));
    }

    #[test]
    fn test_no_fallback_stays_on_primary() {
        let base = Instant::now();
        let mut failover =
            SourceFailover::new(Metric::Power, SourceKind::Zwift, None, TIMEOUT).unwrap();
        failover.accept(SourceKind::Zwift, base);
        assert_eq!(failover.reselect(secs(base, 60)), None);
        assert!(!failover.has_live_source(secs(base, 60)));
        assert!(!failover.accept(SourceKind::AntPlus, secs(base, 60)));
    }

    #[test]
    fn test_startup_grace_holds_fallback() {
        let base = Instant::now();
        let mut failover = ant_with_zwift_fallback().with_startup_grace(secs(base, 30));
        assert!(!failover.accept(SourceKind::Zwift, secs(base, 10)));
        assert!(failover.in_startup_grace(secs(base, 29)));
        assert!(failover.accept(SourceKind::Zwift, secs(base, 30)));
    }

    #[test]
    fn test_unregistered_source_not_recorded() {
        let base = Instant::now();
        let mut failover =
            SourceFailover::new(Metric::HeartRate, SourceKind::AntPlus, None, TIMEOUT).unwrap();
        assert!(!failover.accept(SourceKind::Zwift, base));
        assert!(failover.state(SourceKind::Zwift).is_none());
    }
}
