//! Zone Fusion
//!
//! Combines the power and heart rate zones into one target zone and decides,
//! per mode, which metric's liveness keeps the pipeline out of dropout.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::zones::Zone;

/// How power and heart rate zones combine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneMode {
    #[default]
    PowerOnly,
    HrOnly,
    HigherWins,
}

impl fmt::Display for ZoneMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZoneMode::PowerOnly => write!(f, "power_only"),
            ZoneMode::HrOnly => write!(f, "hr_only"),
            ZoneMode::HigherWins => write!(f, "higher_wins"),
        }
    }
}

/// Pure combination of two zones
pub fn fuse(power_zone: Zone, hr_zone: Zone, mode: ZoneMode) -> Zone {
    match mode {
        ZoneMode::PowerOnly => power_zone,
        ZoneMode::HrOnly => hr_zone,
        ZoneMode::HigherWins => power_zone.max(hr_zone),
    }
}

/// Which metrics currently have a live source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Liveness {
    pub power: bool,
    pub heart_rate: bool,
}

/// Fusion mode with the heart-rate-disabled override applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZonePolicy {
    mode: ZoneMode,
}

impl ZonePolicy {
    pub fn new(mode: ZoneMode, heart_rate_enabled: bool) -> Self {
        let mode = if heart_rate_enabled {
            mode
        } else {
            ZoneMode::PowerOnly
        };
        Self { mode }
    }

    pub fn mode(&self) -> ZoneMode {
        self.mode
    }

    /// Whether the heart rate zone takes part in decisions at all
    pub fn uses_heart_rate(&self) -> bool {
        self.mode != ZoneMode::PowerOnly
    }

    /// Dropout means no metric the mode relies on is alive
    pub fn is_dropout(&self, liveness: Liveness) -> bool {
        match self.mode {
            ZoneMode::PowerOnly => !liveness.power,
            ZoneMode::HrOnly | ZoneMode::HigherWins => !liveness.power && !liveness.heart_rate,
        }
    }

    /// Target zone from whatever zones are decidable, `None` if undecidable
    ///
    /// Zones of dead metrics must already be filtered out by the caller.
    pub fn target(&self, power_zone: Option<Zone>, hr_zone: Option<Zone>) -> Option<Zone> {
        match self.mode {
            ZoneMode::PowerOnly => power_zone,
            ZoneMode::HrOnly => hr_zone,
            ZoneMode::HigherWins => match (power_zone, hr_zone) {
                (Some(p), Some(h)) => Some(fuse(p, h, self.mode)),
                (Some(z), None) | (None, Some(z)) => Some(z),
                (None, None) => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fuse_modes() {
        assert_eq!(fuse(Zone::Z1, Zone::Z3, ZoneMode::PowerOnly), Zone::Z1);
        assert_eq!(fuse(Zone::Z1, Zone::Z3, ZoneMode::HrOnly), Zone::Z3);
        assert_eq!(fuse(Zone::Z2, Zone::Z1, ZoneMode::HigherWins), Zone::Z2);
    }

    #[test]
    fn test_disabled_heart_rate_forces_power_only() {
        let policy = ZonePolicy::new(ZoneMode::HrOnly, false);
        assert_eq!(policy.mode(), ZoneMode::PowerOnly);
        assert_eq!(policy.target(Some(Zone::Z2), Some(Zone::Z3)), Some(Zone::Z2));
    }

    #[test]
    fn test_dropout_per_mode() {
        let hr_only_alive = Liveness { power: false, heart_rate: true };
        assert!(ZonePolicy::new(ZoneMode::PowerOnly, true).is_dropout(hr_only_alive));
        assert!(!ZonePolicy::new(ZoneMode::HrOnly, true).is_dropout(hr_only_alive));
        assert!(!ZonePolicy::new(ZoneMode::HigherWins, true).is_dropout(hr_only_alive));
        assert!(ZonePolicy::new(ZoneMode::HigherWins, true).is_dropout(Liveness::default()));
    }

    #[test]
    fn test_higher_wins_with_one_side_missing() {
        let policy = ZonePolicy::new(ZoneMode::HigherWins, true);
        assert_eq!(policy.target(None, Some(Zone::Z2)), Some(Zone::Z2));
        assert_eq!(policy.target(Some(Zone::Z1), None), Some(Zone::Z1));
        assert_eq!(policy.target(None, None), None);
    }

    #[test]
    fn test_mode_serde_names() {
        let mode: ZoneMode = serde_json::from_str("\"higher_wins\"").unwrap();
        assert_eq!(mode, ZoneMode::HigherWins);
        assert_eq!(mode.to_string(), "higher_wins");
    }
}
