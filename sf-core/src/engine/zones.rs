//! Zone Classifier
//!
//! Maps averaged power and heart rate to a discrete effort zone.
//! A value exactly on a boundary belongs to the lower zone.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::telemetry::ZERO_POWER_EPSILON;
use crate::settings::{HeartRateZoneSettings, Settings};

/// Discrete effort tier
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(into = "u8", try_from = "u8")]
pub enum Zone {
    #[default]
    Z0,
    Z1,
    Z2,
    Z3,
}

impl Zone {
    pub const ALL: [Zone; 4] = [Zone::Z0, Zone::Z1, Zone::Z2, Zone::Z3];

    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }
}

impl From<Zone> for u8 {
    fn from(zone: Zone) -> u8 {
        zone.as_u8()
    }
}

impl TryFrom<u8> for Zone {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Zone::from_u8(value).ok_or_else(|| format!("zone {} out of range (0-3)", value))
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Z{}", self.as_u8())
    }
}

/// Classify an averaged power value
///
/// Sub-watt and below-`min_watt` averages are Zone 0, anything above
/// `max_watt` is clamped to Zone 3.
pub fn classify_power(
    avg_watts: f64,
    ftp: u32,
    z1_pct: u32,
    z2_pct: u32,
    min_watt: u32,
    max_watt: u32,
) -> Zone {
    PowerZones::new(ftp, z1_pct, z2_pct, min_watt, max_watt).classify(avg_watts)
}

/// Classify an averaged heart rate value
pub fn classify_heart_rate(avg_bpm: f64, resting_hr: u32, max_hr: u32, z1_pct: u32, z2_pct: u32) -> Zone {
    HeartRateZones::new(resting_hr, max_hr, z1_pct, z2_pct).classify(avg_bpm)
}

/// Precomputed power zone boundaries (watts)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerZones {
    min_watt: f64,
    max_watt: f64,
    z1_max: f64,
    z2_max: f64,
}

impl PowerZones {
    pub fn new(ftp: u32, z1_pct: u32, z2_pct: u32, min_watt: u32, max_watt: u32) -> Self {
        let max_watt = f64::from(max_watt);
        let z2_max = (f64::from(ftp) * f64::from(z2_pct) / 100.0).min(max_watt);
        let z1_max = (f64::from(ftp) * f64::from(z1_pct) / 100.0).min(z2_max - 1.0);
        Self {
            min_watt: f64::from(min_watt),
            max_watt,
            z1_max,
            z2_max,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.ftp,
            settings.zone_thresholds.z1_max_percent,
            settings.zone_thresholds.z2_max_percent,
            settings.min_watt,
            settings.max_watt,
        )
    }

    pub fn classify(&self, avg_watts: f64) -> Zone {
        if !avg_watts.is_finite() || avg_watts < ZERO_POWER_EPSILON || avg_watts < self.min_watt {
            return Zone::Z0;
        }
        if avg_watts > self.max_watt {
            return Zone::Z3;
        }
        if avg_watts <= self.z1_max {
            Zone::Z1
        } else if avg_watts <= self.z2_max {
            Zone::Z2
        } else {
            Zone::Z3
        }
    }

    /// Upper bounds of Zone 1 and Zone 2
    pub fn boundaries(&self) -> (f64, f64) {
        (self.z1_max, self.z2_max)
    }
}

/// Precomputed heart rate zone boundaries (bpm)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeartRateZones {
    resting_hr: f64,
    z1_max: f64,
    z2_max: f64,
}

impl HeartRateZones {
    pub fn new(resting_hr: u32, max_hr: u32, z1_pct: u32, z2_pct: u32) -> Self {
        let max_hr = f64::from(max_hr);
        let z2_max = (max_hr * f64::from(z2_pct) / 100.0).min(max_hr);
        let z1_max = (max_hr * f64::from(z1_pct) / 100.0).min(z2_max - 1.0);
        Self {
            resting_hr: f64::from(resting_hr),
            z1_max,
            z2_max,
        }
    }

    pub fn from_settings(settings: &HeartRateZoneSettings) -> Self {
        Self::new(
            settings.resting_hr,
            settings.max_hr,
            settings.z1_max_percent,
            settings.z2_max_percent,
        )
    }

    pub fn classify(&self, avg_bpm: f64) -> Zone {
        if !avg_bpm.is_finite() || avg_bpm <= 0.0 || avg_bpm < self.resting_hr {
            return Zone::Z0;
        }
        if avg_bpm <= self.z1_max {
            Zone::Z1
        } else if avg_bpm <= self.z2_max {
            Zone::Z2
        } else {
            Zone::Z3
        }
    }

    pub fn boundaries(&self) -> (f64, f64) {
        (self.z1_max, self.z2_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_power() -> PowerZones {
        PowerZones::new(180, 60, 89, 0, 1000)
    }

    #[test]
    fn test_sub_watt_is_zone_zero() {
        let zones = default_power();
        for watts in [0.0, 0.2, 0.999, -5.0, f64::NAN] {
            assert_eq!(zones.classify(watts), Zone::Z0, "{} W", watts);
        }
    }

    #[test]
    fn test_boundary_belongs_to_lower_zone() {
        let zones = default_power();
        let (z1_max, z2_max) = zones.boundaries();
        assert_eq!(z1_max, 108.0);
        assert_eq!(zones.classify(108.0), Zone::Z1);
        assert_eq!(zones.classify(108.5), Zone::Z2);
        assert_eq!(zones.classify(z2_max), Zone::Z2);
        assert_eq!(zones.classify(161.0), Zone::Z3);
    }

    #[test]
    fn test_above_max_watt_clamps() {
        let zones = default_power();
        assert_eq!(zones.classify(5000.0), Zone::Z3);
        assert_eq!(zones.classify(f64::INFINITY), Zone::Z0);
    }

    #[test]
    fn test_below_min_watt() {
        let zones = PowerZones::new(180, 60, 89, 50, 1000);
        assert_eq!(zones.classify(49.0), Zone::Z0);
        assert_eq!(zones.classify(50.0), Zone::Z1);
    }

    #[test]
    fn test_monotonic_in_power() {
        let zones = default_power();
        let mut previous = Zone::Z0;
        for tenth in 0..12_000 {
            let zone = zones.classify(tenth as f64 / 10.0);
            assert!(zone >= previous);
            previous = zone;
        }
    }

    #[test]
    fn test_boundaries_clamped_to_max_watt() {
        let zones = PowerZones::new(500, 60, 89, 0, 200);
        let (z1_max, z2_max) = zones.boundaries();
        assert_eq!(z2_max, 200.0);
        assert!(z1_max < z2_max);
    }

    #[test]
    fn test_heart_rate_zones() {
        // max 185: z1 = 129.5, z2 = 148.0
        let zones = HeartRateZones::new(60, 185, 70, 80);
        assert_eq!(zones.classify(55.0), Zone::Z0);
        assert_eq!(zones.classify(60.0), Zone::Z1);
        assert_eq!(zones.classify(129.5), Zone::Z1);
        assert_eq!(zones.classify(130.0), Zone::Z2);
        assert_eq!(zones.classify(148.0), Zone::Z2);
        assert_eq!(zones.classify(149.0), Zone::Z3);
    }

    #[test]
    fn test_free_functions_match_tables() {
        assert_eq!(classify_power(150.0, 180, 60, 89, 0, 1000), Zone::Z2);
        assert_eq!(classify_heart_rate(0.0, 60, 185, 70, 80), Zone::Z0);
    }

    #[test]
    fn test_zone_serde_as_integer() {
        assert_eq!(serde_json::to_string(&Zone::Z2).unwrap(), "2");
        assert_eq!(serde_json::from_str::<Zone>("3").unwrap(), Zone::Z3);
        assert!(serde_json::from_str::<Zone>("4").is_err());
    }
}
