//! Telemetry samples and the channels that carry them
//!
//! Producers stamp each reading on receipt and push it through a
//! [`SampleSender`]; the decision pipeline is the only consumer.

mod channel;
mod window;

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

pub use channel::{sample_channel, SampleReceiver, SampleSender, SourceSender};
pub use window::WindowedAverager;

/// The two metrics a producer can deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Power,
    HeartRate,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Power => write!(f, "power"),
            Metric::HeartRate => write!(f, "heart rate"),
        }
    }
}

/// Identity of a telemetry producer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// ANT+ USB stick (power meter and HR strap)
    AntPlus,
    /// Cycling simulator broadcasting UDP datagrams
    Zwift,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::AntPlus => write!(f, "antplus"),
            SourceKind::Zwift => write!(f, "zwift"),
        }
    }
}

/// A single timestamped reading (watts or bpm)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub at: Instant,
    pub value: f64,
}

impl Sample {
    pub fn new(at: Instant, value: f64) -> Self {
        Self { at, value }
    }
}

/// A sample tagged with where it came from and what it measures
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryEvent {
    pub source: SourceKind,
    pub metric: Metric,
    pub sample: Sample,
}
