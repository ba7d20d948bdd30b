//! Fan-level decision engine
//!
//! Classification, fusion, hysteresis and source failover, plus the
//! single-writer pipeline task that drives them from the sample channel.

mod failover;
mod fusion;
mod hysteresis;
mod pipeline;
mod zones;

pub use failover::{SourceFailover, SourceState, Switch};
pub use fusion::{fuse, Liveness, ZoneMode, ZonePolicy};
pub use hysteresis::{FanLevel, FanLevelEngine, PendingDecrease, Transition, TransitionCause};
pub use pipeline::{DecisionPipeline, PipelineStatus};
pub use zones::{classify_heart_rate, classify_power, HeartRateZones, PowerZones, Zone};
