//! Smart Fan Core Library
//!
//! Drives a three-speed fan from a cyclist's live power and heart rate.
//!
//! # Features
//!
//! - **Telemetry Ingestion**: ANT+ and simulator producers feeding one bounded sample channel
//! - **Zone Decisions**: Windowed averages classified into zones, fused per the configured mode
//! - **Hysteresis**: Immediate increases, cooldown-delayed decreases, dropout to level 0
//! - **Source Failover**: Primary/fallback arbitration with an ANT+ startup grace
//! - **Actuator Supervision**: Reconnecting BLE link state machine with latest-wins commands
//! - **Protocol Bridge**: ANT+ readings re-published as standard GATT notifications
//! - **Configuration**: Sanitizing JSON settings loader
//!
//! # Module Structure
//!
//! - `telemetry/` - Samples, the sample channel and the windowed averager
//! - `engine/` - Zones, fusion, hysteresis, failover and the decision pipeline
//! - `actuator/` - Transport seam and connection supervisor
//! - `producers/` - ANT+ and simulator producers
//!
//! # Example
//!
//! ```no_run
//! use sf_core::{classify_power, Zone};
//!
//! // FTP 180, zone limits at 60% and 89%
//! let zone = classify_power(150.0, 180, 60, 89, 0, 1000);
//! assert_eq!(zone, Zone::Z2);
//! ```

// Grouped modules
pub mod actuator;
pub mod engine;
pub mod producers;
pub mod telemetry;

// Standalone modules
pub mod bridge;
pub mod constants;
pub mod settings;
pub mod shutdown;

// Re-export error types
pub use sf_error::{Result, SmartFanError};

// Re-export telemetry types
pub use telemetry::{
    sample_channel, Metric, Sample, SampleReceiver, SampleSender, SourceKind, SourceSender,
    TelemetryEvent, WindowedAverager,
};

// Re-export engine types
pub use engine::{
    classify_heart_rate, classify_power, fuse, DecisionPipeline, FanLevel, FanLevelEngine,
    HeartRateZones, Liveness, PipelineStatus, PowerZones, SourceFailover, Transition,
    TransitionCause, Zone, ZoneMode, ZonePolicy,
};

// Re-export actuator types
pub use actuator::{
    ActuatorHandle, ActuatorTransport, ConnectionState, ConnectionSupervisor, PeerAddress,
    SupervisorConfig, SupervisorStatus,
};

// Re-export bridge types
pub use bridge::{
    BridgeConfig, BridgeService, BridgeStats, PeripheralServer, SubscriberHandle, Subscription,
    TelemetryBridge,
};

// Re-export producers
pub use producers::{
    AntNode, AntPlusConfig, AntPlusProducer, AntReading, ProcFsProbe, ProcessProbe,
    ProducerExit, SimulatorConfig, SimulatorProducer,
};

// Re-export settings functions
pub use settings::{load_settings, parse_settings, save_settings, Settings};

pub use shutdown::{shutdown_channel, Shutdown, ShutdownTrigger};
