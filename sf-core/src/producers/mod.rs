//! Telemetry producers
//!
//! Each producer owns one external source and pushes stamped samples into the
//! shared [`SampleSender`](crate::telemetry::SampleSender). Producers never
//! decide anything; source selection happens in the pipeline.

pub mod antplus;
pub mod simulator;

pub use antplus::{AntNode, AntPlusConfig, AntPlusProducer, AntReading};
pub use simulator::{ProcFsProbe, ProcessProbe, SimulatorConfig, SimulatorProducer};

/// Why a producer stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerExit {
    Shutdown,
    /// The pipeline dropped its receiver
    ChannelClosed,
    /// The source failed too many times in a row
    RetriesExhausted,
}
