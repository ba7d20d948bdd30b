//! Actuator link: transport seam and connection supervisor

mod supervisor;
mod transport;

pub use supervisor::{
    ActuatorHandle, ConnectionState, ConnectionSupervisor, SupervisorConfig, SupervisorStatus,
};
pub use transport::{ActuatorTransport, PeerAddress};
