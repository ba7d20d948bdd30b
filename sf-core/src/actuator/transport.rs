//! Transport seam between the supervisor and a concrete radio stack

use async_trait::async_trait;
use std::fmt;

use sf_error::Result;
use sf_protocol::GattTarget;

/// Address of a discovered peer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddress(pub String);

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Primitive operations of the actuator link
///
/// Implementations do not retry or time out on their own; the supervisor
/// bounds every call and owns all reconnect policy.
#[async_trait]
pub trait ActuatorTransport: Send {
    /// Look for a peer advertising `device_name`; `Ok(None)` if none was seen
    async fn scan(&mut self, device_name: &str) -> Result<Option<PeerAddress>>;

    async fn connect(&mut self, peer: &PeerAddress) -> Result<()>;

    /// Pair using a numeric PIN
    async fn pair(&mut self, peer: &PeerAddress, pin: u32) -> Result<()>;

    /// Write a payload to a characteristic, with response
    async fn write(&mut self, target: &GattTarget, payload: &[u8]) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;

    /// Whether the link is still up as far as the stack knows
    fn is_connected(&self) -> bool;
}
