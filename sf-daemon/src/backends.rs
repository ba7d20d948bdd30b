//! Hardware backends compiled into this daemon
//!
//! No BLE central or ANT+ USB driver ships with this build. The unavailable
//! backends fail the way a missing radio would, so the supervisors keep
//! running their retry policies. `ReplayAntNode` stands in for the stick by
//! replaying recorded readings.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::time::sleep;
use tracing::{info, warn};

use sf_core::producers::{AntNode, AntReading};
use sf_core::{ActuatorTransport, PeerAddress};
use sf_error::{Result, SmartFanError};
use sf_protocol::{GattTarget, TelemetryFrame};

/// Spacing of replayed frames, matching a 4 Hz power meter
const REPLAY_PERIOD: Duration = Duration::from_millis(250);

/// Actuator transport for builds without a BLE stack
pub struct UnavailableTransport;

#[async_trait]
impl ActuatorTransport for UnavailableTransport {
    async fn scan(&mut self, _device_name: &str) -> Result<Option<PeerAddress>> {
        Err(SmartFanError::NotSupported(
            "no BLE backend in this build (set ble.skip_connection)".to_string(),
        ))
    }

    async fn connect(&mut self, _peer: &PeerAddress) -> Result<()> {
        Err(SmartFanError::NotConnected)
    }

    async fn pair(&mut self, _peer: &PeerAddress, _pin: u32) -> Result<()> {
        Err(SmartFanError::NotConnected)
    }

    async fn write(&mut self, _target: &GattTarget, _payload: &[u8]) -> Result<()> {
        Err(SmartFanError::NotConnected)
    }

    async fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        false
    }
}

/// ANT+ node for builds without a USB stick driver
pub struct UnavailableAntNode;

#[async_trait]
impl AntNode for UnavailableAntNode {
    async fn open(&mut self, _heart_rate_monitor: Option<u16>) -> Result<()> {
        Err(SmartFanError::DeviceNotFound(
            "ANT+ USB stick (no driver in this build, try --antplus-replay)".to_string(),
        ))
    }

    async fn next_reading(&mut self) -> Result<Option<AntReading>> {
        Ok(None)
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Replays a JSON-lines file of `{"power": .., "heart_rate": ..}` frames
///
/// The file ends the session; the producer's retry loop reopens it, so the
/// recording loops.
pub struct ReplayAntNode {
    path: PathBuf,
    period: Duration,
    lines: Option<Lines<BufReader<File>>>,
    pending: VecDeque<AntReading>,
    heart_rate: bool,
    line_no: usize,
}

impl ReplayAntNode {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            period: REPLAY_PERIOD,
            lines: None,
            pending: VecDeque::new(),
            heart_rate: false,
            line_no: 0,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }
}

#[async_trait]
impl AntNode for ReplayAntNode {
    async fn open(&mut self, heart_rate_monitor: Option<u16>) -> Result<()> {
        let file = File::open(&self.path)
            .await
            .map_err(|source| SmartFanError::FileRead {
                path: self.path.clone(),
                source,
            })?;
        self.lines = Some(BufReader::new(file).lines());
        self.heart_rate = heart_rate_monitor.is_some();
        self.line_no = 0;
        info!(path = %self.path.display(), "ANT+: replaying recorded readings");
        Ok(())
    }

    async fn next_reading(&mut self) -> Result<Option<AntReading>> {
        loop {
            if let Some(reading) = self.pending.pop_front() {
                return Ok(Some(reading));
            }
            let Some(lines) = self.lines.as_mut() else {
                return Err(SmartFanError::NotConnected);
            };
            let Some(line) = lines.next_line().await? else {
                return Ok(None);
            };
            self.line_no += 1;

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let frame: TelemetryFrame = match serde_json::from_str(line) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(line = self.line_no, error = %e, "ANT+: skipping malformed replay line");
                    continue;
                }
            };

            sleep(self.period).await;
            if let Some(watts) = frame.power {
                self.pending.push_back(AntReading::Power(f64::from(watts)));
            }
            if let Some(bpm) = frame.heart_rate.filter(|_| self.heart_rate) {
                self.pending.push_back(AntReading::HeartRate(f64::from(bpm)));
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.lines = None;
        self.pending.clear();
        Ok(())
    }
}
