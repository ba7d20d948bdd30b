//! Actuator Connection Supervisor
//!
//! Reconnect state machine around an [`ActuatorTransport`]:
//!
//! ```text
//! Disconnected -> Scanning -> Connecting -> Connected
//!      ^             |            |            |
//!      |          failure      failure     write failure / peer gone
//!      |             v            v            |
//!      |      Retrying (reconnect_interval) <--+-- Disconnected
//!      |             or
//!      +---- Exhausted (fixed cooldown, counter reset)
//! ```
//!
//! Level requests are coalesced latest-wins through a `watch` channel, so a
//! busy or disconnected supervisor only ever sends the newest level.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use sf_error::{Result, SmartFanError};
use sf_protocol::{encode_level_command, GattTarget};

use super::transport::{ActuatorTransport, PeerAddress};
use crate::constants::actuator::{EXHAUSTED_COOLDOWN, LINK_CHECK_INTERVAL};
use crate::engine::FanLevel;
use crate::settings::BleSettings;
use crate::shutdown::Shutdown;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Scanning,
    Connecting,
    Connected,
    Retrying,
    Exhausted,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Scanning => "scanning",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Retrying => "retrying",
            ConnectionState::Exhausted => "exhausted",
        };
        f.write_str(name)
    }
}

/// Snapshot of the supervisor for display and status queries
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SupervisorStatus {
    pub state: ConnectionState,
    pub retry_count: u32,
    pub peer: Option<String>,
    pub last_sent: Option<FanLevel>,
    pub commands_sent: u64,
    pub last_error: Option<String>,
    pub skip: bool,
}

/// Supervisor timing and addressing
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub device_name: String,
    pub target: GattTarget,
    pub pin_code: Option<u32>,
    pub scan_timeout: Duration,
    pub connection_timeout: Duration,
    pub reconnect_interval: Duration,
    pub command_timeout: Duration,
    pub max_retries: u32,
    pub exhausted_cooldown: Duration,
    pub link_check_interval: Duration,
    /// Hardware-free mode: levels are only recorded and logged
    pub skip: bool,
}

impl SupervisorConfig {
    pub fn from_settings(ble: &BleSettings) -> Self {
        let secs = |s: u32| Duration::from_secs(u64::from(s));
        Self {
            device_name: ble.device_name.clone(),
            target: ble.gatt_target(),
            pin_code: ble.pin_code,
            scan_timeout: secs(ble.scan_timeout),
            connection_timeout: secs(ble.connection_timeout),
            reconnect_interval: secs(ble.reconnect_interval),
            command_timeout: secs(ble.command_timeout),
            max_retries: ble.max_retries.max(1),
            exhausted_cooldown: EXHAUSTED_COOLDOWN,
            link_check_interval: LINK_CHECK_INTERVAL,
            skip: ble.skip_connection,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::from_settings(&BleSettings::default())
    }
}

struct Shared {
    desired: watch::Sender<Option<FanLevel>>,
    status: watch::Sender<SupervisorStatus>,
    skip: bool,
}

/// Cloneable front of the supervisor exposing `set_level`
#[derive(Clone)]
pub struct ActuatorHandle {
    shared: Arc<Shared>,
}

impl ActuatorHandle {
    /// Request a fan level; never blocks
    ///
    /// In skip mode the level counts as delivered at once and is logged only
    /// when it differs from the previous one.
    pub fn set_level(&self, level: FanLevel) {
        self.shared.desired.send_replace(Some(level));
        if !self.shared.skip {
            return;
        }
        self.shared.status.send_if_modified(|status| {
            if status.last_sent == Some(level) {
                return false;
            }
            info!(level = %level, "TEST MODE: LEVEL:{} (no actuator connected)", level);
            status.last_sent = Some(level);
            status.commands_sent += 1;
            true
        });
    }

    /// Latest requested level
    pub fn desired(&self) -> Option<FanLevel> {
        *self.shared.desired.borrow()
    }

    pub fn status(&self) -> SupervisorStatus {
        self.shared.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SupervisorStatus> {
        self.shared.status.subscribe()
    }
}

pub struct ConnectionSupervisor<T> {
    transport: T,
    config: SupervisorConfig,
    shared: Arc<Shared>,
    desired_rx: watch::Receiver<Option<FanLevel>>,
    state: ConnectionState,
    retry_count: u32,
    peer: Option<PeerAddress>,
    last_sent: Option<FanLevel>,
}

impl<T: ActuatorTransport> ConnectionSupervisor<T> {
    pub fn new(transport: T, config: SupervisorConfig) -> (Self, ActuatorHandle) {
        let (desired, desired_rx) = watch::channel(None);
        let (status, _) = watch::channel(SupervisorStatus {
            skip: config.skip,
            ..SupervisorStatus::default()
        });
        let shared = Arc::new(Shared {
            desired,
            status,
            skip: config.skip,
        });
        let handle = ActuatorHandle {
            shared: Arc::clone(&shared),
        };
        let supervisor = Self {
            transport,
            config,
            shared,
            desired_rx,
            state: ConnectionState::Disconnected,
            retry_count: 0,
            peer: None,
            last_sent: None,
        };
        (supervisor, handle)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Run until shutdown, then disconnect and hand the transport back
    pub async fn run(mut self, mut shutdown: Shutdown) -> T {
        if self.config.skip {
            info!("TEST MODE: skip_connection set, actuator commands are only logged");
            shutdown.wait().await;
            return self.transport;
        }

        info!(
            device = %self.config.device_name,
            max_retries = self.config.max_retries,
            "STARTUP: actuator supervisor running"
        );

        loop {
            if shutdown.is_triggered() {
                break;
            }
            let keep_running = match self.state {
                ConnectionState::Disconnected => {
                    self.set_state(ConnectionState::Scanning);
                    true
                }
                ConnectionState::Scanning => self.scan(&mut shutdown).await,
                ConnectionState::Connecting => self.connect(&mut shutdown).await,
                ConnectionState::Connected => self.serve(&mut shutdown).await,
                ConnectionState::Retrying => {
                    let resumed = shutdown.sleep(self.config.reconnect_interval).await;
                    if resumed {
                        self.set_state(ConnectionState::Scanning);
                    }
                    resumed
                }
                ConnectionState::Exhausted => {
                    let resumed = shutdown.sleep(self.config.exhausted_cooldown).await;
                    if resumed {
                        info!("BLE: retry budget restored, scanning again");
                        self.retry_count = 0;
                        self.set_state(ConnectionState::Scanning);
                    }
                    resumed
                }
            };
            if !keep_running {
                break;
            }
        }

        self.close().await;
        info!("Actuator supervisor stopped");
        self.transport
    }

    async fn scan(&mut self, shutdown: &mut Shutdown) -> bool {
        debug!(device = %self.config.device_name, "BLE: scanning");
        let limit = self.config.scan_timeout;
        let result = tokio::select! {
            biased;
            _ = shutdown.wait() => return false,
            r = timeout(limit, self.transport.scan(&self.config.device_name)) => flatten(r, "scan", limit),
        };
        match result {
            Ok(Some(peer)) => {
                info!(device = %self.config.device_name, peer = %peer, "BLE: device found");
                self.peer = Some(peer);
                self.set_state(ConnectionState::Connecting);
            }
            Ok(None) => self.attempt_failed(SmartFanError::DeviceNotFound(self.config.device_name.clone())),
            Err(e) => self.attempt_failed(e),
        }
        true
    }

    async fn connect(&mut self, shutdown: &mut Shutdown) -> bool {
        let Some(peer) = self.peer.clone() else {
            self.set_state(ConnectionState::Scanning);
            return true;
        };
        let limit = self.config.connection_timeout;
        let result = tokio::select! {
            biased;
            _ = shutdown.wait() => return false,
            r = timeout(limit, self.transport.connect(&peer)) => flatten(r, "connect", limit),
        };
        if let Err(e) = result {
            // A failed connect can leave a half-open link behind
            if !self.drop_link(shutdown).await {
                return false;
            }
            self.attempt_failed(e);
            return true;
        }

        if let Some(pin) = self.config.pin_code {
            let paired = tokio::select! {
                biased;
                _ = shutdown.wait() => return false,
                r = timeout(limit, self.transport.pair(&peer, pin)) => flatten(r, "pair", limit),
            };
            match paired {
                Ok(()) => info!(peer = %peer, "BLE: paired"),
                Err(e) => warn!(peer = %peer, error = %e, "BLE: pairing failed, continuing unpaired"),
            }
        }

        self.retry_count = 0;
        self.last_sent = None;
        self.shared.status.send_modify(|status| {
            status.peer = Some(peer.to_string());
            status.last_error = None;
        });
        self.set_state(ConnectionState::Connected);
        info!(peer = %peer, "BLE: connected");
        true
    }

    /// Connected: push the latest desired level until the link fails
    async fn serve(&mut self, shutdown: &mut Shutdown) -> bool {
        loop {
            let desired = *self.desired_rx.borrow_and_update();
            if let Some(level) = desired.filter(|level| self.last_sent != Some(*level)) {
                let sent = tokio::select! {
                    biased;
                    _ = shutdown.wait() => return false,
                    r = self.send(level) => r,
                };
                if let Err(e) = sent {
                    return self.link_lost(e, shutdown).await;
                }
            }

            tokio::select! {
                biased;
                _ = shutdown.wait() => return false,
                _ = self.desired_rx.changed() => {}
                _ = sleep(self.config.link_check_interval) => {
                    if !self.transport.is_connected() {
                        return self
                            .link_lost(SmartFanError::transport("peer disconnected"), shutdown)
                            .await;
                    }
                }
            }
        }
    }

    async fn send(&mut self, level: FanLevel) -> Result<()> {
        let payload = encode_level_command(level.as_u8())?;
        let limit = self.config.command_timeout;
        flatten(
            timeout(limit, self.transport.write(&self.config.target, &payload)).await,
            "command",
            limit,
        )?;

        self.last_sent = Some(level);
        self.shared.status.send_modify(|status| {
            status.last_sent = Some(level);
            status.commands_sent += 1;
        });
        info!(level = %level, "BLE: sent LEVEL:{}", level);
        Ok(())
    }

    /// Returns `false` when shutdown arrived while tearing the link down
    async fn link_lost(&mut self, error: SmartFanError, shutdown: &mut Shutdown) -> bool {
        warn!(error = %error, "BLE: link lost, reconnecting");
        self.last_sent = None;
        self.peer = None;
        self.record_error(&error);
        let resumed = self.drop_link(shutdown).await;
        self.set_state(ConnectionState::Disconnected);
        resumed
    }

    /// Best-effort disconnect bounded by the command timeout
    ///
    /// Shutdown abandons it and leaves the final disconnect to `close`.
    async fn drop_link(&mut self, shutdown: &mut Shutdown) -> bool {
        if shutdown.is_triggered() {
            return false;
        }
        let limit = self.config.command_timeout;
        let result = tokio::select! {
            biased;
            _ = shutdown.wait() => return false,
            r = timeout(limit, self.transport.disconnect()) => flatten(r, "disconnect", limit),
        };
        if let Err(e) = result {
            debug!(error = %e, "BLE: disconnect after failure failed");
        }
        true
    }

    fn attempt_failed(&mut self, error: SmartFanError) {
        self.retry_count += 1;
        self.peer = None;
        self.record_error(&error);
        self.set_state(ConnectionState::Disconnected);

        if self.retry_count >= self.config.max_retries {
            warn!(
                attempts = self.retry_count,
                error = %error,
                cooldown_secs = self.config.exhausted_cooldown.as_secs(),
                "BLE: retry budget exhausted, pausing"
            );
            self.set_state(ConnectionState::Exhausted);
        } else {
            warn!(
                attempt = self.retry_count,
                max_retries = self.config.max_retries,
                error = %error,
                "BLE: connection attempt failed"
            );
            self.set_state(ConnectionState::Retrying);
        }
    }

    /// Best-effort disconnect on shutdown, bounded by the command timeout
    async fn close(&mut self) {
        if self.state != ConnectionState::Connected && !self.transport.is_connected() {
            return;
        }
        let limit = self.config.command_timeout;
        match flatten(timeout(limit, self.transport.disconnect()).await, "disconnect", limit) {
            Ok(()) => info!("BLE: disconnected"),
            Err(e) => warn!(error = %e, "BLE: disconnect on shutdown failed"),
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn record_error(&self, error: &SmartFanError) {
        let message = error.to_string();
        self.shared.status.send_modify(|status| status.last_error = Some(message));
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "BLE: state change");
        }
        self.state = state;
        let retry_count = self.retry_count;
        self.shared.status.send_modify(|status| {
            status.state = state;
            status.retry_count = retry_count;
            if state != ConnectionState::Connected {
                status.peer = None;
            }
        });
    }
}

/// Collapse an elapsed timeout into a `Timeout` error
fn flatten<V>(
    result: std::result::Result<Result<V>, tokio::time::error::Elapsed>,
    operation: &str,
    limit: Duration,
) -> Result<V> {
    result.map_err(|_| {
        SmartFanError::Timeout(format!("{} exceeded {}s", operation, limit.as_secs()))
    })?
}
