//! Simulator producer
//!
//! Listens for the cycling simulator's UDP datagrams while its process is
//! running. The socket is opened when the process appears and closed when it
//! goes away, checked every `check_interval`.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use sf_protocol::decode_simulator_packet;

use super::ProducerExit;
use crate::constants::simulator::RECV_BUFFER_SIZE;
use crate::settings::ZwiftSettings;
use crate::shutdown::Shutdown;
use crate::telemetry::{SampleSender, SourceKind, SourceSender};

/// Answers whether a named process is running
#[cfg_attr(test, mockall::automock)]
pub trait ProcessProbe: Send + Sync {
    fn is_running(&self, process_name: &str) -> bool;
}

/// Scans `/proc/<pid>/{comm,cmdline}` for a case-insensitive substring
///
/// Reports `true` when the process table cannot be read, so platforms
/// without procfs always listen.
#[derive(Debug, Clone)]
pub struct ProcFsProbe {
    root: PathBuf,
}

impl ProcFsProbe {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for ProcFsProbe {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcessProbe for ProcFsProbe {
    fn is_running(&self, process_name: &str) -> bool {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return true;
        };
        let needle = process_name.to_lowercase();

        entries
            .flatten()
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()))
            })
            .any(|entry| {
                ["comm", "cmdline"].iter().any(|file| {
                    std::fs::read(entry.path().join(file))
                        .map(|bytes| {
                            String::from_utf8_lossy(&bytes)
                                .replace('\0', " ")
                                .to_lowercase()
                                .contains(&needle)
                        })
                        .unwrap_or(false)
                })
            })
    }
}

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub bind_address: String,
    pub process_name: String,
    pub check_interval: Duration,
}

impl SimulatorConfig {
    pub fn from_settings(settings: &ZwiftSettings) -> Self {
        Self {
            bind_address: format!("{}:{}", settings.host, settings.port),
            process_name: settings.process_name.clone(),
            check_interval: Duration::from_secs(u64::from(settings.check_interval.max(1))),
        }
    }
}

enum Wake {
    Check,
    Datagram(io::Result<usize>),
}

pub struct SimulatorProducer<P> {
    probe: P,
    config: SimulatorConfig,
    sender: SourceSender,
    socket: Option<UdpSocket>,
}

impl<P: ProcessProbe> SimulatorProducer<P> {
    pub fn new(probe: P, config: SimulatorConfig, sender: &SampleSender) -> Self {
        Self {
            probe,
            config,
            sender: sender.for_source(SourceKind::Zwift),
            socket: None,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.socket.is_some()
    }

    pub async fn run(mut self, mut shutdown: Shutdown) -> ProducerExit {
        info!(
            address = %self.config.bind_address,
            process = %self.config.process_name,
            "STARTUP: simulator producer running"
        );
        let mut check = interval(self.config.check_interval);
        check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            let wake = tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = check.tick() => Wake::Check,
                received = recv(self.socket.as_ref(), &mut buf) => Wake::Datagram(received),
            };

            match wake {
                Wake::Check => self.refresh().await,
                Wake::Datagram(Ok(len)) => {
                    if self.forward(&buf[..len]).await.is_err() {
                        return ProducerExit::ChannelClosed;
                    }
                }
                Wake::Datagram(Err(e)) => {
                    warn!(error = %e, "SOURCES: simulator socket error, closing");
                    self.socket = None;
                }
            }
        }
        ProducerExit::Shutdown
    }

    /// Open or close the socket to follow the simulator process
    pub async fn refresh(&mut self) {
        let running = self.probe.is_running(&self.config.process_name);
        match (running, self.socket.is_some()) {
            (true, false) => match UdpSocket::bind(&self.config.bind_address).await {
                Ok(socket) => {
                    info!(address = %self.config.bind_address, "SOURCES: simulator detected, listening");
                    self.socket = Some(socket);
                }
                Err(e) => {
                    warn!(address = %self.config.bind_address, error = %e, "SOURCES: cannot bind simulator socket");
                }
            },
            (false, true) => {
                info!("SOURCES: simulator stopped, closing socket");
                self.socket = None;
            }
            _ => {}
        }
    }

    async fn forward(&self, datagram: &[u8]) -> sf_error::Result<()> {
        let frame = decode_simulator_packet(datagram);
        if frame.is_empty() {
            debug!(len = datagram.len(), "Simulator datagram carried no usable fields");
            return Ok(());
        }
        if let Some(watts) = frame.power {
            self.sender.power(f64::from(watts)).await?;
        }
        if let Some(bpm) = frame.heart_rate {
            self.sender.heart_rate(f64::from(bpm)).await?;
        }
        Ok(())
    }
}

async fn recv(socket: Option<&UdpSocket>, buf: &mut [u8]) -> io::Result<usize> {
    match socket {
        Some(socket) => socket.recv_from(buf).await.map(|(len, _)| len),
        None => std::future::pending().await,
    }
}
