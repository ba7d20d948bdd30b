//! ANT+ producer
//!
//! Wraps an [`AntNode`] (the USB stick plus its decoded device profiles) in a
//! retry loop and forwards readings into the sample channel.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use sf_error::Result;

use super::ProducerExit;
use crate::constants::antplus::{MAX_RETRIES, RECONNECT_DELAY};
use crate::settings::{HeartRateSource, Settings};
use crate::shutdown::Shutdown;
use crate::telemetry::{SampleSender, SourceKind, SourceSender};

/// A decoded data page
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AntReading {
    Power(f64),
    HeartRate(f64),
}

/// The ANT+ radio and its device profiles
#[async_trait]
pub trait AntNode: Send {
    /// Open the stick and attach the power meter, plus a heart rate monitor
    /// (device id, 0 = any) when requested
    async fn open(&mut self, heart_rate_monitor: Option<u16>) -> Result<()>;

    /// Next reading; `Ok(None)` once the node has stopped delivering
    async fn next_reading(&mut self) -> Result<Option<AntReading>>;

    async fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct AntPlusConfig {
    pub reconnect_delay: Duration,
    pub max_retries: u32,
    pub heart_rate_monitor: Option<u16>,
    /// Whether HR pages are sent to the pipeline
    pub forward_heart_rate: bool,
}

impl AntPlusConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let hr = &settings.antplus_bridge.heart_rate;
        Self {
            reconnect_delay: RECONNECT_DELAY,
            max_retries: MAX_RETRIES,
            heart_rate_monitor: hr.enabled.then_some(hr.device_id as u16),
            forward_heart_rate: settings.data_source.heart_rate_source != HeartRateSource::Zwift,
        }
    }
}

enum Session {
    Ended { delivered: bool },
    Stop(ProducerExit),
}

pub struct AntPlusProducer<N> {
    node: N,
    config: AntPlusConfig,
    sender: SourceSender,
}

impl<N: AntNode> AntPlusProducer<N> {
    pub fn new(node: N, config: AntPlusConfig, sender: &SampleSender) -> Self {
        Self {
            node,
            config,
            sender: sender.for_source(SourceKind::AntPlus),
        }
    }

    pub async fn run(mut self, mut shutdown: Shutdown) -> ProducerExit {
        info!(
            heart_rate_monitor = ?self.config.heart_rate_monitor,
            "STARTUP: ANT+ producer running"
        );
        let mut failures: u32 = 0;

        loop {
            let session = self.session(&mut shutdown).await;
            if let Err(e) = self.node.close().await {
                debug!(error = %e, "ANT+ node close failed");
            }

            match session {
                Session::Stop(exit) => return exit,
                Session::Ended { delivered } => {
                    if delivered {
                        failures = 0;
                    }
                    failures += 1;
                }
            }

            if failures >= self.config.max_retries {
                error!(failures, "ANT+: giving up after repeated failures");
                return ProducerExit::RetriesExhausted;
            }
            warn!(
                attempt = failures,
                max = self.config.max_retries,
                delay_secs = self.config.reconnect_delay.as_secs(),
                "ANT+: node stopped, reopening"
            );
            if !shutdown.sleep(self.config.reconnect_delay).await {
                return ProducerExit::Shutdown;
            }
        }
    }

    async fn session(&mut self, shutdown: &mut Shutdown) -> Session {
        if let Err(e) = self.node.open(self.config.heart_rate_monitor).await {
            warn!(error = %e, "ANT+: failed to open node");
            return Session::Ended { delivered: false };
        }
        info!("ANT+: node open");

        let mut delivered = false;
        loop {
            let reading = tokio::select! {
                biased;
                _ = shutdown.wait() => return Session::Stop(ProducerExit::Shutdown),
                reading = self.node.next_reading() => reading,
            };
            let forwarded = match reading {
                Ok(Some(AntReading::Power(watts))) => self.sender.power(watts).await,
                Ok(Some(AntReading::HeartRate(bpm))) if self.config.forward_heart_rate => {
                    self.sender.heart_rate(bpm).await
                }
                Ok(Some(AntReading::HeartRate(_))) => Ok(()),
                Ok(None) => return Session::Ended { delivered },
                Err(e) => {
                    warn!(error = %e, "ANT+: node error");
                    return Session::Ended { delivered };
                }
            };
            if forwarded.is_err() {
                return Session::Stop(ProducerExit::ChannelClosed);
            }
            delivered = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::shutdown_channel;
    use crate::telemetry::{sample_channel, Metric};
    use parking_lot::Mutex;
    use sf_error::SmartFanError;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use tokio::time::Instant;

    /// Scripted node: each open pops one session of readings
    #[derive(Default)]
    struct FakeNode {
        sessions: Arc<Mutex<VecDeque<Vec<AntReading>>>>,
        current: VecDeque<AntReading>,
        opens: Arc<Mutex<Vec<Option<u16>>>>,
        hang_when_drained: bool,
    }

    #[async_trait]
    impl AntNode for FakeNode {
        async fn open(&mut self, heart_rate_monitor: Option<u16>) -> Result<()> {
            self.opens.lock().push(heart_rate_monitor);
            match self.sessions.lock().pop_front() {
                Some(readings) => {
                    self.current = readings.into();
                    Ok(())
                }
                None => Err(SmartFanError::DeviceNotFound("ANT+ stick".to_string())),
            }
        }

        async fn next_reading(&mut self) -> Result<Option<AntReading>> {
            match self.current.pop_front() {
                Some(reading) => Ok(Some(reading)),
                None if self.hang_when_drained => std::future::pending().await,
                None => Err(SmartFanError::Telemetry("stick unplugged".to_string())),
            }
        }

        async fn close(&mut self) -> Result<()> {
            self.current.clear();
            Ok(())
        }
    }

    fn config(forward_heart_rate: bool) -> AntPlusConfig {
        AntPlusConfig {
            reconnect_delay: RECONNECT_DELAY,
            max_retries: MAX_RETRIES,
            heart_rate_monitor: Some(0),
            forward_heart_rate,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let node = FakeNode::default();
        let opens = node.opens.clone();
        let (tx, _rx) = sample_channel(8);
        let (_trigger, shutdown) = shutdown_channel();

        let start = Instant::now();
        let exit = AntPlusProducer::new(node, config(true), &tx).run(shutdown).await;

        assert_eq!(exit, ProducerExit::RetriesExhausted);
        assert_eq!(opens.lock().len(), MAX_RETRIES as usize);
        // One delay between each pair of attempts
        let waited = start.elapsed();
        assert!(waited >= RECONNECT_DELAY * (MAX_RETRIES - 1));
        assert!(waited < RECONNECT_DELAY * MAX_RETRIES);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivering_session_resets_failures() {
        let node = FakeNode::default();
        {
            let mut sessions = node.sessions.lock();
            sessions.push_back(vec![]);
            sessions.push_back(vec![AntReading::Power(200.0)]);
        }
        let opens = node.opens.clone();
        let (tx, mut rx) = sample_channel(8);
        let (_trigger, shutdown) = shutdown_channel();

        let exit = AntPlusProducer::new(node, config(true), &tx).run(shutdown).await;

        assert_eq!(exit, ProducerExit::RetriesExhausted);
        // 2 scripted sessions, the second resetting the count, then 9 more failures
        assert_eq!(opens.lock().len(), 2 + MAX_RETRIES as usize - 1);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.source, SourceKind::AntPlus);
        assert_eq!(event.sample.value, 200.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heart_rate_filtered_when_not_forwarded() {
        let node = FakeNode {
            hang_when_drained: true,
            ..FakeNode::default()
        };
        node.sessions.lock().push_back(vec![
            AntReading::HeartRate(140.0),
            AntReading::Power(150.0),
        ]);
        let (tx, mut rx) = sample_channel(8);
        let (trigger, shutdown) = shutdown_channel();
        let task = tokio::spawn(AntPlusProducer::new(node, config(false), &tx).run(shutdown));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.metric, Metric::Power);

        trigger.trigger();
        assert_eq!(task.await.unwrap(), ProducerExit::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_channel_stops_producer() {
        let node = FakeNode::default();
        node.sessions.lock().push_back(vec![AntReading::Power(100.0)]);
        let (tx, rx) = sample_channel(8);
        drop(rx);
        let (_trigger, shutdown) = shutdown_channel();

        let exit = AntPlusProducer::new(node, config(true), &tx).run(shutdown).await;
        assert_eq!(exit, ProducerExit::ChannelClosed);
    }

    #[test]
    fn test_config_from_settings() {
        let mut settings = Settings::default();
        settings.antplus_bridge.heart_rate.device_id = 1234;
        let config = AntPlusConfig::from_settings(&settings);
        assert_eq!(config.heart_rate_monitor, Some(1234));
        assert!(config.forward_heart_rate);

        settings.antplus_bridge.heart_rate.enabled = false;
        settings.data_source.heart_rate_source = HeartRateSource::Zwift;
        let config = AntPlusConfig::from_settings(&settings);
        assert_eq!(config.heart_rate_monitor, None);
        assert!(!config.forward_heart_rate);
    }
}
