//! `smartfand simulate`: send a scripted ride as simulator datagrams
//!
//! Lets the daemon be exercised end to end without a trainer or the
//! simulator itself.

use anyhow::Context;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use sf_core::constants::telemetry::SAMPLING_RATE_HINT;
use sf_protocol::encode_simulator_packet;

/// One second of the ride
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RideStep {
    pub phase: &'static str,
    pub power: u16,
    pub cadence: u8,
    pub heart_rate: u8,
}

fn phase(
    name: &'static str,
    seconds: u16,
    step: impl Fn(u16) -> (u16, u8, u8),
) -> impl Iterator<Item = RideStep> {
    (0..seconds).map(move |i| {
        let (power, cadence, heart_rate) = step(i);
        RideStep {
            phase: name,
            power,
            cadence,
            heart_rate,
        }
    })
}

/// Warm-up, hard block, easy spin, sprint, cool-down
pub fn ride_script() -> Vec<RideStep> {
    phase("warm-up", 15, |i| (100 + i * 3, 70 + i as u8, 100 + i as u8))
        .chain(phase("hard", 20, |i| (200 + i * 5, 85 + (i / 2) as u8, 120 + i as u8 * 2)))
        .chain(phase("easy", 10, |_| (150, 75, 140)))
        .chain(phase("sprint", 5, |i| (400, 110, 165 + i as u8)))
        .chain(phase("cool-down", 15, |i| {
            (
                100u16.saturating_sub(i * 7),
                70u8.saturating_sub(i as u8 * 4),
                150u8.saturating_sub(i as u8 * 3),
            )
        }))
        .collect()
}

pub async fn run(host: &str, port: u16) -> anyhow::Result<()> {
    let target = format!("{}:{}", host, port);
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .context("binding simulator socket")?;

    let script = ride_script();
    info!(destination = %target, seconds = script.len(), "Simulating ride");

    // Each script second is sent several times so the averaging window fills
    let packets_per_step = SAMPLING_RATE_HINT;
    let mut ticker = interval(Duration::from_secs(1) / packets_per_step);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut current_phase = "";
    for (second, step) in script.iter().enumerate() {
        if step.phase != current_phase {
            current_phase = step.phase;
            info!(phase = current_phase, "Ride phase");
        }
        info!(
            second = second + 1,
            power = step.power,
            cadence = step.cadence,
            heart_rate = step.heart_rate,
            "{}W",
            step.power
        );
        let packet = encode_simulator_packet(step.power, step.cadence, step.heart_rate);
        for _ in 0..packets_per_step {
            ticker.tick().await;
            socket
                .send_to(&packet, &target)
                .await
                .with_context(|| format!("sending to {}", target))?;
        }
    }

    info!("Simulation finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sf_protocol::decode_simulator_packet;

    #[test]
    fn test_script_shape() {
        let script = ride_script();
        assert_eq!(script.len(), 65);
        assert_eq!(script[0].power, 100);
        assert_eq!(script[14].power, 142);
        assert_eq!(script[15].power, 200);
        assert_eq!(script[34].power, 295);
        assert!(script[45..50].iter().all(|s| s.power == 400));
        assert_eq!(script.last().unwrap().power, 2);
        assert_eq!(script[64].cadence, 14);
    }

    #[test]
    fn test_script_packets_decode() {
        for step in ride_script() {
            let frame = decode_simulator_packet(&encode_simulator_packet(
                step.power,
                step.cadence,
                step.heart_rate,
            ));
            assert_eq!(frame.power, Some(step.power));
            assert_eq!(frame.heart_rate, Some(step.heart_rate));
        }
    }

    #[tokio::test]
    async fn test_run_sends_four_packets_per_step() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let sender = tokio::spawn(async move { run("127.0.0.1", port).await });
        let mut buf = [0u8; 64];
        for _ in 0..SAMPLING_RATE_HINT {
            let len = listener.recv(&mut buf).await.unwrap();
            assert_eq!(decode_simulator_packet(&buf[..len]).power, Some(100));
        }
        let len = listener.recv(&mut buf).await.unwrap();
        assert_eq!(decode_simulator_packet(&buf[..len]).power, Some(103));
        sender.abort();
    }
}
