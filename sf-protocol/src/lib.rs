//! Wire formats shared by the smart fan crates
//!
//! - Actuator command encoding (`LEVEL:<n>`)
//! - GATT service and characteristic identifiers
//! - Cycling Power and Heart Rate measurement payloads
//! - Simulator UDP datagrams (protobuf-style varint fields)

use serde::{Deserialize, Serialize};

/// Highest fan level the actuator understands
pub const MAX_LEVEL: u8 = 3;

/// Prefix of the textual level command
pub const LEVEL_COMMAND_PREFIX: &str = "LEVEL:";

/// Largest simulator datagram we accept
pub const MAX_DATAGRAM_SIZE: usize = 1024;

/// Simulator power field bounds (watts)
pub const SIMULATOR_POWER_RANGE: (u64, u64) = (0, 10_000);

/// Simulator heart rate field bounds (bpm)
pub const SIMULATOR_HEART_RATE_RANGE: (u64, u64) = (1, 220);

/// Length of the opaque header preceding the simulator fields
const SIMULATOR_HEADER_LEN: usize = 4;

/// Shortest datagram that can carry a field after the header
const SIMULATOR_MIN_PACKET_LEN: usize = 6;

/// Protobuf field numbers carried by the simulator
const FIELD_POWER: u64 = 4;
const FIELD_CADENCE: u64 = 5;
const FIELD_HEART_RATE: u64 = 6;

/// A varint never needs more than ten bytes for 64 bits
const MAX_VARINT_LEN: usize = 10;

// ============================================================================
// Actuator Commands
// ============================================================================

/// Encode a fan level as the actuator's UTF-8 command
pub fn encode_level_command(level: u8) -> Result<Vec<u8>, String> {
    validate_level(level)?;
    Ok(format!("{}{}", LEVEL_COMMAND_PREFIX, level).into_bytes())
}

/// Parse a command written by `encode_level_command`
pub fn parse_level_command(payload: &[u8]) -> Option<u8> {
    let text = std::str::from_utf8(payload).ok()?;
    let level: u8 = text.strip_prefix(LEVEL_COMMAND_PREFIX)?.trim().parse().ok()?;
    validate_level(level).ok()?;
    Some(level)
}

pub fn validate_level(level: u8) -> Result<(), String> {
    if level > MAX_LEVEL {
        return Err(format!("Fan level {} out of range (0-{})", level, MAX_LEVEL));
    }
    Ok(())
}

// ============================================================================
// GATT Identifiers
// ============================================================================

/// Bluetooth SIG base UUID suffix used to expand 16-bit identifiers
const BLUETOOTH_BASE_UUID_SUFFIX: &str = "-0000-1000-8000-00805f9b34fb";

/// Cycling Power service (0x1818)
pub const CYCLING_POWER_SERVICE: u16 = 0x1818;
/// Cycling Power Measurement characteristic (0x2A63)
pub const CYCLING_POWER_MEASUREMENT: u16 = 0x2A63;
/// Heart Rate service (0x180D)
pub const HEART_RATE_SERVICE: u16 = 0x180D;
/// Heart Rate Measurement characteristic (0x2A37)
pub const HEART_RATE_MEASUREMENT: u16 = 0x2A37;

/// Default service of the fan controller board
pub const DEFAULT_FAN_SERVICE_UUID: &str = "0000ffe0-0000-1000-8000-00805f9b34fb";
/// Default write characteristic of the fan controller board
pub const DEFAULT_FAN_CHARACTERISTIC_UUID: &str = "0000ffe1-0000-1000-8000-00805f9b34fb";

/// Expand a 16-bit SIG identifier to its 128-bit string form
pub fn uuid_from_u16(short: u16) -> String {
    format!("0000{:04x}{}", short, BLUETOOTH_BASE_UUID_SUFFIX)
}

/// Check if a string is a valid UUID format (xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx)
pub fn validate_uuid(uuid: &str) -> Result<(), String> {
    let parts: Vec<&str> = uuid.split('-').collect();
    let expected_lens = [8, 4, 4, 4, 12];
    if parts.len() != expected_lens.len() {
        return Err(format!("'{}' is not a UUID", uuid));
    }
    for (part, &expected_len) in parts.iter().zip(expected_lens.iter()) {
        if part.len() != expected_len || !part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("'{}' is not a UUID", uuid));
        }
    }
    Ok(())
}

/// A service/characteristic pair addressing one writable endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattTarget {
    pub service_uuid: String,
    pub characteristic_uuid: String,
}

impl GattTarget {
    pub fn new(service_uuid: impl Into<String>, characteristic_uuid: impl Into<String>) -> Self {
        Self {
            service_uuid: service_uuid.into(),
            characteristic_uuid: characteristic_uuid.into(),
        }
    }
}

impl Default for GattTarget {
    fn default() -> Self {
        Self::new(DEFAULT_FAN_SERVICE_UUID, DEFAULT_FAN_CHARACTERISTIC_UUID)
    }
}

// ============================================================================
// Measurement Payloads
// ============================================================================

/// Cycling Power Measurement flags: Accumulated Energy Present (bit 11)
pub const CPS_FLAG_ACCUMULATED_ENERGY: u16 = 0x0800;

/// Encode a Cycling Power Measurement notification
///
/// Layout: flags (u16 LE), instantaneous power (i16 LE), accumulated energy kJ (u16 LE).
pub fn encode_cycling_power_measurement(power_watts: i32, accumulated_energy_kj: u16) -> [u8; 6] {
    let power = power_watts.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
    let flags = CPS_FLAG_ACCUMULATED_ENERGY.to_le_bytes();
    let power = power.to_le_bytes();
    let energy = accumulated_energy_kj.to_le_bytes();
    [flags[0], flags[1], power[0], power[1], energy[0], energy[1]]
}

/// Encode a Heart Rate Measurement notification (u8 value format)
pub fn encode_heart_rate_measurement(bpm: i32) -> [u8; 2] {
    [0x00, bpm.clamp(0, u8::MAX as i32) as u8]
}

// ============================================================================
// Simulator Datagrams
// ============================================================================

/// Readings carried by one telemetry frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    #[serde(default)]
    pub power: Option<u16>,
    #[serde(default)]
    pub heart_rate: Option<u8>,
}

impl TelemetryFrame {
    pub fn is_empty(&self) -> bool {
        self.power.is_none() && self.heart_rate.is_none()
    }
}

/// Read one varint starting at `offset`, returning the value and the next offset
pub fn read_varint(data: &[u8], offset: usize) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0;
    for (i, &byte) in data.get(offset..)?.iter().take(MAX_VARINT_LEN).enumerate() {
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Some((value, offset + i + 1));
        }
        shift += 7;
    }
    None
}

/// Append the varint encoding of `value` to `out`
pub fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    while value > 0x7F {
        out.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Extract power (field 4) and heart rate (field 6) from a simulator datagram
///
/// Unknown fields are skipped by wire type. Out-of-range values are dropped,
/// and a truncated packet yields whatever was decoded before the damage.
pub fn decode_simulator_packet(data: &[u8]) -> TelemetryFrame {
    let mut frame = TelemetryFrame::default();
    if data.len() < SIMULATOR_MIN_PACKET_LEN {
        return frame;
    }

    let mut offset = SIMULATOR_HEADER_LEN;
    while offset < data.len() {
        let Some((tag, next)) = read_varint(data, offset) else {
            break;
        };
        offset = next;
        let field_number = tag >> 3;

        match tag & 0x07 {
            0 => {
                let Some((value, next)) = read_varint(data, offset) else {
                    break;
                };
                offset = next;
                match field_number {
                    FIELD_POWER => frame.power = in_range(value, SIMULATOR_POWER_RANGE).map(|v| v as u16),
                    FIELD_HEART_RATE => {
                        frame.heart_rate = in_range(value, SIMULATOR_HEART_RATE_RANGE).map(|v| v as u8)
                    }
                    _ => {}
                }
            }
            1 => offset += 8,
            2 => {
                let Some((len, next)) = read_varint(data, offset) else {
                    break;
                };
                offset = next.saturating_add(len as usize);
            }
            5 => offset += 4,
            _ => break,
        }
    }
    frame
}

fn in_range(value: u64, (min, max): (u64, u64)) -> Option<u64> {
    (min..=max).contains(&value).then_some(value)
}

/// Build a simulator datagram in the layout the simulator emits
pub fn encode_simulator_packet(power: u16, cadence: u8, heart_rate: u8) -> Vec<u8> {
    let mut packet = vec![0u8; SIMULATOR_HEADER_LEN];
    // id, world_time, timestamp
    packet.extend_from_slice(&[0x08, 0x01]);
    packet.extend_from_slice(&[0x10, 0xAA, 0xBB, 0x01]);
    packet.extend_from_slice(&[0x18, 0xCC, 0xDD, 0xEE, 0xFF, 0x01]);
    for (field, value) in [
        (FIELD_POWER, u64::from(power)),
        (FIELD_CADENCE, u64::from(cadence)),
        (FIELD_HEART_RATE, u64::from(heart_rate)),
    ] {
        encode_varint(field << 3, &mut packet);
        encode_varint(value, &mut packet);
    }
    packet
}
