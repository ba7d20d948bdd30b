//! Application Settings
//!
//! Persistent settings stored as JSON, by default in
//! ~/.config/smartfan/settings.json. Loading never fails on bad content:
//! a malformed document falls back to defaults and every out-of-range
//! or mistyped field is reset to its default with a warning.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use sf_error::{Result, SmartFanError};
use sf_protocol::{validate_uuid, GattTarget};

use crate::constants::telemetry::SAMPLING_RATE_HINT;
use crate::engine::ZoneMode;
use crate::telemetry::SourceKind;

/// Top-level keys the loader understands
const KNOWN_KEYS: &[&str] = &[
    "ftp",
    "min_watt",
    "max_watt",
    "cooldown_seconds",
    "buffer_seconds",
    "minimum_samples",
    "dropout_timeout",
    "zero_power_immediate",
    "zone_thresholds",
    "ble",
    "data_source",
    "antplus_bridge",
    "heart_rate_zones",
];

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Functional threshold power in watts (100-500)
    pub ftp: u32,
    /// Lowest average that counts as riding
    pub min_watt: u32,
    /// Highest plausible power; larger samples are rejected
    pub max_watt: u32,
    /// How long a lower zone must hold before the fan slows (0-300 s)
    pub cooldown_seconds: u32,
    /// Averaging window length (1-10 s)
    pub buffer_seconds: u32,
    /// Samples required before a window is decidable
    pub minimum_samples: u32,
    /// Silence after which a source is considered dead
    pub dropout_timeout: u32,
    /// Drop straight to level 0 when the target is Zone 0
    pub zero_power_immediate: bool,
    pub zone_thresholds: ZoneThresholds,
    pub ble: BleSettings,
    pub data_source: DataSourceSettings,
    pub antplus_bridge: BridgeSettings,
    pub heart_rate_zones: HeartRateZoneSettings,
}

/// Power zone boundaries as percentages of FTP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneThresholds {
    pub z1_max_percent: u32,
    pub z2_max_percent: u32,
}

/// Fan controller link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BleSettings {
    /// Run without hardware: commands are only logged
    pub skip_connection: bool,
    pub device_name: String,
    pub scan_timeout: u32,
    pub connection_timeout: u32,
    pub reconnect_interval: u32,
    pub max_retries: u32,
    pub command_timeout: u32,
    pub service_uuid: String,
    pub characteristic_uuid: String,
    /// Optional pairing PIN (0-999999)
    pub pin_code: Option<u32>,
}

/// Fallback producer selection ("none" disables failover)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackSource {
    AntPlus,
    #[default]
    Zwift,
    None,
}

impl FallbackSource {
    pub fn source(self) -> Option<SourceKind> {
        match self {
            FallbackSource::AntPlus => Some(SourceKind::AntPlus),
            FallbackSource::Zwift => Some(SourceKind::Zwift),
            FallbackSource::None => None,
        }
    }
}

/// Where heart rate comes from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartRateSource {
    #[default]
    AntPlus,
    Zwift,
    /// ANT+ preferred, simulator as fallback
    Both,
}

impl HeartRateSource {
    /// Primary and fallback producers for heart rate
    pub fn producers(self) -> (SourceKind, Option<SourceKind>) {
        match self {
            HeartRateSource::AntPlus => (SourceKind::AntPlus, None),
            HeartRateSource::Zwift => (SourceKind::Zwift, None),
            HeartRateSource::Both => (SourceKind::AntPlus, Some(SourceKind::Zwift)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSourceSettings {
    pub primary: SourceKind,
    pub fallback: FallbackSource,
    pub heart_rate_source: HeartRateSource,
    pub zwift: ZwiftSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZwiftSettings {
    pub port: u32,
    pub host: String,
    pub process_name: String,
    /// Seconds between process checks
    pub check_interval: u32,
}

/// ANT+ to BLE re-broadcast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    pub enabled: bool,
    pub heart_rate: AntHeartRateSettings,
    pub ble_broadcast: BroadcastSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AntHeartRateSettings {
    pub enabled: bool,
    /// ANT+ device number of the HR strap, 0 pairs with any
    pub device_id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastSettings {
    pub enabled: bool,
    pub power_service: bool,
    pub heart_rate_service: bool,
    pub device_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartRateZoneSettings {
    pub enabled: bool,
    pub max_hr: u32,
    pub resting_hr: u32,
    pub zone_mode: ZoneMode,
    pub z1_max_percent: u32,
    pub z2_max_percent: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ftp: 180,
            min_watt: 0,
            max_watt: 1000,
            cooldown_seconds: 120,
            buffer_seconds: 3,
            minimum_samples: 8,
            dropout_timeout: 5,
            zero_power_immediate: false,
            zone_thresholds: ZoneThresholds::default(),
            ble: BleSettings::default(),
            data_source: DataSourceSettings::default(),
            antplus_bridge: BridgeSettings::default(),
            heart_rate_zones: HeartRateZoneSettings::default(),
        }
    }
}

impl Default for ZoneThresholds {
    fn default() -> Self {
        Self {
            z1_max_percent: 60,
            z2_max_percent: 89,
        }
    }
}

impl Default for BleSettings {
    fn default() -> Self {
        let target = GattTarget::default();
        Self {
            skip_connection: false,
            device_name: "FanController".to_string(),
            scan_timeout: 10,
            connection_timeout: 15,
            reconnect_interval: 5,
            max_retries: 10,
            command_timeout: 3,
            service_uuid: target.service_uuid,
            characteristic_uuid: target.characteristic_uuid,
            pin_code: None,
        }
    }
}

impl Default for DataSourceSettings {
    fn default() -> Self {
        Self {
            primary: SourceKind::AntPlus,
            fallback: FallbackSource::Zwift,
            heart_rate_source: HeartRateSource::AntPlus,
            zwift: ZwiftSettings::default(),
        }
    }
}

impl Default for ZwiftSettings {
    fn default() -> Self {
        Self {
            port: 3022,
            host: "127.0.0.1".to_string(),
            process_name: "ZwiftApp.exe".to_string(),
            check_interval: 5,
        }
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            heart_rate: AntHeartRateSettings::default(),
            ble_broadcast: BroadcastSettings::default(),
        }
    }
}

impl Default for AntHeartRateSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            device_id: 0,
        }
    }
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            power_service: true,
            heart_rate_service: true,
            device_name: "SmartFanBridge".to_string(),
        }
    }
}

impl Default for HeartRateZoneSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_hr: 185,
            resting_hr: 60,
            zone_mode: ZoneMode::PowerOnly,
            z1_max_percent: 70,
            z2_max_percent: 80,
        }
    }
}

// ============================================================================
// Derived values
// ============================================================================

impl Settings {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(u64::from(self.cooldown_seconds))
    }

    pub fn buffer_span(&self) -> Duration {
        Duration::from_secs(u64::from(self.buffer_seconds))
    }

    /// Window capacity: buffer seconds times the expected sample rate
    pub fn buffer_capacity(&self) -> usize {
        (self.buffer_seconds * SAMPLING_RATE_HINT) as usize
    }

    pub fn dropout_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.dropout_timeout))
    }

    /// Primary and fallback producers for power
    pub fn power_producers(&self) -> (SourceKind, Option<SourceKind>) {
        (self.data_source.primary, self.data_source.fallback.source())
    }

    /// Whether any configured role needs the given producer
    pub fn uses_source(&self, source: SourceKind) -> bool {
        let (power_primary, power_fallback) = self.power_producers();
        let (hr_primary, hr_fallback) = self.data_source.heart_rate_source.producers();
        power_primary == source
            || power_fallback == Some(source)
            || hr_primary == source
            || hr_fallback == Some(source)
    }

    /// The bridge runs only when both the bridge and its broadcast are on
    pub fn bridge_active(&self) -> bool {
        self.antplus_bridge.enabled && self.antplus_bridge.ble_broadcast.enabled
    }

    /// Reset every out-of-range field to its default
    ///
    /// Returns one human-readable warning per correction.
    pub fn sanitize(&mut self) -> Vec<String> {
        let defaults = Settings::default();
        let mut warnings = Vec::new();
        let mut check = Checker {
            warnings: &mut warnings,
        };

        check.range("ftp", &mut self.ftp, 100, 500, defaults.ftp);
        check.range("max_watt", &mut self.max_watt, 1, u32::MAX, defaults.max_watt);
        check.range("cooldown_seconds", &mut self.cooldown_seconds, 0, 300, defaults.cooldown_seconds);
        check.range("buffer_seconds", &mut self.buffer_seconds, 1, 10, defaults.buffer_seconds);
        check.range("minimum_samples", &mut self.minimum_samples, 1, u32::MAX, defaults.minimum_samples);
        check.range("dropout_timeout", &mut self.dropout_timeout, 1, u32::MAX, defaults.dropout_timeout);

        if self.min_watt >= self.max_watt {
            check.warn(format!(
                "min_watt ({}) >= max_watt ({}), using defaults for both",
                self.min_watt, self.max_watt
            ));
            self.min_watt = defaults.min_watt;
            self.max_watt = defaults.max_watt;
        }

        let buffer_size = self.buffer_seconds * SAMPLING_RATE_HINT;
        if self.minimum_samples > buffer_size {
            check.warn(format!(
                "minimum_samples ({}) exceeds buffer size ({}), capped",
                self.minimum_samples, buffer_size
            ));
            self.minimum_samples = buffer_size;
        }

        self.zone_thresholds.sanitize(&mut check, &defaults.zone_thresholds);
        self.ble.sanitize(&mut check, &defaults.ble);
        self.data_source.sanitize(&mut check, &defaults.data_source);
        self.antplus_bridge.sanitize(&mut check, &defaults.antplus_bridge);
        self.heart_rate_zones.sanitize(&mut check, &defaults.heart_rate_zones);

        warnings
    }
}

impl ZoneThresholds {
    fn sanitize(&mut self, check: &mut Checker<'_>, defaults: &Self) {
        check.range("zone_thresholds.z1_max_percent", &mut self.z1_max_percent, 1, 100, defaults.z1_max_percent);
        check.range("zone_thresholds.z2_max_percent", &mut self.z2_max_percent, 1, 100, defaults.z2_max_percent);
        if self.z1_max_percent >= self.z2_max_percent {
            check.warn(format!(
                "zone_thresholds: z1_max_percent ({}) must be below z2_max_percent ({}), using defaults",
                self.z1_max_percent, self.z2_max_percent
            ));
            *self = defaults.clone();
        }
    }
}

impl BleSettings {
    fn sanitize(&mut self, check: &mut Checker<'_>, defaults: &Self) {
        check.non_empty("ble.device_name", &mut self.device_name, &defaults.device_name);
        check.range("ble.scan_timeout", &mut self.scan_timeout, 1, 60, defaults.scan_timeout);
        check.range("ble.connection_timeout", &mut self.connection_timeout, 1, 60, defaults.connection_timeout);
        check.range("ble.reconnect_interval", &mut self.reconnect_interval, 1, 60, defaults.reconnect_interval);
        check.range("ble.max_retries", &mut self.max_retries, 1, 100, defaults.max_retries);
        check.range("ble.command_timeout", &mut self.command_timeout, 1, 30, defaults.command_timeout);
        check.uuid("ble.service_uuid", &mut self.service_uuid, &defaults.service_uuid);
        check.uuid("ble.characteristic_uuid", &mut self.characteristic_uuid, &defaults.characteristic_uuid);
        if let Some(pin) = self.pin_code {
            if pin > 999_999 {
                check.warn(format!("ble.pin_code ({}) must be 0-999999, ignoring it", pin));
                self.pin_code = None;
            }
        }
    }

    pub fn gatt_target(&self) -> GattTarget {
        GattTarget::new(self.service_uuid.clone(), self.characteristic_uuid.clone())
    }
}

impl DataSourceSettings {
    fn sanitize(&mut self, check: &mut Checker<'_>, defaults: &Self) {
        if self.fallback.source() == Some(self.primary) {
            check.warn(format!(
                "data_source: fallback equals primary ({}), disabling fallback",
                self.primary
            ));
            self.fallback = FallbackSource::None;
        }
        check.range("data_source.zwift.port", &mut self.zwift.port, 1, 65_535, defaults.zwift.port);
        check.non_empty("data_source.zwift.host", &mut self.zwift.host, &defaults.zwift.host);
        check.non_empty(
            "data_source.zwift.process_name",
            &mut self.zwift.process_name,
            &defaults.zwift.process_name,
        );
        check.range(
            "data_source.zwift.check_interval",
            &mut self.zwift.check_interval,
            1,
            60,
            defaults.zwift.check_interval,
        );
    }
}

impl BridgeSettings {
    fn sanitize(&mut self, check: &mut Checker<'_>, defaults: &Self) {
        check.range(
            "antplus_bridge.heart_rate.device_id",
            &mut self.heart_rate.device_id,
            0,
            65_535,
            defaults.heart_rate.device_id,
        );
        check.non_empty(
            "antplus_bridge.ble_broadcast.device_name",
            &mut self.ble_broadcast.device_name,
            &defaults.ble_broadcast.device_name,
        );
    }
}

impl HeartRateZoneSettings {
    fn sanitize(&mut self, check: &mut Checker<'_>, defaults: &Self) {
        check.range("heart_rate_zones.max_hr", &mut self.max_hr, 100, 220, defaults.max_hr);
        check.range("heart_rate_zones.resting_hr", &mut self.resting_hr, 30, 100, defaults.resting_hr);
        check.range("heart_rate_zones.z1_max_percent", &mut self.z1_max_percent, 1, 100, defaults.z1_max_percent);
        check.range("heart_rate_zones.z2_max_percent", &mut self.z2_max_percent, 1, 100, defaults.z2_max_percent);
        if self.z1_max_percent >= self.z2_max_percent {
            check.warn(format!(
                "heart_rate_zones: z1_max_percent ({}) must be below z2_max_percent ({}), using defaults",
                self.z1_max_percent, self.z2_max_percent
            ));
            self.z1_max_percent = defaults.z1_max_percent;
            self.z2_max_percent = defaults.z2_max_percent;
        }
        let z1_bpm = f64::from(self.max_hr) * f64::from(self.z1_max_percent) / 100.0;
        if f64::from(self.resting_hr) >= z1_bpm {
            // The default itself may sit above a low zone 1 limit
            let below_z1 = (z1_bpm.ceil() as u32).saturating_sub(1);
            let replacement = defaults.resting_hr.min(below_z1);
            check.warn(format!(
                "heart_rate_zones: resting_hr ({}) must be below the zone 1 limit ({:.0} bpm), using {}",
                self.resting_hr, z1_bpm, replacement
            ));
            self.resting_hr = replacement;
        }
    }
}

/// Collects sanitize warnings
struct Checker<'a> {
    warnings: &'a mut Vec<String>,
}

impl Checker<'_> {
    fn warn(&mut self, message: String) {
        self.warnings.push(message);
    }

    fn range(&mut self, field: &str, value: &mut u32, min: u32, max: u32, default: u32) {
        if !(min..=max).contains(value) {
            self.warn(format!(
                "{} ({}) out of range {}-{}, using default {}",
                field, value, min, max, default
            ));
            *value = default;
        }
    }

    fn non_empty(&mut self, field: &str, value: &mut String, default: &str) {
        if value.trim().is_empty() {
            self.warn(format!("{} is empty, using default '{}'", field, default));
            *value = default.to_string();
        }
    }

    fn uuid(&mut self, field: &str, value: &mut String, default: &str) {
        if let Err(e) = validate_uuid(value) {
            self.warn(format!("{}: {}, using default", field, e));
            *value = default.to_string();
        }
    }
}

// ============================================================================
// Persistence
// ============================================================================

/// Parse and sanitize a settings document
///
/// Never fails: malformed JSON yields defaults. The second value lists every
/// problem found, unknown keys included.
pub fn parse_settings(content: &str) -> (Settings, Vec<String>) {
    let mut warnings = Vec::new();

    let mut settings = match serde_json::from_str::<serde_json::Value>(content) {
        Ok(serde_json::Value::Object(map)) => {
            let mut unknown: Vec<&str> = map
                .keys()
                .map(String::as_str)
                .filter(|key| !KNOWN_KEYS.contains(key))
                .collect();
            if !unknown.is_empty() {
                unknown.sort_unstable();
                warnings.push(format!("unknown settings key(s): {}", unknown.join(", ")));
            }
            merge_over_defaults(map, &mut warnings)
        }
        Ok(_) => {
            warnings.push("settings document is not a JSON object, using defaults".to_string());
            Settings::default()
        }
        Err(e) => {
            warnings.push(format!("malformed settings JSON ({}), using defaults", e));
            Settings::default()
        }
    };

    warnings.extend(settings.sanitize());
    (settings, warnings)
}

/// Lay every field of `document` over the defaults
///
/// A value whose type does not fit its field (negative seconds, a float FTP)
/// keeps that field's default; the rest of the document still applies.
fn merge_over_defaults(
    document: serde_json::Map<String, serde_json::Value>,
    warnings: &mut Vec<String>,
) -> Settings {
    let mut merged = match serde_json::to_value(Settings::default()) {
        Ok(value) => value,
        Err(e) => {
            warnings.push(format!("cannot serialize defaults ({}), using defaults", e));
            return Settings::default();
        }
    };
    for (key, value) in document {
        let pointer = format!("/{}", escape_pointer(&key));
        overlay_field(&mut merged, &pointer, &key, value, warnings);
    }
    match serde_json::from_value::<Settings>(merged) {
        Ok(settings) => settings,
        Err(e) => {
            warnings.push(format!("invalid settings ({}), using defaults", e));
            Settings::default()
        }
    }
}

fn overlay_field(
    merged: &mut serde_json::Value,
    pointer: &str,
    field: &str,
    value: serde_json::Value,
    warnings: &mut Vec<String>,
) {
    let nested = matches!(merged.pointer(pointer), Some(serde_json::Value::Object(_)));
    match value {
        serde_json::Value::Object(map) if nested => {
            for (key, value) in map {
                let pointer = format!("{}/{}", pointer, escape_pointer(&key));
                let field = format!("{}.{}", field, key);
                overlay_field(merged, &pointer, &field, value, warnings);
            }
        }
        value => {
            // Unknown nested keys have no slot and are ignored like serde does
            let Some(slot) = merged.pointer_mut(pointer) else {
                return;
            };
            let previous = std::mem::replace(slot, value);
            if let Err(e) = serde_json::from_value::<Settings>(merged.clone()) {
                if let Some(slot) = merged.pointer_mut(pointer) {
                    let rejected = std::mem::replace(slot, previous);
                    warnings.push(format!("{} ({}) invalid: {}, using default", field, rejected, e));
                }
            }
        }
    }
}

fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

/// Load settings from `path`, creating the file with defaults if missing
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        info!(path = %path.display(), "CONFIG: settings file not found, writing defaults");
        let settings = Settings::default();
        save_settings(path, &settings)?;
        return Ok(settings);
    }

    let content = fs::read_to_string(path).map_err(|source| SmartFanError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;

    let (settings, warnings) = parse_settings(&content);
    for warning in &warnings {
        warn!(path = %path.display(), "CONFIG: {}", warning);
    }
    info!(path = %path.display(), "CONFIG: settings loaded");
    Ok(settings)
}

/// Save settings to JSON file
/// Uses atomic write (temp file + rename) to prevent corruption on crash
pub fn save_settings(path: &Path, settings: &Settings) -> Result<()> {
    use std::io::Write;

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|source| SmartFanError::FileWrite {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let json = serde_json::to_string_pretty(settings)?;
    let temp_path = path.with_extension("json.tmp");
    let write_err = |source| SmartFanError::FileWrite {
        path: temp_path.clone(),
        source,
    };

    let mut file = fs::File::create(&temp_path).map_err(write_err)?;
    file.write_all(json.as_bytes()).map_err(write_err)?;
    file.sync_all().map_err(write_err)?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|source| SmartFanError::FileWrite {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_clean() {
        let mut settings = Settings::default();
        assert!(settings.sanitize().is_empty());
        assert_eq!(settings.buffer_capacity(), 12);
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let (settings, warnings) = parse_settings(r#"{"ftp": 250, "ble": {"skip_connection": true}}"#);
        assert!(warnings.is_empty(), "{:?}", warnings);
        assert_eq!(settings.ftp, 250);
        assert!(settings.ble.skip_connection);
        assert_eq!(settings.ble.max_retries, 10);
        assert_eq!(settings.cooldown_seconds, 120);
    }

    #[test]
    fn test_out_of_range_field_reset() {
        let (settings, warnings) = parse_settings(r#"{"ftp": 900, "cooldown_seconds": 60}"#);
        assert_eq!(settings.ftp, 180);
        assert_eq!(settings.cooldown_seconds, 60);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_mistyped_field_keeps_rest_of_document() {
        let (settings, warnings) = parse_settings(
            r#"{"ftp": 250, "cooldown_seconds": -5, "ble": {"skip_connection": true, "max_retries": "many"}}"#,
        );
        assert_eq!(settings.ftp, 250);
        assert_eq!(settings.cooldown_seconds, 120);
        assert!(settings.ble.skip_connection);
        assert_eq!(settings.ble.max_retries, 10);
        assert_eq!(warnings.len(), 2, "{:?}", warnings);
        assert!(warnings.iter().any(|w| w.starts_with("cooldown_seconds (-5)")));
        assert!(warnings.iter().any(|w| w.starts_with("ble.max_retries")));

        let (settings, warnings) = parse_settings(r#"{"ftp": 250.5, "max_watt": 800}"#);
        assert_eq!(settings.ftp, 180);
        assert_eq!(settings.max_watt, 800);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_malformed_document_uses_defaults() {
        let (settings, warnings) = parse_settings("{ not json");
        assert_eq!(settings, Settings::default());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_unknown_keys_reported() {
        let (_, warnings) = parse_settings(r#"{"ftp": 200, "colour": "red"}"#);
        assert!(warnings.iter().any(|w| w.contains("colour")));
    }

    #[test]
    fn test_cross_field_rules() {
        let (settings, _) = parse_settings(
            r#"{"min_watt": 500, "max_watt": 400, "buffer_seconds": 1, "minimum_samples": 10,
                "data_source": {"primary": "zwift", "fallback": "zwift"}}"#,
        );
        assert_eq!((settings.min_watt, settings.max_watt), (0, 1000));
        assert_eq!(settings.minimum_samples, 4);
        assert_eq!(settings.data_source.fallback, FallbackSource::None);
    }

    #[test]
    fn test_zone_order_enforced() {
        let (settings, _) =
            parse_settings(r#"{"zone_thresholds": {"z1_max_percent": 90, "z2_max_percent": 80}}"#);
        assert_eq!(settings.zone_thresholds, ZoneThresholds::default());
    }

    #[test]
    fn test_resting_hr_below_zone_one() {
        let (settings, warnings) = parse_settings(
            r#"{"heart_rate_zones": {"max_hr": 100, "resting_hr": 90, "z1_max_percent": 50, "z2_max_percent": 60}}"#,
        );
        // the default of 60 would still sit above the 50 bpm zone 1 limit
        assert_eq!(settings.heart_rate_zones.resting_hr, 49);
        assert_eq!(warnings.len(), 1);

        let (settings, _) =
            parse_settings(r#"{"heart_rate_zones": {"max_hr": 185, "resting_hr": 100, "z1_max_percent": 50}}"#);
        assert_eq!(settings.heart_rate_zones.resting_hr, 60);
    }

    #[test]
    fn test_bad_uuid_and_pin() {
        let (settings, warnings) =
            parse_settings(r#"{"ble": {"service_uuid": "ffe0", "pin_code": 1234567}}"#);
        assert_eq!(settings.ble.service_uuid, BleSettings::default().service_uuid);
        assert_eq!(settings.ble.pin_code, None);
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn test_heart_rate_source_producers() {
        assert_eq!(
            HeartRateSource::Both.producers(),
            (SourceKind::AntPlus, Some(SourceKind::Zwift))
        );
        let (settings, _) = parse_settings(r#"{"data_source": {"heart_rate_source": "both"}}"#);
        assert_eq!(settings.data_source.heart_rate_source, HeartRateSource::Both);
    }

    #[test]
    fn test_uses_source() {
        let (settings, _) = parse_settings(
            r#"{"data_source": {"primary": "zwift", "fallback": "none", "heart_rate_source": "zwift"}}"#,
        );
        assert!(settings.uses_source(SourceKind::Zwift));
        assert!(!settings.uses_source(SourceKind::AntPlus));
    }

    #[test]
    fn test_load_creates_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = load_settings(&path).unwrap();
        assert_eq!(settings, Settings::default());
        assert!(path.exists());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        let mut settings = Settings::default();
        settings.ftp = 275;
        settings.heart_rate_zones.zone_mode = ZoneMode::HigherWins;
        save_settings(&path, &settings).unwrap();
        assert_eq!(load_settings(&path).unwrap(), settings);
    }
}
