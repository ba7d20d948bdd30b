//! Constants and configuration values for the smart fan controller
//!
//! Centralizes magic numbers, timings and value ranges.
//! Add new tunables here instead of inlining them at the call site.

use std::time::Duration;

/// Configuration file locations
pub mod paths {
    /// Directory name under the user config dir
    pub const CONFIG_DIR_NAME: &str = "smartfan";

    /// Settings file name
    pub const SETTINGS_FILE: &str = "settings.json";

    /// Resolve the default settings path
    /// `$XDG_CONFIG_HOME/smartfan/settings.json`, else `./settings.json`
    pub fn default_settings_path() -> std::path::PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join(CONFIG_DIR_NAME).join(SETTINGS_FILE))
            .unwrap_or_else(|| std::path::PathBuf::from(SETTINGS_FILE))
    }
}

/// Telemetry ingestion
pub mod telemetry {
    use super::Duration;

    /// Expected samples per second, used to size the averaging window
    pub const SAMPLING_RATE_HINT: u32 = 4;

    /// Capacity of the producer -> pipeline sample channel
    pub const SAMPLE_CHANNEL_CAPACITY: usize = 256;

    /// Accepted heart rate range (bpm)
    pub const HEART_RATE_MIN: f64 = 1.0;
    pub const HEART_RATE_MAX: f64 = 220.0;

    /// Averages below this are treated as zero power
    pub const ZERO_POWER_EPSILON: f64 = 1.0;

    /// Minimum spacing of heart rate display logs when HR zones are off
    pub const HR_DISPLAY_INTERVAL: Duration = Duration::from_secs(1);
}

/// Decision pipeline timing
pub mod pipeline {
    use super::Duration;

    /// Liveness check period (clamped to dropout_timeout)
    pub const DROPOUT_TICK: Duration = Duration::from_secs(1);

    /// Minimum spacing of cooldown countdown logs
    pub const COOLDOWN_LOG_INTERVAL: Duration = Duration::from_secs(10);

    /// Period of the source summary log
    pub const SOURCE_SUMMARY_INTERVAL: Duration = Duration::from_secs(30);

    /// Fallback is held passive this long when ANT+ is primary
    pub const ANTPLUS_STARTUP_GRACE: Duration = Duration::from_secs(30);
}

/// Actuator connection supervisor
pub mod actuator {
    use super::Duration;

    /// Pause after the retry budget is exhausted
    pub const EXHAUSTED_COOLDOWN: Duration = Duration::from_secs(30);

    /// How often a connected link is checked for a silent peer disconnect
    pub const LINK_CHECK_INTERVAL: Duration = Duration::from_secs(1);
}

/// ANT+ producer
pub mod antplus {
    use super::Duration;

    /// Delay before re-opening a failed node
    pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

    /// Consecutive node failures before the producer gives up
    pub const MAX_RETRIES: u32 = 10;
}

/// Simulator producer
pub mod simulator {
    /// Receive buffer size for a single datagram
    pub const RECV_BUFFER_SIZE: usize = sf_protocol::MAX_DATAGRAM_SIZE;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_path_ends_with_file() {
        let path = paths::default_settings_path();
        assert!(path.ends_with(paths::SETTINGS_FILE));
    }
}
