//! Unified error handling for the smart fan controller
//!
//! This crate provides the single error type used across all smart fan crates.
//! It uses thiserror for ergonomic error definitions with proper Display and Error trait impls.

use std::io;
use std::path::PathBuf;

/// Result type alias using SmartFanError
pub type Result<T> = std::result::Result<T, SmartFanError>;

/// Unified error type for all smart fan operations
#[derive(thiserror::Error, Debug)]
pub enum SmartFanError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Configuration and Settings Errors
    // ============================================================================
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    // ============================================================================
    // Actuator Transport Errors
    // ============================================================================
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Not connected to actuator")]
    NotConnected,

    #[error("Invalid fan level: {value} (must be 0-3)")]
    InvalidLevel {
        value: u8,
    },

    // ============================================================================
    // Telemetry Errors
    // ============================================================================
    #[error("Telemetry source error: {0}")]
    Telemetry(String),

    #[error("Sample channel closed: {0}")]
    ChannelClosed(String),

    // ============================================================================
    // Bridge Errors
    // ============================================================================
    #[error("Bridge service disabled: {0}")]
    ServiceDisabled(String),

    #[error("Notification failed: {0}")]
    Notify(String),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl SmartFanError {
    /// Create an invalid config error for a named field
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a transport error from a string
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}

// Protocol validators report plain strings
impl From<String> for SmartFanError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_display() {
        let err = SmartFanError::invalid_config("ftp", "must be 100-500");
        assert_eq!(
            err.to_string(),
            "Invalid configuration value for ftp: must be 100-500"
        );
    }

    #[test]
    fn test_from_string() {
        let err: SmartFanError = String::from("Invalid level: 7").into();
        assert!(matches!(err, SmartFanError::Generic(ref s) if s == "Invalid level: 7"));
        assert_eq!(err.to_string(), "Invalid level: 7");
    }
}
