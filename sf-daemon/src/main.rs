//! Smart Fan Daemon (smartfand)
//!
//! Reads live cycling power and heart rate, decides a fan level (0-3) and
//! keeps the BLE fan controller in step with it.
//!
//! # Usage
//!
//! ```bash
//! # Run with the default settings file
//! smartfand
//!
//! # Explicit settings file, ANT+ readings replayed from a recording
//! smartfand --config ./settings.json --antplus-replay ride.jsonl
//!
//! # Send a scripted ride to a running daemon
//! smartfand simulate --port 3022
//! ```

mod backends;
mod control;
mod simulate;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;

use sf_core::constants::paths::default_settings_path;
use sf_core::load_settings;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Smart fan controller daemon
#[derive(Parser, Debug)]
#[command(name = "smartfand", author, version, about, long_about = None)]
struct Args {
    /// Settings file (default: $XDG_CONFIG_HOME/smartfan/settings.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Replay ANT+ readings from a JSON-lines recording instead of a USB stick
    #[arg(long)]
    antplus_replay: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a scripted ride as simulator UDP datagrams
    Simulate {
        /// Destination host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Destination port
        #[arg(short, long, default_value_t = 3022)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let journald = init_logging();

    if let Some(Command::Simulate { host, port }) = args.command {
        return simulate::run(&host, port).await;
    }

    info!("STARTUP: smartfand {} starting", VERSION);
    info!("STARTUP: Logging to {}", if journald { "systemd journal" } else { "stdout" });

    let path = args.config.unwrap_or_else(default_settings_path);
    info!("STARTUP: Settings file: {}", path.display());
    let settings = load_settings(&path)
        .with_context(|| format!("loading settings from {}", path.display()))?;

    control::run(settings, args.antplus_replay).await
}

/// Log to the systemd journal when available, otherwise to stdout
///
/// The filter comes from `SMARTFAN_LOG` (default `info`).
fn init_logging() -> bool {
    let log_level = std::env::var("SMARTFAN_LOG").unwrap_or_else(|_| "info".to_string());

    if Path::new("/run/systemd/journal/socket").exists() {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(&log_level))
                    .init();
                return true;
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(&log_level)
        .init();
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simulate_subcommand() {
        let args = Args::parse_from(["smartfand", "simulate", "--port", "4000"]);
        match args.command {
            Some(Command::Simulate { host, port }) => {
                assert_eq!(host, "127.0.0.1");
                assert_eq!(port, 4000);
            }
            None => panic!("expected simulate"),
        }
    }

    #[test]
    fn test_parse_daemon_flags() {
        let args = Args::parse_from([
            "smartfand",
            "--config",
            "/tmp/settings.json",
            "--antplus-replay",
            "ride.jsonl",
        ]);
        assert!(args.command.is_none());
        assert_eq!(args.config, Some(PathBuf::from("/tmp/settings.json")));
        assert_eq!(args.antplus_replay, Some(PathBuf::from("ride.jsonl")));
    }
}
