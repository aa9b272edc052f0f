//! Logging setup for the command-line tool.
//!
//! The library only emits `tracing` events; installing a subscriber is
//! left to the binary.

use anyhow::Result;
use std::fs::OpenOptions;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Where log output goes, parsed from `--log`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Off,
    Stdout,
    Stderr,
    /// Append to this file.
    File(String),
}

impl LogTarget {
    /// `0`/`off`, `1`/`stdout`, `2`/`stderr`, anything else is a file name.
    pub fn parse(value: &str) -> Self {
        match value {
            "0" | "off" => LogTarget::Off,
            "1" | "stdout" => LogTarget::Stdout,
            "2" | "stderr" => LogTarget::Stderr,
            filename => LogTarget::File(filename.to_string()),
        }
    }
}

/// Default filter level. `RUST_LOG` overrides it when set.
pub fn default_level(verbose: bool) -> LevelFilter {
    if verbose { LevelFilter::DEBUG } else { LevelFilter::WARN }
}

fn filter(verbose: bool) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(default_level(verbose).into())
        .from_env_lossy()
}

/// Install the global subscriber.
pub fn init(target: &LogTarget, verbose: bool) -> Result<()> {
    match target {
        LogTarget::Off => {}
        LogTarget::Stdout => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter(verbose))
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogTarget::Stderr => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter(verbose))
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogTarget::File(filename) => {
            let file = OpenOptions::new().create(true).append(true).open(filename)?;
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter(verbose))
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}
