//! Logging setup using `tracing` and `tracing-subscriber`.
//!
//! # Log Levels
//!
//! - `error`: file-level import failures
//! - `warn`: rejected rows (row number and reason, never cell values)
//! - `info`: run start/finish with counts, template changes
//! - `debug`: per-row progress, fetch sizes, silent defaults

use crate::config::{LogFormat, LogSettings};
use crate::error::{ExchangeError, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// `RUST_LOG` when present, otherwise the configured level.
pub fn build_filter(settings: &LogSettings, rust_log: Option<&str>) -> Result<EnvFilter> {
    let directives = rust_log
        .filter(|d| !d.trim().is_empty())
        .unwrap_or(settings.level.as_str());

    EnvFilter::try_new(directives)
        .map_err(|e| ExchangeError::Config(format!("invalid log filter '{}': {}", directives, e)))
}

/// Install the global subscriber. Call once at startup.
pub fn init(settings: &LogSettings) -> Result<()> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = build_filter(settings, rust_log.as_deref())?;

    let installed = match settings.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init(),
    };

    installed.map_err(|e| ExchangeError::Config(format!("logging already initialized: {}", e)))
}
