//! Layered configuration: built-in defaults, then an optional TOML file,
//! then `EXCHANGE_*` environment overrides.

use crate::error::{ExchangeError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const ENV_DATABASE: &str = "EXCHANGE_DATABASE";
pub const ENV_PREVIEW_LIMIT: &str = "EXCHANGE_PREVIEW_LIMIT";
pub const ENV_LOG_LEVEL: &str = "EXCHANGE_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "EXCHANGE_LOG_FORMAT";
pub const ENV_BIND: &str = "EXCHANGE_BIND";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(ExchangeError::Config(format!("unknown log format: '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directive, e.g. "info" or "tabular_exchange=debug"
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        LogSettings {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: SocketAddr,
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
        }
    }
}

/// Main configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// SQLite file holding records, import runs and templates
    pub database_path: PathBuf,
    /// Row cap for export previews
    pub preview_limit: usize,
    pub logging: LogSettings,
    pub server: ServerSettings,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            database_path: PathBuf::from("exchange.db"),
            preview_limit: 10,
            logging: LogSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl ExchangeConfig {
    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Defaults overlaid with a TOML file; missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| ExchangeError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Apply `EXCHANGE_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_DATABASE) {
            self.database_path = PathBuf::from(path);
        }
        if let Some(limit) = lookup(ENV_PREVIEW_LIMIT) {
            self.preview_limit = limit.trim().parse().map_err(|_| {
                ExchangeError::Config(format!("{} must be a positive integer, got '{}'", ENV_PREVIEW_LIMIT, limit))
            })?;
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            self.logging.format = format.parse()?;
        }
        if let Some(bind) = lookup(ENV_BIND) {
            self.server.bind = bind
                .trim()
                .parse()
                .map_err(|_| ExchangeError::Config(format!("{} is not a socket address: '{}'", ENV_BIND, bind)))?;
        }

        if self.preview_limit == 0 {
            return Err(ExchangeError::Config("preview_limit must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }
}
