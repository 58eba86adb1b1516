mod broker;
mod channels;
mod pagination;
mod workqueue;

pub use broker::*;
pub use channels::*;
pub use pagination::*;
pub use workqueue::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub workqueue: WorkqueueConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    /// `trace`, `debug`, `info`, `warn`, or `error`; fed straight into
    /// `tracing_subscriber::EnvFilter`.
    #[serde(default = "d_log_level")]
    pub log_level: String,
}

fn d_log_level() -> String {
    "info".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.broker.broker_url.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "broker.broker_url".into(),
                message: "must not be empty".into(),
            });
        } else {
            let has_scheme = ["nats://", "tls://", "ws://", "wss://"]
                .iter()
                .any(|s| self.broker.broker_url.starts_with(s));
            if !has_scheme {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "broker.broker_url".into(),
                    message: "must start with nats://, tls://, ws://, or wss://".into(),
                });
            }
        }

        for ch in &self.channels.channels {
            if !is_valid_channel_name(&ch.name) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "channels.channels".into(),
                    message: format!("invalid channel name {:?}, expected [a-z0-9-]+", ch.name),
                });
            }
        }

        if self.workqueue.workqueue_max_attempts == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "workqueue.workqueue_max_attempts".into(),
                message: "0 means every delivery is dead-lettered immediately".into(),
            });
        }

        errors
    }

    /// Load from `path`, falling back to defaults when the file is absent
    /// (mirrors `sa_gateway::cli::load_config`'s file-or-default pattern).
    pub fn load_from_path(path: &std::path::Path) -> Result<Self, crate::error::Error> {
        if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw).map_err(|e| crate::error::Error::Config(e.to_string()))
        } else {
            Ok(Config::default())
        }
    }

    /// Resolve the config path from `FLEET_CONFIG`, defaulting to
    /// `config.toml`, and load it.
    pub fn load() -> Result<(Self, String), crate::error::Error> {
        let config_path =
            std::env::var("FLEET_CONFIG").unwrap_or_else(|_| "config.toml".into());
        let config = Self::load_from_path(std::path::Path::new(&config_path))?;
        Ok((config, config_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn bad_broker_url_scheme_is_an_error() {
        let mut cfg = Config::default();
        cfg.broker.broker_url = "http://example.com".into();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.severity == ConfigSeverity::Error));
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let cfg = Config::load_from_path(&path).unwrap();
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn invalid_channel_name_is_rejected() {
        let mut cfg = Config::default();
        cfg.channels.channels.push(ChannelDef {
            name: "Bad Name".into(),
            description: String::new(),
            retention: ChannelRetention::default(),
        });
        assert!(!cfg.validate().is_empty());
    }
}
