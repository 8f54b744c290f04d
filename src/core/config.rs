//! Configuration parsing and validation.
//!
//! Connection configuration is loaded from TOML files with programmatic
//! overrides. Sections mirror the core components: the fragmentation codec
//! (packet size), the receive queue and flow controller (capacity and
//! watermarks), logging, and transport TLS material.

use crate::backend::tls::TlsOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default maximum payload bytes carried per fragment. For best results
/// the value should be a multiple of the path MTU.
pub const DEFAULT_PACKET_SIZE: usize = 64_500;

/// Top-level connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcsConfig {
    /// Maximum payload bytes per fragment.
    #[serde(default = "default_packet_size")]
    pub packet_size: usize,

    /// Receive queue capacity (sealed actions).
    #[serde(default = "default_recv_queue_cap")]
    pub recv_queue_cap: usize,

    /// Flow control: queue depth at which a stop signal is broadcast.
    #[serde(default = "default_fc_upper")]
    pub fc_upper: usize,

    /// Flow control: queue depth at which a continue signal is broadcast.
    #[serde(default = "default_fc_lower")]
    pub fc_lower: usize,

    /// Logging options.
    #[serde(default)]
    pub log: LogOptions,

    /// TLS material for transports that support it.
    #[serde(default)]
    pub tls: Option<TlsOptions>,
}

/// Logging options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogOptions {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Optional log file sink; events go to stderr when unset.
    #[serde(default)]
    pub file: Option<String>,

    /// Prefix events with a timestamp produced by this process.
    #[serde(default = "default_self_timestamp")]
    pub self_timestamp: bool,

    /// Force debug-level output regardless of `level`.
    #[serde(default)]
    pub debug: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            self_timestamp: default_self_timestamp(),
            debug: false,
        }
    }
}

impl Default for GcsConfig {
    fn default() -> Self {
        Self {
            packet_size: default_packet_size(),
            recv_queue_cap: default_recv_queue_cap(),
            fc_upper: default_fc_upper(),
            fc_lower: default_fc_lower(),
            log: LogOptions::default(),
            tls: None,
        }
    }
}

// Default value functions

fn default_packet_size() -> usize {
    DEFAULT_PACKET_SIZE
}

fn default_recv_queue_cap() -> usize {
    4096
}

fn default_fc_upper() -> usize {
    256
}

fn default_fc_lower() -> usize {
    128
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_self_timestamp() -> bool {
    true
}

/// Programmatic override options applied on top of a loaded configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override the per-fragment payload budget.
    pub packet_size: Option<usize>,
    /// Override the log level.
    pub log_level: Option<String>,
    /// Override the log file sink.
    pub log_file: Option<String>,
}

impl GcsConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: GcsConfig =
            toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(packet_size) = overrides.packet_size {
            self.packet_size = packet_size;
        }
        if let Some(ref level) = overrides.log_level {
            self.log.level = level.clone();
        }
        if let Some(ref file) = overrides.log_file {
            self.log.file = Some(file.clone());
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        if self.packet_size == 0 {
            anyhow::bail!("packet_size must be > 0");
        }

        if self.recv_queue_cap == 0 {
            anyhow::bail!("recv_queue_cap must be > 0");
        }

        if self.fc_lower > self.fc_upper {
            anyhow::bail!(
                "fc_lower ({}) cannot exceed fc_upper ({})",
                self.fc_lower,
                self.fc_upper
            );
        }

        if self.fc_upper > self.recv_queue_cap {
            anyhow::bail!(
                "fc_upper ({}) cannot exceed recv_queue_cap ({})",
                self.fc_upper,
                self.recv_queue_cap
            );
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log.level.as_str()) {
            anyhow::bail!(
                "log.level must be one of {:?}, got: {}",
                valid_levels,
                self.log.level
            );
        }

        if let Some(ref tls) = self.tls {
            tls.validate()?;
        }

        Ok(())
    }
}
