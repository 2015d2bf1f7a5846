//! Configuration management for wlbridge
//!
//! This module handles loading, parsing, and validating configuration
//! from TOML files. Every section is optional; a missing file section
//! falls back to its defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::registry::MirroredInterface;
use crate::transport::DEFAULT_BUFFER_SIZE;

/// Smallest accepted channel send size.
pub const MIN_SEND_SIZE: usize = 512;
/// Largest accepted channel send size.
pub const MAX_SEND_SIZE: usize = 65536;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Main configuration struct containing all proxy settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ProxyConfig {
    /// Guest-facing settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Host compositor connection
    #[serde(default)]
    pub host: HostConfig,

    /// Transport channel limits
    #[serde(default)]
    pub transport: TransportConfig,

    /// Which allow-listed interfaces guests see
    #[serde(default)]
    pub mirror: MirrorConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Guest socket name; picked automatically when absent
    pub socket: Option<String>,

    /// Use the host socket directly instead of relaying through the channel
    pub direct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HostConfig {
    /// Host compositor socket name or absolute path
    #[serde(default)]
    pub display: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    /// Largest single send through the channel (bytes)
    pub max_send_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MirrorConfig {
    /// Allow-listed interfaces to hide from guests
    #[serde(default)]
    pub disabled_interfaces: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of trace, debug, info, warn, error
    pub level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            socket: None,
            direct: true,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_send_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl HostConfig {
    /// The configured display, or `$WAYLAND_DISPLAY`.
    pub fn resolve_display(&self) -> Option<String> {
        self.display
            .clone()
            .or_else(|| std::env::var("WAYLAND_DISPLAY").ok())
    }
}

impl MirrorConfig {
    /// Disabled interfaces that are on the allow-list.
    pub fn disabled(&self) -> Vec<MirroredInterface> {
        self.disabled_interfaces
            .iter()
            .filter_map(|name| MirroredInterface::from_name(name))
            .collect()
    }
}

impl ProxyConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Expand ~ to home directory
        let expanded_path = if path.to_string_lossy().starts_with('~') {
            let home = std::env::var("HOME").context("Failed to get HOME environment variable")?;
            Path::new(&home).join(path.strip_prefix("~").unwrap_or(path))
        } else {
            path.to_path_buf()
        };

        let contents = fs::read_to_string(&expanded_path)
            .with_context(|| format!("Failed to read config file: {}", expanded_path.display()))?;

        let config: ProxyConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", expanded_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let size = self.transport.max_send_size;
        if !(MIN_SEND_SIZE..=MAX_SEND_SIZE).contains(&size) {
            anyhow::bail!(
                "Invalid max_send_size {}: must be between {} and {}",
                size,
                MIN_SEND_SIZE,
                MAX_SEND_SIZE
            );
        }
        if size % 4 != 0 {
            anyhow::bail!("Invalid max_send_size {}: must be a multiple of 4", size);
        }

        for name in &self.mirror.disabled_interfaces {
            if MirroredInterface::from_name(name).is_none() {
                anyhow::bail!("Unknown interface in disabled_interfaces: {}", name);
            }
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            anyhow::bail!("Invalid logging level: {}", self.logging.level);
        }

        if let Some(socket) = &self.general.socket {
            if socket.is_empty() || socket.contains('/') {
                anyhow::bail!("Invalid socket name: {:?}", socket);
            }
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, contents).context("Failed to write configuration file")?;

        Ok(())
    }
}
