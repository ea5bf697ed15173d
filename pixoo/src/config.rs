/*!
Configuration management for the pixoo tool.
*/

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub connection: ConnectionConfig,
    pub playback: PlaybackConfig,
    pub transport: TransportConfig,
}

impl AppConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// Load the file if it exists, defaults otherwise
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::new())
        }
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize config to TOML")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }
}

/// The display being driven
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Bluetooth MAC address, overridable with `--address`
    pub address: String,

    /// Side length of the square display in pixels
    pub size: usize,

    /// Brightness percentage applied after connecting
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            size: pixoo_codec::protocol::DEFAULT_SIZE,
            brightness: None,
        }
    }
}

/// What a write does while the session is disconnected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Drop the frame and report success
    #[default]
    DropSilently,
    /// Fail with a not-connected error
    FailFast,
}

/// Connection retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub write_policy: WritePolicy,
}

impl ConnectionConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 500,
            write_policy: WritePolicy::DropSilently,
        }
    }
}

/// Playback and animation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Frame step for animations built from stills
    pub default_speed_ms: u16,

    /// Largest animation payload per chunk
    pub chunk_payload: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_speed_ms: pixoo_codec::protocol::DEFAULT_SPEED_MS,
            chunk_payload: pixoo_codec::protocol::MAX_CHUNK_PAYLOAD,
        }
    }
}

/// Paired device table for the RFCOMM transport
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub devices: Vec<DeviceEntry>,
}

/// One paired device and the RFCOMM node it is bound to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub name: String,
    pub address: String,

    /// Device node, `/dev/rfcomm<channel>` when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(default = "default_channel")]
    pub channel: u8,
}

fn default_channel() -> u8 {
    1
}
