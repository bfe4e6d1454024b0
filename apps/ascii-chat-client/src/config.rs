//! Client configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Client configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server hostname or IP to connect to.
    /// Override: `ASCII_CHAT_HOST`
    pub host: String,

    /// Server port to connect to.
    /// Override: `ASCII_CHAT_PORT`
    pub port: u16,

    /// Whether to capture and stream microphone audio.
    pub audio_enabled: bool,

    /// Client-side rendered frame rate limit.
    pub fps_limit: u32,

    /// Render exactly one frame after `snapshot_delay_secs`, then exit.
    pub snapshot_mode: bool,

    /// Delay before exiting in snapshot mode.
    pub snapshot_delay_secs: u64,

    /// Reconnect attempts: `-1` unlimited, `0` none, `N>0` bounded.
    pub reconnect_attempts: i32,

    /// Whether to require and use end-to-end encryption.
    pub encrypt_enabled: bool,

    /// Opus encoder bitrate, bits per second.
    pub opus_bitrate: u32,

    /// zstd compression level applied to outgoing envelopes.
    pub compression_level: i32,

    /// Interval between keepalive `PING` envelopes.
    pub keepalive_interval_secs: u64,

    /// Directory for persistent state (known_hosts, identity key).
    /// Override: `ASCII_CHAT_DATA_DIR`
    pub data_dir: Option<PathBuf>,

    /// Advertise/bind IP override, unused by the client beyond diagnostics.
    pub advertise_ip: Option<IpAddr>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 27224,
            audio_enabled: true,
            fps_limit: 30,
            snapshot_mode: false,
            snapshot_delay_secs: 0,
            reconnect_attempts: 5,
            encrypt_enabled: true,
            opus_bitrate: ascii_core::protocol_constants::DEFAULT_OPUS_BITRATE,
            compression_level: 3,
            keepalive_interval_secs: ascii_core::protocol_constants::DEFAULT_KEEPALIVE_INTERVAL_SECS,
            data_dir: None,
            advertise_ip: None,
        }
    }
}

impl ClientConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ASCII_CHAT_HOST") {
            self.host = val;
        }
        if let Ok(val) = std::env::var("ASCII_CHAT_PORT") {
            if let Ok(port) = val.parse() {
                self.port = port;
            }
        }
        if let Ok(val) = std::env::var("ASCII_CHAT_RECONNECT_ATTEMPTS") {
            if let Ok(attempts) = val.parse() {
                self.reconnect_attempts = attempts;
            }
        }
        // Note: ASCII_CHAT_DATA_DIR is handled by clap via #[arg(env = ...)] in main.rs.
    }

    /// Converts to ascii-core's `ConfigSnapshot` type.
    pub fn to_core_config(&self) -> ascii_core::ConfigSnapshot {
        ascii_core::ConfigSnapshot {
            audio_enabled: self.audio_enabled,
            fps_limit: self.fps_limit,
            snapshot_mode: self.snapshot_mode,
            snapshot_delay_secs: self.snapshot_delay_secs,
            reconnect_attempts: self.reconnect_attempts,
            encrypt_enabled: self.encrypt_enabled,
            address: self.host.clone(),
            port: self.port,
            opus_bitrate: self.opus_bitrate,
            compression_level: self.compression_level,
            keepalive_interval_secs: self.keepalive_interval_secs,
            advertise_ip: self.advertise_ip,
            ..Default::default()
        }
    }
}
