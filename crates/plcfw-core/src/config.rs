//! Loader configuration.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::constants::*;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("chunk_size must be a non-zero multiple of 4, got {0}")]
    BadChunkSize(usize),

    #[error("image_packet_size must be a non-zero multiple of 4 no larger than chunk_size, got {0}")]
    BadPacketSize(usize),

    #[error("{0} must be at least 1")]
    ZeroAttempts(&'static str),
}

/// Tunables of one firmware load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Bytes per `write_memory` chunk.
    pub chunk_size: usize,
    /// Bytes per CPU image data packet.
    pub image_packet_size: usize,
    /// Timed-out writes of the RMII timing register retried after the first.
    pub rmii_write_retries: u32,
    /// Readiness queries after the control processor is started.
    pub poll_attempts: u32,
    pub poll_interval_ms: u64,
    pub query_timeout_ms: u64,
    pub write_timeout_ms: u64,
    /// Bytes of user configuration sent to the device.
    pub user_config_size: u32,
    pub ether_type: u16,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            image_packet_size: DEFAULT_IMAGE_PACKET_SIZE,
            rmii_write_retries: DEFAULT_RMII_WRITE_RETRIES,
            poll_attempts: DEFAULT_POLL_ATTEMPTS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            query_timeout_ms: DEFAULT_QUERY_TIMEOUT_MS,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
            user_config_size: DEFAULT_USER_CONFIG_SIZE,
            ether_type: PLC_ETHER_TYPE,
        }
    }
}

impl LoaderConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: LoaderConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 || self.chunk_size % 4 != 0 {
            return Err(ConfigError::BadChunkSize(self.chunk_size));
        }
        if self.image_packet_size == 0
            || self.image_packet_size % 4 != 0
            || self.image_packet_size > self.chunk_size
        {
            return Err(ConfigError::BadPacketSize(self.image_packet_size));
        }
        if self.poll_attempts == 0 {
            return Err(ConfigError::ZeroAttempts("poll_attempts"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}
