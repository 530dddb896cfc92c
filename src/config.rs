//! Pipeline configuration
//!
//! Sizing knobs for the ring buffers, control channels, and worker timing.
//! Values can come from a TOML fragment or the built-in defaults. The defaults
//! mirror the transfer quanta the pipeline was tuned with: an 8 KiB-sample
//! network buffer and a 2 KiB-sample transfer buffer, both in bytes of 16-bit
//! PCM.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

/// Streaming pipeline configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Network reader output buffer capacity in bytes (default: 16384)
    pub http_buffer_size: usize,

    /// Transfer buffer capacity in bytes, used by the decoder, mixer, and
    /// sink stages (default: 4096)
    pub transfer_buffer_size: usize,

    /// Command and event queue capacity in messages (default: 10)
    pub channel_capacity: usize,

    /// Worker command poll window in milliseconds (default: 10)
    ///
    /// Each worker iteration waits at most this long for a command before
    /// doing buffer-transfer work, so workers stay responsive to stop
    /// requests without busy-spinning.
    pub command_poll_interval_ms: u64,

    /// Maximum graceful-stop drain time in milliseconds (default: 3000)
    ///
    /// A worker that is still draining after this long hard-stops and
    /// discards the remainder, bounding shutdown latency.
    pub max_drain_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_buffer_size: 16384,
            transfer_buffer_size: 4096,
            channel_capacity: 10,
            command_poll_interval_ms: 10,
            max_drain_ms: 3000,
        }
    }
}

impl Config {
    /// Load configuration from a TOML string, validating the result
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// Validate sizing constraints
    ///
    /// Buffer capacities must be non-zero and hold a whole number of 16-bit
    /// samples; channel capacity must be non-zero.
    pub fn validate(&self) -> Result<()> {
        if self.http_buffer_size == 0 || self.http_buffer_size % 2 != 0 {
            return Err(Error::Config(format!(
                "http_buffer_size must be a non-zero even byte count, got {}",
                self.http_buffer_size
            )));
        }
        if self.transfer_buffer_size == 0 || self.transfer_buffer_size % 2 != 0 {
            return Err(Error::Config(format!(
                "transfer_buffer_size must be a non-zero even byte count, got {}",
                self.transfer_buffer_size
            )));
        }
        if self.channel_capacity == 0 {
            return Err(Error::Config("channel_capacity must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Command poll window as a Duration
    pub fn command_poll_interval(&self) -> Duration {
        Duration::from_millis(self.command_poll_interval_ms)
    }

    /// Graceful-stop drain bound as a Duration
    pub fn max_drain(&self) -> Duration {
        Duration::from_millis(self.max_drain_ms)
    }
}
