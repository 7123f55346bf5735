//! Runtime configuration for the coordination core.
//!
//! Loaded from TOML; every field has a default so an empty file (or no
//! file at all) is valid. Applications typically layer CLI flags on top.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, SwarmError};

/// Tunables for a swarm process.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SwarmConfig {
    /// Status display period in seconds; `0` disables the display.
    pub display_interval_secs: f64,
    /// Chunk size for wire buffers.
    pub buffer_chunk_size: usize,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        SwarmConfig {
            display_interval_secs: 1.0,
            buffer_chunk_size: swarm_wire::DEFAULT_CHUNK_SIZE,
        }
    }
}

impl SwarmConfig {
    /// Parses a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: SwarmConfig =
            toml::from_str(text).map_err(|e| SwarmError::Custom(format!("bad config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SwarmError::Custom(format!("cannot read config: {e}")))?;
        Self::from_toml(&text)
    }

    /// The display period, `None` when the display is disabled.
    pub fn display_interval(&self) -> Option<Duration> {
        (self.display_interval_secs > 0.0)
            .then(|| Duration::from_secs_f64(self.display_interval_secs))
    }

    fn validate(&self) -> Result<()> {
        if self.display_interval_secs < 0.0 || !self.display_interval_secs.is_finite() {
            return Err(SwarmError::Custom(
                "display_interval_secs must be finite and non-negative".into(),
            ));
        }
        if self.buffer_chunk_size == 0 {
            return Err(SwarmError::Custom(
                "buffer_chunk_size must be positive".into(),
            ));
        }
        Ok(())
    }
}
