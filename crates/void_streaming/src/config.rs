//! Streaming manager configuration
//!
//! Configuration can be built in code or read from TOML:
//!
//! ```toml
//! channel_count = 4
//! max_memory = 268435456  # 256MB
//! event_capacity = 1024
//! thread_name_prefix = "stream"
//! ```
//!
//! Every field is optional; missing fields take their defaults.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default number of channel threads
pub const DEFAULT_CHANNEL_COUNT: usize = 4;

/// Default memory budget (256 MB)
pub const DEFAULT_MAX_MEMORY: usize = 256 * 1024 * 1024;

/// Default number of buffered events
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Streaming manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Number of channel worker threads, fixed for the manager's lifetime
    pub channel_count: usize,
    /// Memory budget in bytes, reported in statistics
    pub max_memory: usize,
    /// Bound of the event queue (0 disables events)
    pub event_capacity: usize,
    /// Prefix for channel thread names
    pub thread_name_prefix: String,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            channel_count: DEFAULT_CHANNEL_COUNT,
            max_memory: DEFAULT_MAX_MEMORY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            thread_name_prefix: "stream".to_string(),
        }
    }
}

impl StreamingConfig {
    /// Default configuration with a given channel count
    pub fn with_channels(channel_count: usize) -> Self {
        Self {
            channel_count,
            ..Self::default()
        }
    }

    /// Set the memory budget
    pub fn max_memory(mut self, bytes: usize) -> Self {
        self.max_memory = bytes;
        self
    }

    /// Set the event queue bound
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Parse and validate a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: StreamingConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Check invariants
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_count == 0 {
            return Err(ConfigError::Validation(
                "channel_count must be at least 1".to_string(),
            ));
        }
        if self.thread_name_prefix.is_empty() {
            return Err(ConfigError::Validation(
                "thread_name_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
