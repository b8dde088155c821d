//! Authenticator configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

/// Authenticator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Troubleshooting is offered once interruptions exceed this count
    pub troubleshooting_threshold: u32,

    /// Whether interruptions are tracked for troubleshooting from the start
    pub troubleshooting_enabled: bool,

    /// Whether the user may cancel a running attempt
    pub allow_user_cancellation: bool,

    /// Hold after an unclassified pipeline fault (milliseconds)
    pub fault_debounce_ms: u64,

    /// Delay before re-subscribing to card discovery after it ends or fails (milliseconds)
    pub discovery_retry_ms: u64,

    /// Capacity of the transition broadcast channel
    pub transition_buffer: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            troubleshooting_threshold: 2,
            troubleshooting_enabled: false,
            allow_user_cancellation: true,
            fault_debounce_ms: 1000,
            discovery_retry_ms: 500,
            transition_buffer: 64,
        }
    }
}

impl AuthConfig {
    pub fn fault_debounce(&self) -> Duration {
        Duration::from_millis(self.fault_debounce_ms)
    }

    pub fn discovery_retry(&self) -> Duration {
        Duration::from_millis(self.discovery_retry_ms)
    }

    /// Check values the runtime cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.transition_buffer == 0 {
            return Err(AuthError::Config(
                "transition_buffer must be at least 1".to_string(),
            ));
        }
        if self.discovery_retry_ms == 0 {
            return Err(AuthError::Config(
                "discovery_retry_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
