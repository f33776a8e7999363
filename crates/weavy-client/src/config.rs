//! Widget configuration, loadable from RON.
//!
//! ```ron
//! (
//!     url: "https://acme.weavy.io",
//!     bubble_limit: 12,
//!     jwt: Some("eyJhbGciOi..."),
//! )
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::*;

/// Error loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetConfig {
    /// Base URL of the Weavy server; keys the authentication registry.
    pub url: String,
    pub namespace: String,
    pub bubble_limit: usize,
    pub preload_delay_ms: u64,
    pub preload_timeout_ms: u64,
    pub close_transition_ms: u64,
    /// Mobile form factor; suppresses preloading.
    pub is_mobile: bool,
    /// Static JWT for single sign-on.
    pub jwt: Option<String>,
    /// User id the host page already knows is signed in.
    pub ambient_user_id: Option<i64>,
    pub leader_heartbeat_ms: u64,
    pub leader_lease_ms: u64,
    pub bubbles_endpoint: String,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.into(),
            namespace: DEFAULT_NAMESPACE.into(),
            bubble_limit: DEFAULT_BUBBLE_LIMIT,
            preload_delay_ms: DEFAULT_PRELOAD_DELAY.as_millis() as u64,
            preload_timeout_ms: DEFAULT_PRELOAD_TIMEOUT.as_millis() as u64,
            close_transition_ms: DEFAULT_CLOSE_TRANSITION.as_millis() as u64,
            is_mobile: false,
            jwt: None,
            ambient_user_id: None,
            leader_heartbeat_ms: DEFAULT_LEADER_HEARTBEAT.as_millis() as u64,
            leader_lease_ms: DEFAULT_LEADER_LEASE.as_millis() as u64,
            bubbles_endpoint: DEFAULT_BUBBLES_ENDPOINT.into(),
        }
    }
}

impl WidgetConfig {
    pub fn from_ron_str(text: &str) -> Result<Self, ConfigError> {
        let config: WidgetConfig = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron_str(&text)
    }

    /// Default location: `<config_dir>/weavy/widget.ron`.
    pub fn default_path() -> Option<std::path::PathBuf> {
        dirs::config_dir().map(|p| p.join("weavy").join("widget.ron"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Invalid("url must not be empty".into()));
        }
        if self.bubble_limit == 0 {
            return Err(ConfigError::Invalid("bubble_limit must be at least 1".into()));
        }
        if self.leader_lease_ms <= self.leader_heartbeat_ms {
            return Err(ConfigError::Invalid(
                "leader_lease_ms must exceed leader_heartbeat_ms".into(),
            ));
        }
        Ok(())
    }

    /// Host part of `url`, used in persistence keys.
    pub fn host(&self) -> String {
        let trimmed = self.url.trim();
        let rest = trimmed.split_once("://").map(|(_, r)| r).unwrap_or(trimmed);
        rest.split(['/', '?', '#']).next().unwrap_or(rest).to_string()
    }

    pub fn preload_delay(&self) -> Duration {
        Duration::from_millis(self.preload_delay_ms)
    }

    pub fn preload_timeout(&self) -> Duration {
        Duration::from_millis(self.preload_timeout_ms)
    }

    pub fn close_transition(&self) -> Duration {
        Duration::from_millis(self.close_transition_ms)
    }

    pub fn leader_heartbeat(&self) -> Duration {
        Duration::from_millis(self.leader_heartbeat_ms)
    }

    pub fn leader_lease(&self) -> Duration {
        Duration::from_millis(self.leader_lease_ms)
    }
}
