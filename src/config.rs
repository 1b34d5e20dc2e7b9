//! Configuration from `STUDY_*` environment variables

use crate::protocol::{Method, ProtocolError};
use crate::state_machine::SessionContext;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BRIDGE_URL: &str = "ws://localhost:8765/ui";
pub const DEFAULT_CHAIN_DELAY_MS: u64 = 500;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("STUDY_METHOD: {0}")]
    Method(#[from] ProtocolError),
    #[error("STUDY_CHAIN_DELAY_MS must be a whole number of milliseconds, got {0:?}")]
    ChainDelay(String),
    #[error("STUDY_BRIDGE_URL must start with ws:// or wss://, got {0:?}")]
    BridgeUrl(String),
}

/// Runtime configuration for the study client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub bridge_url: String,
    pub method: Method,
    pub chain_delay: Duration,
    pub result_dir: PathBuf,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bridge_url: DEFAULT_BRIDGE_URL.to_string(),
            method: Method::default(),
            chain_delay: Duration::from_millis(DEFAULT_CHAIN_DELAY_MS),
            result_dir: PathBuf::from("."),
        }
    }
}

impl BridgeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; unset or blank values fall
    /// back to the defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();

        if let Some(url) = get("STUDY_BRIDGE_URL") {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(ConfigError::BridgeUrl(url));
            }
            config.bridge_url = url;
        }
        if let Some(method) = get("STUDY_METHOD") {
            config.method = method.parse()?;
        }
        if let Some(delay) = get("STUDY_CHAIN_DELAY_MS") {
            let millis: u64 = delay.parse().map_err(|_| ConfigError::ChainDelay(delay))?;
            config.chain_delay = Duration::from_millis(millis);
        }
        if let Some(dir) = get("STUDY_RESULT_DIR") {
            config.result_dir = PathBuf::from(dir);
        }

        Ok(config)
    }

    /// Session context for this configuration, without a participant yet
    pub fn session_context(&self) -> SessionContext {
        let mut ctx = SessionContext::new(self.method);
        ctx.chain_delay = self.chain_delay;
        ctx
    }
}
