//! Configuration handling for the snipe service.
//!
//! Settings come from a YAML file, then environment variables override
//! individual values. A missing or unparsable file falls back to defaults.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use snipe_poll::{GiftTarget, PollConfig};
use snipe_wire::SessionParameters;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Snipe service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnipeConfig {
    /// Platform application id
    pub api_id: i32,
    /// Platform application hash
    pub api_hash: String,
    /// Address of the client bridge
    pub bridge_addr: SocketAddr,
    /// Local database directory of the platform client
    pub database_directory: String,
    /// Chat whose private messages are accepted as commands
    pub operator_chat_id: Option<i64>,
    /// JSON file with the upgrade race targets
    pub targets_file: PathBuf,
    /// Target watched by the `status` command
    pub status_target: Option<GiftTarget>,
    /// Status poll period in milliseconds
    pub status_interval_ms: u64,
    /// Race period used by the chat `upg` command, in milliseconds
    pub race_interval_ms: u64,
    /// Age in milliseconds after which an unanswered status poll is resent
    pub in_flight_timeout_ms: u64,
    /// Buy newly listed limited gifts during `buy`
    pub purchase: bool,
}

impl Default for SnipeConfig {
    fn default() -> Self {
        Self {
            api_id: 0,
            api_hash: String::new(),
            bridge_addr: SocketAddr::from(([127, 0, 0, 1], 7441)),
            database_directory: "snipe_td".to_string(),
            operator_chat_id: None,
            targets_file: PathBuf::from("gifts.json"),
            status_target: None,
            status_interval_ms: 25,
            race_interval_ms: 25,
            in_flight_timeout_ms: 2000,
            purchase: false,
        }
    }
}

impl SnipeConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Self {
        let path = config_path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => match serde_yaml::from_str::<SnipeConfig>(&content) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config file {:?}: {}, using defaults", path, e);
                    Self::default()
                }
            },
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", path);
                Self::default()
            }
        };

        config.apply_environment_overrides(|key| std::env::var(key).ok());

        info!(
            "Final snipe configuration: bridge={}, targets={:?}, operator_chat={:?}",
            config.bridge_addr, config.targets_file, config.operator_chat_id
        );
        config
    }

    /// Apply environment variable overrides read through `var`
    fn apply_environment_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(api_id) = var("TG_API_ID") {
            match api_id.parse::<i32>() {
                Ok(id) => self.api_id = id,
                Err(_) => warn!("Ignoring invalid TG_API_ID {:?}", api_id),
            }
        }

        if let Some(api_hash) = var("TG_API_HASH") {
            self.api_hash = api_hash;
        }

        if let Some(addr) = var("SNIPE_BRIDGE_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(addr) => {
                    self.bridge_addr = addr;
                    info!("Bridge address overridden by environment: {}", addr);
                }
                Err(_) => warn!("Ignoring invalid SNIPE_BRIDGE_ADDR {:?}", addr),
            }
        }

        if let Some(chat) = var("SNIPE_OPERATOR_CHAT_ID") {
            match chat.parse::<i64>() {
                Ok(id) => {
                    self.operator_chat_id = Some(id);
                    info!("Operator chat overridden by environment: {}", id);
                }
                Err(_) => warn!("Ignoring invalid SNIPE_OPERATOR_CHAT_ID {:?}", chat),
            }
        }
    }

    /// Fail when the platform credentials are missing
    pub fn validate(&self) -> Result<()> {
        if self.api_id == 0 || self.api_hash.is_empty() {
            bail!("TG_API_ID or TG_API_HASH not set in environment or config");
        }
        Ok(())
    }

    /// Session initialization parameters
    pub fn session_parameters(&self) -> SessionParameters {
        SessionParameters {
            database_directory: self.database_directory.clone(),
            api_id: self.api_id,
            api_hash: self.api_hash.clone(),
            ..SessionParameters::default()
        }
    }

    /// Polling settings
    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            status_target: self.status_target.clone(),
            status_interval: Duration::from_millis(self.status_interval_ms),
            in_flight_timeout: Duration::from_millis(self.in_flight_timeout_ms),
            ..PollConfig::default()
        }
    }

    /// Default race period
    pub fn race_interval(&self) -> Duration {
        Duration::from_millis(self.race_interval_ms)
    }
}
