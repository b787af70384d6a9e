//! Configuration loading
//!
//! YAML file for everything structural, `.env` for credentials. Loaded
//! once at startup and validated before anything connects.

use std::path::Path;

use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use crate::engine::decision::{GuardParams, MarketParams};
use crate::engine::reorder::ReorderParams;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub ws_url: String,
    #[serde(default = "default_readiness_timeout_secs")]
    pub readiness_timeout_secs: u64,
    #[serde(default = "default_stable_connection_secs")]
    pub stable_connection_secs: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

fn default_readiness_timeout_secs() -> u64 {
    15
}

fn default_stable_connection_secs() -> u64 {
    30
}

fn default_max_backoff_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    // Credentials come from .env, never from the YAML file.
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(skip)]
    pub api_passphrase: Option<String>,
}

fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    #[serde(default = "default_submission_workers")]
    pub submission_workers: usize,
}

fn default_reconcile_interval_secs() -> u64 {
    10
}

fn default_submission_workers() -> usize {
    10
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: default_reconcile_interval_secs(),
            submission_workers: default_submission_workers(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MakerConfig {
    /// Asset ids to quote on.
    pub assets: Vec<String>,
    pub feed: FeedConfig,
    pub api: ApiConfig,
    pub market: MarketParams,
    pub guard: GuardParams,
    #[serde(default)]
    pub reorder: ReorderParams,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl MakerConfig {
    /// Load from a YAML file, overlay credentials from the environment,
    /// and validate.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: MakerConfig = serde_yaml::from_str(&contents)?;
        config.load_env();
        config.validate()?;
        Ok(config)
    }

    fn load_env(&mut self) {
        self.api.api_key = std::env::var("API_KEY").ok();
        self.api.api_passphrase = std::env::var("API_PASSPHRASE").ok();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.assets.is_empty() {
            return Err(ConfigError::Validation("assets must not be empty".into()));
        }
        if !self.feed.ws_url.starts_with("ws://") && !self.feed.ws_url.starts_with("wss://") {
            return Err(ConfigError::Validation(format!(
                "feed.ws_url must be a ws:// or wss:// URL, got '{}'",
                self.feed.ws_url
            )));
        }
        if self.api.base_url.is_empty() {
            return Err(ConfigError::Validation("api.base_url must be set".into()));
        }
        if self.market.tick_size <= Decimal::ZERO {
            return Err(ConfigError::Validation(
                "market.tick_size must be positive".into(),
            ));
        }
        if self.market.max_incentive_spread < Decimal::ZERO {
            return Err(ConfigError::Validation(
                "market.max_incentive_spread must not be negative".into(),
            ));
        }
        if self.market.min_order_size < Decimal::ZERO {
            return Err(ConfigError::Validation(
                "market.min_order_size must not be negative".into(),
            ));
        }
        if self.guard.max_imbalance_ratio < Decimal::ONE {
            return Err(ConfigError::Validation(
                "guard.max_imbalance_ratio must be at least 1".into(),
            ));
        }
        let fractions = &self.reorder.split_fractions;
        if fractions.is_empty() || fractions.iter().any(|f| *f <= Decimal::ZERO) {
            return Err(ConfigError::Validation(
                "reorder.split_fractions must be non-empty and positive".into(),
            ));
        }
        let sum: Decimal = fractions.iter().sum();
        if sum != Decimal::ONE {
            return Err(ConfigError::Validation(format!(
                "reorder.split_fractions must sum to 1, got {}",
                sum
            )));
        }
        if self.engine.submission_workers == 0 {
            return Err(ConfigError::Validation(
                "engine.submission_workers must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
