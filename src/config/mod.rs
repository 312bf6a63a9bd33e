//! Broker configuration.
//!
//! Values come from pluggable [`ConfigProvider`]s. The usual setup layers the
//! environment over code-defined defaults:
//!
//! ```rust,no_run
//! use wallet_broker::config::{BrokerConfig, ConfigBuilder, MemoryConfigProvider};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = ConfigBuilder::new()
//!     .env()
//!     .memory(MemoryConfigProvider::from_pairs([("pending_on_disconnect", "cancel")]))
//!     .build();
//! let config = BrokerConfig::load(&provider).await?;
//! # Ok(())
//! # }
//! ```

mod composite;
mod env;
mod memory;
mod provider;

pub use composite::CompositeConfigProvider;
pub use env::{ENV_PREFIX, EnvConfigProvider};
pub use memory::MemoryConfigProvider;
pub use provider::{ConfigProvider, ConfigProviderExt};

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::networks::INITIAL_CHAIN_ID;
use crate::resilience::RetryConfig;

const MAX_HARDWARE_RETRIES: u32 = 20;

pub mod keys {
    pub const DEFAULT_CHAIN_ID: &str = "default_chain_id";
    pub const PENDING_ON_DISCONNECT: &str = "pending_on_disconnect";
    pub const NOTIFY_ON_CONNECT: &str = "notify_on_connect";
    pub const HARDWARE_MAX_RETRIES: &str = "hardware.max_retries";
    pub const HARDWARE_INITIAL_DELAY_MS: &str = "hardware.initial_delay_ms";
    pub const HARDWARE_MAX_DELAY_MS: &str = "hardware.max_delay_ms";
    pub const HARDWARE_BACKOFF_FACTOR: &str = "hardware.backoff_factor";
    pub const HARDWARE_JITTER: &str = "hardware.jitter";
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Key not found: {key}")]
    NotFound { key: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Environment error: {0}")]
    Env(#[from] std::env::VarError),

    #[error("Provider error: {message}")]
    Provider { message: String },

    #[error("{0}")]
    ValidationErrors(ValidationErrors),
}

#[derive(Debug)]
pub struct ValidationErrors(pub Vec<ConfigError>);

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msgs: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        write!(f, "Validation failed: {}", msgs.join("; "))
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// What happens to a port's pending approvals when the port disconnects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisconnectPolicy {
    /// Leave them pending; a later reply to the dead port is dropped.
    #[default]
    Keep,
    /// Reject them with a disconnected error.
    Cancel,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BrokerConfig {
    pub default_chain_id: u64,
    pub pending_on_disconnect: DisconnectPolicy,
    /// Push a state snapshot to a port as soon as it connects.
    pub notify_on_connect: bool,
    pub hardware_retry: RetryConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            default_chain_id: INITIAL_CHAIN_ID,
            pending_on_disconnect: DisconnectPolicy::Keep,
            notify_on_connect: true,
            hardware_retry: RetryConfig::default(),
        }
    }
}

impl BrokerConfig {
    /// Reads every key from `provider`, falling back to defaults for unset
    /// keys, then validates the result.
    pub async fn load(provider: &dyn ConfigProvider) -> ConfigResult<Self> {
        let defaults = Self::default();
        let retry = &defaults.hardware_retry;

        let config = Self {
            default_chain_id: provider
                .get(keys::DEFAULT_CHAIN_ID)
                .await?
                .unwrap_or(defaults.default_chain_id),
            pending_on_disconnect: provider
                .get(keys::PENDING_ON_DISCONNECT)
                .await?
                .unwrap_or(defaults.pending_on_disconnect),
            notify_on_connect: provider
                .get(keys::NOTIFY_ON_CONNECT)
                .await?
                .unwrap_or(defaults.notify_on_connect),
            hardware_retry: RetryConfig {
                max_retries: provider
                    .get(keys::HARDWARE_MAX_RETRIES)
                    .await?
                    .unwrap_or(retry.max_retries),
                initial_delay: provider
                    .get::<u64>(keys::HARDWARE_INITIAL_DELAY_MS)
                    .await?
                    .map(Duration::from_millis)
                    .unwrap_or(retry.initial_delay),
                max_delay: provider
                    .get::<u64>(keys::HARDWARE_MAX_DELAY_MS)
                    .await?
                    .map(Duration::from_millis)
                    .unwrap_or(retry.max_delay),
                factor: provider
                    .get(keys::HARDWARE_BACKOFF_FACTOR)
                    .await?
                    .unwrap_or(retry.factor),
                jitter: provider
                    .get(keys::HARDWARE_JITTER)
                    .await?
                    .unwrap_or(retry.jitter),
            },
        };

        config.validate()?;
        tracing::debug!(provider = provider.name(), config = ?config, "Broker config loaded");
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let retry = &self.hardware_retry;

        if self.default_chain_id == 0 {
            errors.push(invalid(keys::DEFAULT_CHAIN_ID, "must be non-zero"));
        }
        if retry.max_retries > MAX_HARDWARE_RETRIES {
            errors.push(invalid(
                keys::HARDWARE_MAX_RETRIES,
                format!("must be at most {}", MAX_HARDWARE_RETRIES),
            ));
        }
        if retry.max_delay < retry.initial_delay {
            errors.push(invalid(
                keys::HARDWARE_MAX_DELAY_MS,
                "must not be below the initial delay",
            ));
        }
        if retry.factor.is_nan() || retry.factor < 1.0 {
            errors.push(invalid(keys::HARDWARE_BACKOFF_FACTOR, "must be >= 1.0"));
        }
        if !(0.0..=1.0).contains(&retry.jitter) {
            errors.push(invalid(keys::HARDWARE_JITTER, "must be within 0.0..=1.0"));
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::ValidationErrors(ValidationErrors(errors))),
        }
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

/// Fluent construction of a [`CompositeConfigProvider`].
#[derive(Default)]
pub struct ConfigBuilder {
    providers: Vec<Box<dyn ConfigProvider>>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment variables under [`ENV_PREFIX`].
    pub fn env(self) -> Self {
        self.provider(Box::new(EnvConfigProvider::new()))
    }

    pub fn env_with_prefix(self, prefix: &str) -> Self {
        self.provider(Box::new(EnvConfigProvider::prefixed(prefix)))
    }

    pub fn memory(self, provider: MemoryConfigProvider) -> Self {
        self.provider(Box::new(provider))
    }

    pub fn provider(mut self, provider: Box<dyn ConfigProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn build(self) -> CompositeConfigProvider {
        let mut composite = CompositeConfigProvider::new();
        for provider in self.providers {
            composite.add_provider(provider);
        }
        composite
    }
}
