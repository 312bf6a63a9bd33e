//! Read-only configuration from environment variables.

use super::provider::ConfigProvider;
use super::{ConfigError, ConfigResult};

/// Prefix used by [`BrokerConfig`](super::BrokerConfig) lookups.
pub const ENV_PREFIX: &str = "WALLET_BROKER_";

/// Maps `hardware.max_retries` to `{PREFIX}HARDWARE_MAX_RETRIES`.
///
/// The environment is never written at runtime.
#[derive(Debug, Clone)]
pub struct EnvConfigProvider {
    prefix: String,
}

impl EnvConfigProvider {
    pub fn new() -> Self {
        Self::prefixed(ENV_PREFIX)
    }

    pub fn prefixed(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn env_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.to_uppercase().replace('.', "_"))
    }

    fn read_only() -> ConfigError {
        ConfigError::Provider {
            message: "environment is read-only".into(),
        }
    }
}

impl Default for EnvConfigProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ConfigProvider for EnvConfigProvider {
    fn name(&self) -> &str {
        "env"
    }

    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>> {
        match std::env::var(self.env_key(key)) {
            Ok(value) => Ok(Some(value)),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(e) => Err(ConfigError::Env(e)),
        }
    }

    async fn set_raw(&self, _key: &str, _value: &str) -> ConfigResult<()> {
        Err(Self::read_only())
    }

    async fn delete(&self, _key: &str) -> ConfigResult<bool> {
        Err(Self::read_only())
    }

    /// Returns lowercased variable names with the prefix stripped. Dots and
    /// underscores are indistinguishable in the environment, so keys come
    /// back with underscores.
    async fn list_keys(&self, prefix: &str) -> ConfigResult<Vec<String>> {
        let env_prefix = self.env_key(prefix);
        let mut keys: Vec<String> = std::env::vars()
            .filter(|(k, _)| k.starts_with(&env_prefix))
            .map(|(k, _)| k[self.prefix.len()..].to_lowercase())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_key() {
        let provider = EnvConfigProvider::new();
        assert_eq!(
            provider.env_key("hardware.max_retries"),
            "WALLET_BROKER_HARDWARE_MAX_RETRIES"
        );
        assert_eq!(provider.env_key("default_chain_id"), "WALLET_BROKER_DEFAULT_CHAIN_ID");
    }

    #[tokio::test]
    async fn test_get_and_list() {
        let provider = EnvConfigProvider::prefixed("WALLET_BROKER_TEST_ENV_");

        // SAFETY: test-only, unique variable name
        unsafe { std::env::set_var("WALLET_BROKER_TEST_ENV_NOTIFY_ON_CONNECT", "false") };
        assert_eq!(
            provider.get_raw("notify_on_connect").await.unwrap().as_deref(),
            Some("false")
        );
        assert_eq!(
            provider.list_keys("notify").await.unwrap(),
            vec!["notify_on_connect".to_string()]
        );
        unsafe { std::env::remove_var("WALLET_BROKER_TEST_ENV_NOTIFY_ON_CONNECT") };

        assert!(provider.get_raw("notify_on_connect").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_only() {
        let provider = EnvConfigProvider::new();
        assert!(provider.set_raw("key", "value").await.is_err());
        assert!(provider.delete("key").await.is_err());
    }
}
