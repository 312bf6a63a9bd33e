//! Layered configuration: earlier providers win.

use super::ConfigResult;
use super::provider::ConfigProvider;

#[derive(Default)]
pub struct CompositeConfigProvider {
    providers: Vec<Box<dyn ConfigProvider>>,
}

impl CompositeConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a provider with lower priority than those already added.
    pub fn provider(mut self, provider: Box<dyn ConfigProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn add_provider(&mut self, provider: Box<dyn ConfigProvider>) {
        self.providers.push(provider);
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }
}

#[async_trait::async_trait]
impl ConfigProvider for CompositeConfigProvider {
    fn name(&self) -> &str {
        "composite"
    }

    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>> {
        for provider in &self.providers {
            if let Some(value) = provider.get_raw(key).await? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Writes go to the first provider that accepts them.
    async fn set_raw(&self, key: &str, value: &str) -> ConfigResult<()> {
        let mut last_err = None;
        for provider in &self.providers {
            match provider.set_raw(key, value).await {
                Ok(()) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn delete(&self, key: &str) -> ConfigResult<bool> {
        let mut deleted = false;
        for provider in &self.providers {
            if let Ok(true) = provider.delete(key).await {
                deleted = true;
            }
        }
        Ok(deleted)
    }

    async fn list_keys(&self, prefix: &str) -> ConfigResult<Vec<String>> {
        let mut keys = Vec::new();
        for provider in &self.providers {
            keys.extend(provider.list_keys(prefix).await?);
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

impl std::fmt::Debug for CompositeConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeConfigProvider")
            .field("providers", &self.provider_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnvConfigProvider, MemoryConfigProvider};

    #[tokio::test]
    async fn test_first_provider_wins() {
        let composite = CompositeConfigProvider::new()
            .provider(Box::new(MemoryConfigProvider::from_pairs([(
                "default_chain_id",
                "56",
            )])))
            .provider(Box::new(MemoryConfigProvider::from_pairs([
                ("default_chain_id", "1"),
                ("notify_on_connect", "false"),
            ])));

        assert_eq!(
            composite.get_raw("default_chain_id").await.unwrap().as_deref(),
            Some("56")
        );
        assert_eq!(
            composite.get_raw("notify_on_connect").await.unwrap().as_deref(),
            Some("false")
        );
        assert!(composite.get_raw("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_skips_read_only_providers() {
        let memory = MemoryConfigProvider::new();
        let composite = CompositeConfigProvider::new()
            .provider(Box::new(EnvConfigProvider::prefixed("WALLET_BROKER_COMPOSITE_")))
            .provider(Box::new(memory.clone()));

        composite.set_raw("default_chain_id", "97").await.unwrap();
        assert_eq!(
            memory.get_raw("default_chain_id").await.unwrap().as_deref(),
            Some("97")
        );
    }
}
