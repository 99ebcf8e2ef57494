//! Resolution, caching and persistence of per-module policies.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::domain::{
    RateLimitConfig, RateLimitConfigPatch, builtin_default, builtin_modules, creation_default,
};
use crate::error::RateLimitError;
use crate::ports::ConfigRepository;

/// Config provider settings.
#[derive(Debug, Clone)]
pub struct ConfigProviderSettings {
    /// How long a loaded policy set is served before re-reading the store.
    pub cache_ttl: Duration,
    /// Process-level overrides applied over stored policies.
    pub overrides: HashMap<String, RateLimitConfigPatch>,
}

impl Default for ConfigProviderSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(5),
            overrides: HashMap::new(),
        }
    }
}

struct ConfigCache {
    loaded_at: Instant,
    configs: Arc<HashMap<String, RateLimitConfig>>,
}

/// Resolves module policies from built-in defaults, the durable store and
/// process overrides, in increasing precedence.
///
/// Resolution never fails: unknown modules get the fallback template and a
/// broken store degrades to the last loaded set (or the built-ins).
pub struct ConfigProvider {
    repository: Arc<dyn ConfigRepository>,
    settings: ConfigProviderSettings,
    cache: RwLock<Option<ConfigCache>>,
}

impl ConfigProvider {
    pub fn new(repository: Arc<dyn ConfigRepository>, settings: ConfigProviderSettings) -> Self {
        Self {
            repository,
            settings,
            cache: RwLock::new(None),
        }
    }

    /// Effective policy for `module`.
    pub async fn get_config(&self, module: &str) -> RateLimitConfig {
        let configs = self.configs(false).await;
        resolve(&configs, module)
    }

    /// Upsert a module's policy and drop the cache.
    pub async fn update_config(
        &self,
        module: &str,
        patch: &RateLimitConfigPatch,
    ) -> Result<RateLimitConfig, RateLimitError> {
        let module = module.trim();
        if module.is_empty() {
            return Err(RateLimitError::InvalidConfig(
                "module name must not be empty".to_string(),
            ));
        }
        patch.validate().map_err(RateLimitError::InvalidConfig)?;

        let defaults = creation_default(module);
        let stored = self.repository.upsert(module, patch, &defaults).await?;
        self.invalidate().await;

        tracing::info!(module = %module, ?patch, "Rate limit configuration updated");
        Ok(stored)
    }

    /// Every built-in module plus anything only the store knows about.
    pub async fn get_all_configs(&self) -> BTreeMap<String, RateLimitConfig> {
        let configs = self.configs(false).await;
        configs
            .iter()
            .map(|(module, config)| (module.clone(), config.clone()))
            .collect()
    }

    /// Reload from the store regardless of cache age.
    /// Returns the number of resolvable modules.
    pub async fn refresh_configs(&self) -> usize {
        self.configs(true).await.len()
    }

    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    async fn configs(&self, force: bool) -> Arc<HashMap<String, RateLimitConfig>> {
        if !force {
            if let Some(configs) = self.fresh(&*self.cache.read().await) {
                return configs;
            }
        }

        let mut cache = self.cache.write().await;
        // Another caller may have reloaded while we waited for the lock.
        if !force {
            if let Some(configs) = self.fresh(&cache) {
                return configs;
            }
        }

        let configs = match self.repository.load_all().await {
            Ok(rows) => Arc::new(self.merge(rows)),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load rate limit configs, serving last known set");
                match cache.as_ref() {
                    Some(stale) => stale.configs.clone(),
                    None => Arc::new(self.merge(Vec::new())),
                }
            }
        };

        *cache = Some(ConfigCache {
            loaded_at: Instant::now(),
            configs: configs.clone(),
        });
        tracing::debug!(modules = configs.len(), "Rate limit configs loaded");
        configs
    }

    fn fresh(&self, cache: &Option<ConfigCache>) -> Option<Arc<HashMap<String, RateLimitConfig>>> {
        cache
            .as_ref()
            .filter(|c| c.loaded_at.elapsed() < self.settings.cache_ttl)
            .map(|c| c.configs.clone())
    }

    fn merge(&self, rows: Vec<(String, RateLimitConfig)>) -> HashMap<String, RateLimitConfig> {
        let mut configs: HashMap<String, RateLimitConfig> = builtin_modules()
            .filter_map(|module| builtin_default(module).map(|c| (module.to_string(), c)))
            .collect();

        for (module, mut config) in rows {
            config.is_fallback = false;
            configs.insert(module, config);
        }

        for (module, patch) in &self.settings.overrides {
            configs
                .entry(module.clone())
                .or_insert_with(|| creation_default(module))
                .apply(patch);
        }

        configs
    }
}

fn resolve(configs: &HashMap<String, RateLimitConfig>, module: &str) -> RateLimitConfig {
    configs
        .get(module)
        .cloned()
        .unwrap_or_else(RateLimitConfig::fallback_template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EnforcementMode;
    use crate::services::test_support::MemoryConfigRepository;

    fn provider(repo: Arc<MemoryConfigRepository>) -> ConfigProvider {
        ConfigProvider::new(repo, ConfigProviderSettings::default())
    }

    #[tokio::test]
    async fn test_unknown_module_resolves_to_fallback_template() {
        let provider = provider(Arc::new(MemoryConfigRepository::default()));
        let config = provider.get_config("no-such-module").await;
        assert!(!config.is_active);
        assert_eq!(config.mode, EnforcementMode::Monitor);
        assert!(config.is_fallback);
    }

    #[tokio::test]
    async fn test_store_failure_never_raises() {
        let repo = Arc::new(MemoryConfigRepository::default());
        repo.set_failing(true);
        let provider = provider(repo);

        let auth = provider.get_config("auth").await;
        assert_eq!(auth.max_requests, 5);
        let unknown = provider.get_config("mystery").await;
        assert!(!unknown.is_active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_is_reused_until_ttl_expires() {
        let repo = Arc::new(MemoryConfigRepository::default());
        let provider = provider(repo.clone());

        provider.get_config("auth").await;
        provider.get_config("export").await;
        assert_eq!(repo.loads(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        provider.get_config("auth").await;
        assert_eq!(repo.loads(), 2);
    }

    #[tokio::test]
    async fn test_refresh_bypasses_fresh_cache() {
        let repo = Arc::new(MemoryConfigRepository::default());
        let provider = provider(repo.clone());

        provider.get_config("auth").await;
        provider.refresh_configs().await;
        assert_eq!(repo.loads(), 2);
    }

    #[tokio::test]
    async fn test_update_fills_defaults_on_create_and_keeps_fields_on_update() {
        let repo = Arc::new(MemoryConfigRepository::default());
        let provider = provider(repo.clone());

        provider
            .update_config(
                "auth",
                &RateLimitConfigPatch {
                    max_requests: Some(8),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let created = provider.get_config("auth").await;
        assert_eq!(created.max_requests, 8);
        assert_eq!(created.window_ms, 900_000);

        provider
            .update_config(
                "auth",
                &RateLimitConfigPatch {
                    mode: Some(EnforcementMode::Monitor),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let updated = provider.get_config("auth").await;
        assert_eq!(updated.max_requests, 8);
        assert_eq!(updated.mode, EnforcementMode::Monitor);
    }

    #[tokio::test]
    async fn test_update_rejects_invalid_patch() {
        let provider = provider(Arc::new(MemoryConfigRepository::default()));
        let err = provider
            .update_config(
                "auth",
                &RateLimitConfigPatch {
                    window_ms: Some(0),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RateLimitError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_all_configs_is_union_of_builtins_and_store() {
        let repo = Arc::new(MemoryConfigRepository::default());
        let provider = provider(repo.clone());
        provider
            .update_config("webhook", &RateLimitConfigPatch::default())
            .await
            .unwrap();

        let all = provider.get_all_configs().await;
        assert!(all.contains_key("auth"));
        assert!(all.contains_key("chat-message"));
        assert!(all.get("webhook").is_some_and(|c| c.is_active && !c.is_fallback));
    }

    #[tokio::test]
    async fn test_overrides_take_precedence_over_store() {
        let repo = Arc::new(MemoryConfigRepository::default());
        let mut overrides = HashMap::new();
        overrides.insert(
            "auth".to_string(),
            RateLimitConfigPatch {
                mode: Some(EnforcementMode::Monitor),
                ..Default::default()
            },
        );
        let provider = ConfigProvider::new(
            repo,
            ConfigProviderSettings {
                overrides,
                ..Default::default()
            },
        );

        provider
            .update_config(
                "auth",
                &RateLimitConfigPatch {
                    mode: Some(EnforcementMode::Enforce),
                    max_requests: Some(7),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let auth = provider.get_config("auth").await;
        assert_eq!(auth.max_requests, 7);
        assert_eq!(auth.mode, EnforcementMode::Monitor);
    }
}
