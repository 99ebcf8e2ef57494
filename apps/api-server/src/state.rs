//! Application state - shared across all handlers.

use std::sync::Arc;

use bulwark_core::ports::{ConfigRepository, CounterStore, EventRepository};
use bulwark_core::services::{
    BackendMetrics, ConfigProvider, EventRecorder, ResilientCoordinator,
};
use bulwark_infra::{InMemoryConfigRepository, InMemoryCounterStore, InMemoryEventRepository};

use crate::config::AppConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<ResilientCoordinator>,
    pub metrics: Arc<BackendMetrics>,
}

/// The durable side: fallback counter store plus policy and event repositories.
struct Durable {
    counters: Arc<dyn CounterStore>,
    configs: Arc<dyn ConfigRepository>,
    events: Arc<dyn EventRepository>,
}

impl Durable {
    fn in_memory() -> Self {
        Self {
            counters: Arc::new(InMemoryCounterStore::new()),
            configs: Arc::new(InMemoryConfigRepository::new()),
            events: Arc::new(InMemoryEventRepository::new()),
        }
    }
}

impl AppState {
    /// Build the application state with appropriate implementations.
    pub async fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let primary = build_primary(config).await?;
        let durable = build_durable(config).await;

        let metrics = Arc::new(BackendMetrics::new());
        let configs = Arc::new(ConfigProvider::new(
            durable.configs,
            config.limiter.config_provider_settings(),
        ));
        let recorder = Arc::new(EventRecorder::new(
            durable.events,
            config.limiter.warning_dedup_window,
        ));
        let limiter = Arc::new(ResilientCoordinator::new(
            primary,
            durable.counters,
            configs,
            recorder,
            metrics.clone(),
            config.limiter.coordinator_settings(),
        ));

        tracing::info!("Application state initialized");

        Ok(Self { limiter, metrics })
    }

    /// State over in-memory stores only.
    #[cfg(test)]
    pub fn in_memory() -> Self {
        let metrics = Arc::new(BackendMetrics::new());
        let durable = Durable::in_memory();
        let configs = Arc::new(ConfigProvider::new(durable.configs, Default::default()));
        let recorder = Arc::new(EventRecorder::new(
            durable.events,
            std::time::Duration::from_secs(60),
        ));
        let limiter = Arc::new(ResilientCoordinator::new(
            Arc::new(InMemoryCounterStore::new()),
            durable.counters,
            configs,
            recorder,
            metrics.clone(),
            Default::default(),
        ));
        Self { limiter, metrics }
    }
}

#[cfg(feature = "redis")]
async fn build_primary(config: &AppConfig) -> anyhow::Result<Arc<dyn CounterStore>> {
    use anyhow::Context;
    use bulwark_infra::RedisCounterStore;

    let Some(redis) = &config.redis else {
        tracing::warn!("REDIS_URL not set. Using in-memory primary counter store.");
        return Ok(Arc::new(InMemoryCounterStore::new()));
    };

    match RedisCounterStore::new(redis.clone()).await {
        Ok(store) => Ok(Arc::new(store)),
        Err(e) if redis.redis.fallback_to_memory => {
            tracing::error!(error = %e, "Failed to connect to Redis. Using in-memory primary counter store.");
            Ok(Arc::new(InMemoryCounterStore::new()))
        }
        Err(e) => Err(e).context("Redis counter store unavailable"),
    }
}

#[cfg(not(feature = "redis"))]
async fn build_primary(_config: &AppConfig) -> anyhow::Result<Arc<dyn CounterStore>> {
    tracing::info!("Running without redis feature - using in-memory primary counter store");
    Ok(Arc::new(InMemoryCounterStore::new()))
}

#[cfg(feature = "postgres")]
async fn build_durable(config: &AppConfig) -> Durable {
    use bulwark_infra::{
        DatabaseConnections, PostgresConfigRepository, PostgresCounterStore,
        PostgresEventRepository,
    };

    let Some(db_config) = &config.database else {
        tracing::warn!("DATABASE_URL not set. Running without database (in-memory mode).");
        return Durable::in_memory();
    };

    match DatabaseConnections::init(db_config).await {
        Ok(connections) => Durable {
            counters: Arc::new(PostgresCounterStore::new(connections.main.clone())),
            configs: Arc::new(PostgresConfigRepository::new(connections.main.clone())),
            events: Arc::new(PostgresEventRepository::new(connections.main)),
        },
        Err(e) => {
            tracing::error!(
                "Failed to connect to database: {}. Using in-memory fallback.",
                e
            );
            Durable::in_memory()
        }
    }
}

#[cfg(not(feature = "postgres"))]
async fn build_durable(_config: &AppConfig) -> Durable {
    tracing::info!("Running without postgres feature - using in-memory fallback store");
    Durable::in_memory()
}
