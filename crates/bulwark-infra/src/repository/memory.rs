use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::RwLock;

use bulwark_core::RepoError;
use bulwark_core::domain::{RateLimitConfig, RateLimitConfigPatch, RateLimitEvent};
use bulwark_core::ports::{ConfigRepository, EventRepository};

/// Policy store held in process memory.
/// Note: Updates are lost on restart; built-in defaults apply again.
#[derive(Default)]
pub struct InMemoryConfigRepository {
    rows: RwLock<HashMap<String, RateLimitConfig>>,
}

impl InMemoryConfigRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigRepository for InMemoryConfigRepository {
    async fn load_all(&self) -> Result<Vec<(String, RateLimitConfig)>, RepoError> {
        let rows = self.rows.read().await;
        Ok(rows.iter().map(|(m, c)| (m.clone(), c.clone())).collect())
    }

    async fn upsert(
        &self,
        module: &str,
        patch: &RateLimitConfigPatch,
        defaults: &RateLimitConfig,
    ) -> Result<RateLimitConfig, RepoError> {
        let mut rows = self.rows.write().await;
        let mut config = rows
            .get(module)
            .cloned()
            .unwrap_or_else(|| defaults.clone());
        config.apply(patch);
        config.is_fallback = false;
        config.validate().map_err(RepoError::Constraint)?;
        rows.insert(module.to_string(), config.clone());
        Ok(config)
    }
}

const DEFAULT_EVENT_CAPACITY: usize = 10_000;

/// Bounded ring of the most recent audit events.
pub struct InMemoryEventRepository {
    events: RwLock<VecDeque<RateLimitEvent>>,
    capacity: usize,
}

impl InMemoryEventRepository {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Most recent events, oldest first.
    pub async fn recent(&self) -> Vec<RateLimitEvent> {
        self.events.read().await.iter().cloned().collect()
    }
}

impl Default for InMemoryEventRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventRepository for InMemoryEventRepository {
    async fn append(&self, event: &RateLimitEvent) -> Result<(), RepoError> {
        let mut events = self.events.write().await;
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_core::domain::{EventType, Severity, creation_default};
    use chrono::Utc;

    fn event(module: &str) -> RateLimitEvent {
        RateLimitEvent {
            id: uuid::Uuid::new_v4(),
            source: "rate-limit".to_string(),
            module: module.to_string(),
            event_type: EventType::Warning,
            severity: Severity::Warning,
            actor: None,
            subject: "***".to_string(),
            payload: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_event_ring_drops_oldest() {
        let repo = InMemoryEventRepository::with_capacity(2);
        for module in ["a", "b", "c"] {
            repo.append(&event(module)).await.unwrap();
        }
        let modules: Vec<String> = repo.recent().await.into_iter().map(|e| e.module).collect();
        assert_eq!(modules, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_config_upsert_rejects_invalid_result() {
        let repo = InMemoryConfigRepository::new();
        let patch = RateLimitConfigPatch {
            max_requests: Some(0),
            ..Default::default()
        };
        let err = repo
            .upsert("auth", &patch, &creation_default("auth"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Constraint(_)));
        assert!(repo.load_all().await.unwrap().is_empty());
    }
}
