//! In-memory counter store - used when Redis or PostgreSQL are not configured.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use bulwark_core::StoreError;
use bulwark_core::domain::decision::window_deadline;
use bulwark_core::domain::{
    BackendHealth, ConsumeRequest, CounterSnapshot, StoreDecision, blocked_result, evaluate,
};
use bulwark_core::ports::CounterStore;

#[derive(Debug, Clone)]
struct CounterEntry {
    count: u32,
    window_end: DateTime<Utc>,
    blocked_until: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl CounterEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.window_end > now || self.blocked_until.is_some_and(|until| until > now)
    }
}

/// Fixed-window counters in a HashMap behind an async RwLock.
///
/// Each consume holds the write lock, so per-key updates are atomic.
/// Note: Data is lost on process restart and limits are per-process.
pub struct InMemoryCounterStore {
    store: RwLock<HashMap<(String, String), CounterEntry>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self {
            store: RwLock::new(HashMap::new()),
        }
    }

    /// Number of tracked `(module, key)` pairs.
    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.read().await.is_empty()
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

fn matches(entry_key: &(String, String), key: Option<&str>, module: Option<&str>) -> bool {
    module.is_none_or(|m| m == entry_key.0.as_str()) && key.is_none_or(|k| k == entry_key.1.as_str())
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn consume(&self, request: &ConsumeRequest<'_>) -> Result<StoreDecision, StoreError> {
        let now = request.now;
        let id = (request.module.to_string(), request.key.to_string());
        let mut store = self.store.write().await;

        if let Some(entry) = store.get(&id) {
            if let Some(until) = entry.blocked_until.filter(|until| *until > now) {
                return Ok(StoreDecision {
                    result: blocked_result(until, entry.window_end),
                    count: entry.count,
                    event: None,
                });
            }
        }

        // Expired windows restart from zero.
        let (count, window_end) = match store.get(&id) {
            Some(e) if e.window_end > now => (e.count, e.window_end),
            _ => (0, window_deadline(request.config, now)),
        };

        if !request.increment {
            let eval = evaluate(request.config, count, false, now, window_end);
            return Ok(StoreDecision {
                result: eval.result,
                count,
                event: None,
            });
        }

        let count = count.saturating_add(1);
        let eval = evaluate(request.config, count, true, now, window_end);
        store.insert(
            id,
            CounterEntry {
                count,
                window_end,
                blocked_until: eval.block,
                updated_at: now,
            },
        );

        Ok(StoreDecision {
            result: eval.result,
            count,
            event: eval.event,
        })
    }

    async fn set_block(
        &self,
        key: &str,
        module: &str,
        blocked_until: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut store = self.store.write().await;
        let entry = store
            .entry((module.to_string(), key.to_string()))
            .or_insert_with(|| CounterEntry {
                count: 0,
                window_end: now,
                blocked_until: None,
                updated_at: now,
            });
        entry.blocked_until = blocked_until;
        entry.updated_at = now;
        Ok(())
    }

    async fn reset(&self, key: Option<&str>, module: Option<&str>) -> Result<u64, StoreError> {
        let mut store = self.store.write().await;
        let before = store.len();
        store.retain(|id, _| !matches(id, key, module));
        Ok((before - store.len()) as u64)
    }

    async fn clear_all(&self) -> Result<u64, StoreError> {
        let mut store = self.store.write().await;
        let removed = store.len() as u64;
        store.clear();
        Ok(removed)
    }

    async fn health_check(&self) -> BackendHealth {
        BackendHealth::up(0)
    }

    async fn restore_state(&self, snapshot: &CounterSnapshot) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut store = self.store.write().await;
        store.insert(
            (snapshot.module.clone(), snapshot.key.clone()),
            CounterEntry {
                count: snapshot.count,
                window_end: snapshot.window_end.unwrap_or(now),
                blocked_until: snapshot.blocked_until,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn active_state(
        &self,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<CounterSnapshot>, StoreError> {
        let store = self.store.read().await;
        Ok(store
            .iter()
            .filter(|(_, e)| e.updated_at >= since && e.is_live(now))
            .map(|((module, key), e)| CounterSnapshot {
                key: key.clone(),
                module: module.clone(),
                count: e.count,
                window_end: (e.window_end > now).then_some(e.window_end),
                blocked_until: e.blocked_until.filter(|until| *until > now),
            })
            .collect())
    }

    async fn cleanup_expired(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut store = self.store.write().await;
        let count = store.len();
        store.retain(|_, e| e.is_live(before));
        Ok((count - store.len()) as u64)
    }

    async fn shutdown(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
