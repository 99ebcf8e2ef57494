//! Test doubles for the service tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::domain::{
    BackendHealth, ConsumeRequest, CounterSnapshot, RateLimitConfig, RateLimitConfigPatch,
    RateLimitEvent, StoreDecision, blocked_result, evaluate,
};
use crate::error::{RepoError, StoreError};
use crate::ports::{ConfigRepository, CounterStore, EventRepository};

#[derive(Default)]
pub struct MemoryConfigRepository {
    rows: Mutex<HashMap<String, RateLimitConfig>>,
    loads: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryConfigRepository {
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConfigRepository for MemoryConfigRepository {
    async fn load_all(&self) -> Result<Vec<(String, RateLimitConfig)>, RepoError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepoError::Connection("config store offline".into()));
        }
        Ok(self
            .rows
            .lock()
            .iter()
            .map(|(m, c)| (m.clone(), c.clone()))
            .collect())
    }

    async fn upsert(
        &self,
        module: &str,
        patch: &RateLimitConfigPatch,
        defaults: &RateLimitConfig,
    ) -> Result<RateLimitConfig, RepoError> {
        let mut rows = self.rows.lock();
        let row = rows
            .entry(module.to_string())
            .or_insert_with(|| defaults.clone());
        row.apply(patch);
        Ok(row.clone())
    }
}

#[derive(Default)]
pub struct MemoryEventRepository {
    events: Mutex<Vec<RateLimitEvent>>,
    failing: AtomicBool,
}

impl MemoryEventRepository {
    pub fn events(&self) -> Vec<RateLimitEvent> {
        self.events.lock().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventRepository for MemoryEventRepository {
    async fn append(&self, event: &RateLimitEvent) -> Result<(), RepoError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepoError::Query("event table unavailable".into()));
        }
        self.events.lock().push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
struct Slot {
    count: u32,
    blocked_until: Option<DateTime<Utc>>,
}

/// Minimal counter store with a failure switch; windows never roll over.
#[derive(Default)]
pub struct ScriptedStore {
    slots: Mutex<HashMap<(String, String), Slot>>,
    failing: AtomicBool,
    consumes: AtomicUsize,
    pub restored: Mutex<Vec<CounterSnapshot>>,
    pub exported: Mutex<Vec<CounterSnapshot>>,
}

impl ScriptedStore {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Successful consume calls served.
    pub fn consumes(&self) -> usize {
        self.consumes.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CounterStore for ScriptedStore {
    async fn consume(&self, request: &ConsumeRequest<'_>) -> Result<StoreDecision, StoreError> {
        self.check()?;
        self.consumes.fetch_add(1, Ordering::SeqCst);

        let mut slots = self.slots.lock();
        let slot = slots
            .entry((request.module.to_string(), request.key.to_string()))
            .or_default();

        if let Some(until) = slot.blocked_until.filter(|u| *u > request.now) {
            return Ok(StoreDecision {
                result: blocked_result(until, request.now),
                count: slot.count,
                event: None,
            });
        }
        if request.increment {
            slot.count += 1;
        }
        let eval = evaluate(
            request.config,
            slot.count,
            request.increment,
            request.now,
            request.now,
        );
        if let Some(until) = eval.block {
            slot.blocked_until = Some(until);
        }
        Ok(StoreDecision {
            result: eval.result,
            count: slot.count,
            event: eval.event,
        })
    }

    async fn set_block(
        &self,
        key: &str,
        module: &str,
        blocked_until: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.slots
            .lock()
            .entry((module.to_string(), key.to_string()))
            .or_default()
            .blocked_until = blocked_until;
        Ok(())
    }

    async fn reset(&self, key: Option<&str>, module: Option<&str>) -> Result<u64, StoreError> {
        self.check()?;
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|(m, k), _| {
            !(module.is_none_or(|w| w == m.as_str()) && key.is_none_or(|w| w == k.as_str()))
        });
        Ok((before - slots.len()) as u64)
    }

    async fn clear_all(&self) -> Result<u64, StoreError> {
        self.reset(None, None).await
    }

    async fn health_check(&self) -> BackendHealth {
        match self.check() {
            Ok(()) => BackendHealth::up(0),
            Err(e) => BackendHealth::down(0, e.to_string()),
        }
    }

    async fn restore_state(&self, snapshot: &CounterSnapshot) -> Result<(), StoreError> {
        self.check()?;
        self.restored.lock().push(snapshot.clone());
        Ok(())
    }

    async fn active_state(
        &self,
        _since: DateTime<Utc>,
        _now: DateTime<Utc>,
    ) -> Result<Vec<CounterSnapshot>, StoreError> {
        self.check()?;
        Ok(self.exported.lock().clone())
    }

    async fn shutdown(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
