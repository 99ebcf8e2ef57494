//! Counter store port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{BackendHealth, ConsumeRequest, CounterSnapshot, StoreDecision};
use crate::error::StoreError;

/// Counter store trait - abstraction over the primary (Redis) and fallback
/// (relational) counting backends.
///
/// Every operation is independent per `(module, key)` pair.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Consume one unit (or only read, when `increment` is false).
    async fn consume(&self, request: &ConsumeRequest<'_>) -> Result<StoreDecision, StoreError>;

    /// Write or clear (`None`) the block record of a key.
    async fn set_block(
        &self,
        key: &str,
        module: &str,
        blocked_until: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Delete counters and blocks. `None` acts as a wildcard.
    /// Returns the number of records removed.
    async fn reset(&self, key: Option<&str>, module: Option<&str>) -> Result<u64, StoreError>;

    /// Delete every counter and block this store holds.
    async fn clear_all(&self) -> Result<u64, StoreError>;

    /// Probe the backend.
    async fn health_check(&self) -> BackendHealth;

    /// Write counter value and block directly, reseeding this store from
    /// another backend's state.
    async fn restore_state(&self, snapshot: &CounterSnapshot) -> Result<(), StoreError>;

    /// Export live state updated at or after `since`.
    ///
    /// Only the durable store exports state; cache-style stores return nothing.
    async fn active_state(
        &self,
        _since: DateTime<Utc>,
        _now: DateTime<Utc>,
    ) -> Result<Vec<CounterSnapshot>, StoreError> {
        Ok(Vec::new())
    }

    /// Remove records whose window and block both ended before `before`.
    async fn cleanup_expired(&self, _before: DateTime<Utc>) -> Result<u64, StoreError> {
        // TTL-driven stores expire on their own.
        Ok(0)
    }

    /// Release connections.
    async fn shutdown(&self) -> Result<(), StoreError>;
}
