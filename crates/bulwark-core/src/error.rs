//! Error types for stores, repositories and the engine surface.

use std::time::Duration;

use thiserror::Error;

/// Counter store failures.
///
/// Every variant counts as a backend failure for the coordinator's failover
/// state machine.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Backend call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Concurrent update conflict: {0}")]
    Conflict(String),

    #[error("Query execution failed: {0}")]
    Query(String),

    #[error("Invalid store input: {0}")]
    Validation(String),
}

/// Repository-level errors.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("Database connection failed: {0}")]
    Connection(String),

    #[error("Query execution failed: {0}")]
    Query(String),

    #[error("Entity not found")]
    NotFound,

    #[error("Constraint violation: {0}")]
    Constraint(String),
}

/// Errors surfaced to callers of the engine.
///
/// Over-limit callers are not errors; they receive `allowed = false`.
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("All counter backends unavailable (primary: {primary}; fallback: {fallback})")]
    BackendsUnavailable {
        primary: StoreError,
        fallback: StoreError,
    },

    #[error("Counter backend failed: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid rate limit configuration: {0}")]
    InvalidConfig(String),

    #[error("Rate limit configuration storage failed: {0}")]
    Repository(#[from] RepoError),
}

impl RateLimitError {
    /// Whether this error means no backend could serve the request.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::BackendsUnavailable { .. } | Self::Store(_))
    }
}
