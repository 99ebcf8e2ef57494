use async_trait::async_trait;

use crate::domain::{RateLimitConfig, RateLimitConfigPatch};
use crate::error::RepoError;

/// Durable store of per-module policies.
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    /// Load every stored policy in one query.
    async fn load_all(&self) -> Result<Vec<(String, RateLimitConfig)>, RepoError>;

    /// Insert or update a module's policy.
    ///
    /// On update only the fields set in `patch` change. On creation the
    /// remaining fields come from `defaults`.
    async fn upsert(
        &self,
        module: &str,
        patch: &RateLimitConfigPatch,
        defaults: &RateLimitConfig,
    ) -> Result<RateLimitConfig, RepoError>;
}
