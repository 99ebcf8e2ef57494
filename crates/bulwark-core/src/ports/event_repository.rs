use async_trait::async_trait;

use crate::domain::RateLimitEvent;
use crate::error::RepoError;

/// Append-only sink for audit events.
#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn append(&self, event: &RateLimitEvent) -> Result<(), RepoError>;
}
