//! PostgreSQL audit event sink.

use async_trait::async_trait;
use sea_orm::{DbConn, EntityTrait};

use bulwark_core::RepoError;
use bulwark_core::domain::RateLimitEvent;
use bulwark_core::ports::EventRepository;

use super::entity::rate_limit_event::{self, Entity as EventEntity};
use super::repo_err;

pub struct PostgresEventRepository {
    db: DbConn,
}

impl PostgresEventRepository {
    pub fn new(db: DbConn) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EventRepository for PostgresEventRepository {
    async fn append(&self, event: &RateLimitEvent) -> Result<(), RepoError> {
        EventEntity::insert(rate_limit_event::ActiveModel::from(event))
            .exec_without_returning(&self.db)
            .await
            .map_err(repo_err)?;
        Ok(())
    }
}
