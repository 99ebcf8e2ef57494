//! PostgreSQL policy repository.

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{DbConn, EntityTrait, Set};

use bulwark_core::RepoError;
use bulwark_core::domain::{EnforcementMode, RateLimitConfig, RateLimitConfigPatch};
use bulwark_core::ports::ConfigRepository;

use super::entity::rate_limit_config::{self, Entity as ConfigEntity};
use super::repo_err;

pub struct PostgresConfigRepository {
    db: DbConn,
}

impl PostgresConfigRepository {
    pub fn new(db: DbConn) -> Self {
        Self { db }
    }
}

fn into_config(model: rate_limit_config::Model) -> Result<(String, RateLimitConfig), RepoError> {
    let mode = model
        .mode
        .parse::<EnforcementMode>()
        .map_err(|e| RepoError::Constraint(format!("module '{}': {e}", model.module)))?;
    let as_u32 = |v: i32| u32::try_from(v).unwrap_or(0);
    let as_u64 = |v: i64| u64::try_from(v).unwrap_or(0);

    let config = RateLimitConfig {
        max_requests: as_u32(model.max_requests),
        window_ms: as_u64(model.window_ms),
        block_ms: as_u64(model.block_ms),
        warn_threshold: as_u32(model.warn_threshold),
        is_active: model.is_active,
        mode,
        store_email_in_events: model.store_email_in_events,
        store_ip_in_events: model.store_ip_in_events,
        is_fallback: false,
    };
    Ok((model.module, config))
}

fn into_active_model(module: &str, config: &RateLimitConfig) -> rate_limit_config::ActiveModel {
    rate_limit_config::ActiveModel {
        module: Set(module.to_string()),
        max_requests: Set(i32::try_from(config.max_requests).unwrap_or(i32::MAX)),
        window_ms: Set(i64::try_from(config.window_ms).unwrap_or(i64::MAX)),
        block_ms: Set(i64::try_from(config.block_ms).unwrap_or(i64::MAX)),
        warn_threshold: Set(i32::try_from(config.warn_threshold).unwrap_or(i32::MAX)),
        is_active: Set(config.is_active),
        mode: Set(config.mode.as_str().to_string()),
        store_email_in_events: Set(config.store_email_in_events),
        store_ip_in_events: Set(config.store_ip_in_events),
        updated_at: Set(Utc::now().into()),
    }
}

#[async_trait]
impl ConfigRepository for PostgresConfigRepository {
    async fn load_all(&self) -> Result<Vec<(String, RateLimitConfig)>, RepoError> {
        let rows = ConfigEntity::find()
            .all(&self.db)
            .await
            .map_err(repo_err)?;

        Ok(rows
            .into_iter()
            .filter_map(|row| match into_config(row) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable rate limit config row");
                    None
                }
            })
            .collect())
    }

    async fn upsert(
        &self,
        module: &str,
        patch: &RateLimitConfigPatch,
        defaults: &RateLimitConfig,
    ) -> Result<RateLimitConfig, RepoError> {
        let existing = ConfigEntity::find_by_id(module.to_string())
            .one(&self.db)
            .await
            .map_err(repo_err)?;

        let mut config = match existing {
            Some(row) => into_config(row)?.1,
            None => {
                let mut created = defaults.clone();
                created.is_fallback = false;
                created
            }
        };
        config.apply(patch);
        config.validate().map_err(RepoError::Constraint)?;

        ConfigEntity::insert(into_active_model(module, &config))
            .on_conflict(
                OnConflict::column(rate_limit_config::Column::Module)
                    .update_columns([
                        rate_limit_config::Column::MaxRequests,
                        rate_limit_config::Column::WindowMs,
                        rate_limit_config::Column::BlockMs,
                        rate_limit_config::Column::WarnThreshold,
                        rate_limit_config::Column::IsActive,
                        rate_limit_config::Column::Mode,
                        rate_limit_config::Column::StoreEmailInEvents,
                        rate_limit_config::Column::StoreIpInEvents,
                        rate_limit_config::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
            .map_err(repo_err)?;

        Ok(config)
    }
}
