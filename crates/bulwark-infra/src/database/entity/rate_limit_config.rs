//! Per-module policy entity for SeaORM.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "rate_limit_configs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub module: String,
    pub max_requests: i32,
    pub window_ms: i64,
    pub block_ms: i64,
    pub warn_threshold: i32,
    pub is_active: bool,
    pub mode: String,
    pub store_email_in_events: bool,
    pub store_ip_in_events: bool,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
