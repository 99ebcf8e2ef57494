//! Audit event entity for SeaORM.

use sea_orm::Set;
use sea_orm::entity::prelude::*;

use bulwark_core::domain::RateLimitEvent;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "rate_limit_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub source: String,
    pub module: String,
    pub event_type: String,
    pub severity: String,
    pub actor: Option<String>,
    pub subject: String,
    pub payload: Json,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Conversion from Domain RateLimitEvent to SeaORM ActiveModel.
impl From<&RateLimitEvent> for ActiveModel {
    fn from(event: &RateLimitEvent) -> Self {
        Self {
            id: Set(event.id),
            source: Set(event.source.clone()),
            module: Set(event.module.clone()),
            event_type: Set(event.event_type.as_str().to_string()),
            severity: Set(event.severity.as_str().to_string()),
            actor: Set(event.actor.clone()),
            subject: Set(event.subject.clone()),
            payload: Set(event.payload.clone()),
            created_at: Set(event.created_at.into()),
        }
    }
}
