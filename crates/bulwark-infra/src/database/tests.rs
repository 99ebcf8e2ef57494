use bulwark_core::domain::{
    EnforcementMode, EventContext, EventType, RateLimitConfigPatch, RateLimitEvent, Severity,
    creation_default,
};
use bulwark_core::ports::{ConfigRepository, EventRepository};
use chrono::Utc;
use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

use crate::database::entity::rate_limit_config;
use crate::database::{PostgresConfigRepository, PostgresEventRepository};

fn config_row(module: &str, mode: &str) -> rate_limit_config::Model {
    rate_limit_config::Model {
        module: module.to_owned(),
        max_requests: 5,
        window_ms: 900_000,
        block_ms: 1_800_000,
        warn_threshold: 0,
        is_active: true,
        mode: mode.to_owned(),
        store_email_in_events: false,
        store_ip_in_events: true,
        updated_at: Utc::now().into(),
    }
}

#[tokio::test]
async fn test_load_all_skips_unreadable_rows() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![
            config_row("auth", "enforce"),
            config_row("legacy", "shadow"),
        ]])
        .into_connection();
    let repo = PostgresConfigRepository::new(db);

    let configs = repo.load_all().await.unwrap();

    assert_eq!(configs.len(), 1);
    let (module, config) = &configs[0];
    assert_eq!(module, "auth");
    assert_eq!(config.mode, EnforcementMode::Enforce);
    assert_eq!(config.window_ms, 900_000);
    assert!(!config.is_fallback);
}

#[tokio::test]
async fn test_upsert_patches_existing_row() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([vec![config_row("auth", "enforce")]])
        .append_exec_results([MockExecResult {
            last_insert_id: 0,
            rows_affected: 1,
        }])
        .into_connection();
    let repo = PostgresConfigRepository::new(db);

    let patch = RateLimitConfigPatch {
        mode: Some(EnforcementMode::Monitor),
        ..Default::default()
    };
    let stored = repo
        .upsert("auth", &patch, &creation_default("auth"))
        .await
        .unwrap();

    assert_eq!(stored.mode, EnforcementMode::Monitor);
    assert_eq!(stored.max_requests, 5);
}

#[tokio::test]
async fn test_upsert_creates_from_defaults() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_query_results([Vec::<rate_limit_config::Model>::new()])
        .append_exec_results([MockExecResult {
            last_insert_id: 0,
            rows_affected: 1,
        }])
        .into_connection();
    let repo = PostgresConfigRepository::new(db);

    let patch = RateLimitConfigPatch {
        max_requests: Some(40),
        ..Default::default()
    };
    let stored = repo
        .upsert("webhook", &patch, &creation_default("webhook"))
        .await
        .unwrap();

    assert_eq!(stored.max_requests, 40);
    assert!(stored.is_active);
    assert!(!stored.is_fallback);
}

#[tokio::test]
async fn test_event_append() {
    let db = MockDatabase::new(DatabaseBackend::Postgres)
        .append_exec_results([MockExecResult {
            last_insert_id: 0,
            rows_affected: 1,
        }])
        .into_connection();
    let repo = PostgresEventRepository::new(db);
    let context = EventContext::default();

    let event = RateLimitEvent {
        id: uuid::Uuid::new_v4(),
        source: "rate-limit".to_owned(),
        module: "auth".to_owned(),
        event_type: EventType::Block,
        severity: Severity::Error,
        actor: context.user_id,
        subject: "10.0.x.x".to_owned(),
        payload: serde_json::json!({ "count": 6 }),
        created_at: Utc::now(),
    };

    assert!(repo.append(&event).await.is_ok());
}
