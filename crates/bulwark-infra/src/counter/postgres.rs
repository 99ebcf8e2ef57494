//! PostgreSQL counter store - the durable fallback backend.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, Condition, DbConn, DbErr, EntityTrait, QueryFilter, Set};

use bulwark_core::StoreError;
use bulwark_core::domain::decision::window_deadline;
use bulwark_core::domain::{
    BackendHealth, ConsumeRequest, CounterSnapshot, StoreDecision, blocked_result, evaluate,
};
use bulwark_core::ports::CounterStore;

use crate::database::entity::rate_limit_counter::{self, Column, Entity as CounterEntity};

/// Attempts before a contended consume gives up.
const MAX_CAS_ATTEMPTS: usize = 5;

/// Fixed-window counters in `rate_limit_counters`.
///
/// Increments are optimistic: each write is conditioned on the row still
/// holding the values that were read, and lost races re-read and retry.
pub struct PostgresCounterStore {
    db: DbConn,
}

enum Attempt {
    Done(StoreDecision),
    Conflict,
}

fn store_err(e: DbErr) -> StoreError {
    match e {
        DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => StoreError::Unavailable(e.to_string()),
        other => StoreError::Query(other.to_string()),
    }
}

fn to_u32(count: i32) -> u32 {
    u32::try_from(count).unwrap_or(0)
}

fn to_i32(count: u32) -> i32 {
    i32::try_from(count).unwrap_or(i32::MAX)
}

fn id_filter(module: &str, key: &str) -> Condition {
    Condition::all()
        .add(Column::Module.eq(module))
        .add(Column::Key.eq(key))
}

impl PostgresCounterStore {
    pub fn new(db: DbConn) -> Self {
        Self { db }
    }

    async fn try_consume(&self, request: &ConsumeRequest<'_>) -> Result<Attempt, StoreError> {
        let now = request.now;
        let row = CounterEntity::find_by_id((request.module.to_string(), request.key.to_string()))
            .one(&self.db)
            .await
            .map_err(store_err)?;

        if let Some(row) = &row {
            if let Some(until) = row.blocked_until.map(DateTime::<Utc>::from) {
                if until > now {
                    return Ok(Attempt::Done(StoreDecision {
                        result: blocked_result(until, row.window_end.into()),
                        count: to_u32(row.count),
                        event: None,
                    }));
                }
            }
        }

        // A finished window counts as empty.
        let (count, window_start, window_end): (u32, DateTime<Utc>, DateTime<Utc>) = match &row {
            Some(r) if DateTime::<Utc>::from(r.window_end) > now => {
                (to_u32(r.count), r.window_start.into(), r.window_end.into())
            }
            _ => (0, now, window_deadline(request.config, now)),
        };

        if !request.increment {
            let eval = evaluate(request.config, count, false, now, window_end);
            return Ok(Attempt::Done(StoreDecision {
                result: eval.result,
                count,
                event: None,
            }));
        }

        let next = count.saturating_add(1);
        let eval = evaluate(request.config, next, true, now, window_end);
        let written = rate_limit_counter::ActiveModel {
            module: Set(request.module.to_string()),
            key: Set(request.key.to_string()),
            count: Set(to_i32(next)),
            window_start: Set(window_start.into()),
            window_end: Set(window_end.into()),
            blocked_until: Set(eval.block.map(Into::into)),
            updated_at: Set(now.into()),
        };

        let applied = match &row {
            None => CounterEntity::insert(written)
                .on_conflict(
                    OnConflict::columns([Column::Module, Column::Key])
                        .do_nothing()
                        .to_owned(),
                )
                .exec_without_returning(&self.db)
                .await
                .map_err(store_err)?,
            Some(previous) => {
                CounterEntity::update_many()
                    .set(written)
                    .filter(id_filter(request.module, request.key))
                    .filter(Column::Count.eq(previous.count))
                    .filter(Column::WindowStart.eq(previous.window_start))
                    .filter(match previous.blocked_until {
                        Some(until) => Column::BlockedUntil.eq(until),
                        None => Column::BlockedUntil.is_null(),
                    })
                    .exec(&self.db)
                    .await
                    .map_err(store_err)?
                    .rows_affected
            }
        };

        if applied == 0 {
            return Ok(Attempt::Conflict);
        }

        Ok(Attempt::Done(StoreDecision {
            result: eval.result,
            count: next,
            event: eval.event,
        }))
    }

    async fn upsert(
        &self,
        model: rate_limit_counter::ActiveModel,
        update: &[Column],
    ) -> Result<(), StoreError> {
        CounterEntity::insert(model)
            .on_conflict(
                OnConflict::columns([Column::Module, Column::Key])
                    .update_columns(update.iter().copied())
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}

#[async_trait]
impl CounterStore for PostgresCounterStore {
    async fn consume(&self, request: &ConsumeRequest<'_>) -> Result<StoreDecision, StoreError> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            match self.try_consume(request).await? {
                Attempt::Done(decision) => return Ok(decision),
                Attempt::Conflict => {
                    tracing::debug!(module = %request.module, attempt, "Counter update raced, retrying");
                }
            }
        }
        Err(StoreError::Conflict(format!(
            "counter for module '{}' still contended after {MAX_CAS_ATTEMPTS} attempts",
            request.module
        )))
    }

    async fn set_block(
        &self,
        key: &str,
        module: &str,
        blocked_until: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        match blocked_until {
            Some(until) => {
                self.upsert(
                    rate_limit_counter::ActiveModel {
                        module: Set(module.to_string()),
                        key: Set(key.to_string()),
                        count: Set(0),
                        window_start: Set(now.into()),
                        window_end: Set(now.into()),
                        blocked_until: Set(Some(until.into())),
                        updated_at: Set(now.into()),
                    },
                    &[Column::BlockedUntil, Column::UpdatedAt],
                )
                .await
            }
            None => {
                CounterEntity::update_many()
                    .set(rate_limit_counter::ActiveModel {
                        blocked_until: Set(None),
                        updated_at: Set(now.into()),
                        ..Default::default()
                    })
                    .filter(id_filter(module, key))
                    .exec(&self.db)
                    .await
                    .map_err(store_err)?;
                Ok(())
            }
        }
    }

    async fn reset(&self, key: Option<&str>, module: Option<&str>) -> Result<u64, StoreError> {
        let mut filter = Condition::all();
        if let Some(module) = module {
            filter = filter.add(Column::Module.eq(module));
        }
        if let Some(key) = key {
            filter = filter.add(Column::Key.eq(key));
        }

        let result = CounterEntity::delete_many()
            .filter(filter)
            .exec(&self.db)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected)
    }

    async fn clear_all(&self) -> Result<u64, StoreError> {
        self.reset(None, None).await
    }

    async fn health_check(&self) -> BackendHealth {
        let started = Instant::now();
        let outcome = self.db.ping().await;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match outcome {
            Ok(()) => BackendHealth::up(latency_ms),
            Err(e) => BackendHealth::down(latency_ms, e.to_string()),
        }
    }

    async fn restore_state(&self, snapshot: &CounterSnapshot) -> Result<(), StoreError> {
        let now = Utc::now();
        let window_end = snapshot.window_end.unwrap_or(now);
        self.upsert(
            rate_limit_counter::ActiveModel {
                module: Set(snapshot.module.clone()),
                key: Set(snapshot.key.clone()),
                count: Set(to_i32(snapshot.count)),
                window_start: Set(now.into()),
                window_end: Set(window_end.into()),
                blocked_until: Set(snapshot.blocked_until.map(Into::into)),
                updated_at: Set(now.into()),
            },
            &[
                Column::Count,
                Column::WindowStart,
                Column::WindowEnd,
                Column::BlockedUntil,
                Column::UpdatedAt,
            ],
        )
        .await
    }

    async fn active_state(
        &self,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<CounterSnapshot>, StoreError> {
        let rows = CounterEntity::find()
            .filter(Column::UpdatedAt.gte(since))
            .filter(
                Condition::any()
                    .add(Column::WindowEnd.gt(now))
                    .add(Column::BlockedUntil.gt(now)),
            )
            .all(&self.db)
            .await
            .map_err(store_err)?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let window_end = DateTime::<Utc>::from(row.window_end);
                CounterSnapshot {
                    key: row.key,
                    module: row.module,
                    count: to_u32(row.count),
                    window_end: (window_end > now).then_some(window_end),
                    blocked_until: row
                        .blocked_until
                        .map(DateTime::<Utc>::from)
                        .filter(|until| *until > now),
                }
            })
            .collect())
    }

    async fn cleanup_expired(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = CounterEntity::delete_many()
            .filter(Column::WindowEnd.lt(before))
            .filter(
                Condition::any()
                    .add(Column::BlockedUntil.is_null())
                    .add(Column::BlockedUntil.lt(before)),
            )
            .exec(&self.db)
            .await
            .map_err(store_err)?;

        if result.rows_affected > 0 {
            tracing::info!(removed = result.rows_affected, "Expired fallback counters removed");
        }
        Ok(result.rows_affected)
    }

    async fn shutdown(&self) -> Result<(), StoreError> {
        self.db.close_by_ref().await.map_err(store_err)
    }
}
