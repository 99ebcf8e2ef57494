use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RateLimitConfigs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RateLimitConfigs::Module)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(RateLimitConfigs::MaxRequests).integer().not_null())
                    .col(ColumnDef::new(RateLimitConfigs::WindowMs).big_integer().not_null())
                    .col(ColumnDef::new(RateLimitConfigs::BlockMs).big_integer().not_null())
                    .col(
                        ColumnDef::new(RateLimitConfigs::WarnThreshold)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(RateLimitConfigs::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(RateLimitConfigs::Mode)
                            .string()
                            .not_null()
                            .default("enforce"),
                    )
                    .col(
                        ColumnDef::new(RateLimitConfigs::StoreEmailInEvents)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(RateLimitConfigs::StoreIpInEvents)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(RateLimitConfigs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(RateLimitCounters::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(RateLimitCounters::Module).string().not_null())
                    .col(ColumnDef::new(RateLimitCounters::Key).string().not_null())
                    .col(
                        ColumnDef::new(RateLimitCounters::Count)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(RateLimitCounters::WindowStart)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RateLimitCounters::WindowEnd)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(RateLimitCounters::BlockedUntil).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(RateLimitCounters::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .col(RateLimitCounters::Module)
                            .col(RateLimitCounters::Key),
                    )
                    .to_owned(),
            )
            .await?;

        // Warm-up and cleanup scan by recency and expiry.
        manager
            .create_index(
                Index::create()
                    .name("idx_rate_limit_counters_updated_at")
                    .table(RateLimitCounters::Table)
                    .col(RateLimitCounters::UpdatedAt)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_rate_limit_counters_window_end")
                    .table(RateLimitCounters::Table)
                    .col(RateLimitCounters::WindowEnd)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(RateLimitEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RateLimitEvents::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(RateLimitEvents::Source).string().not_null())
                    .col(ColumnDef::new(RateLimitEvents::Module).string().not_null())
                    .col(ColumnDef::new(RateLimitEvents::EventType).string().not_null())
                    .col(ColumnDef::new(RateLimitEvents::Severity).string().not_null())
                    .col(ColumnDef::new(RateLimitEvents::Actor).string())
                    .col(ColumnDef::new(RateLimitEvents::Subject).string().not_null())
                    .col(ColumnDef::new(RateLimitEvents::Payload).json_binary().not_null())
                    .col(
                        ColumnDef::new(RateLimitEvents::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_rate_limit_events_module_created_at")
                    .table(RateLimitEvents::Table)
                    .col(RateLimitEvents::Module)
                    .col(RateLimitEvents::CreatedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RateLimitEvents::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RateLimitCounters::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RateLimitConfigs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum RateLimitConfigs {
    Table,
    Module,
    MaxRequests,
    WindowMs,
    BlockMs,
    WarnThreshold,
    IsActive,
    Mode,
    StoreEmailInEvents,
    StoreIpInEvents,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum RateLimitCounters {
    Table,
    Module,
    Key,
    Count,
    WindowStart,
    WindowEnd,
    BlockedUntil,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum RateLimitEvents {
    Table,
    Id,
    Source,
    Module,
    EventType,
    Severity,
    Actor,
    Subject,
    Payload,
    CreatedAt,
}
