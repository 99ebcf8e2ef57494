//! # Bulwark Infrastructure
//!
//! Concrete implementations of the ports defined in `bulwark-core`:
//! counter stores, configuration and event repositories.
//!
//! ## Feature Flags
//!
//! - `full` (default) - All features enabled
//! - `minimal` - No external dependencies, in-memory only
//! - `postgres` - PostgreSQL fallback store and repositories via SeaORM
//! - `redis` - Redis primary counter store

pub mod counter;
pub mod database;
pub mod repository;

// Re-exports - In-Memory
pub use counter::InMemoryCounterStore;
pub use database::DatabaseConfig;
pub use repository::{InMemoryConfigRepository, InMemoryEventRepository};

// Re-exports - PostgreSQL
#[cfg(feature = "postgres")]
pub use counter::PostgresCounterStore;
#[cfg(feature = "postgres")]
pub use database::{DatabaseConnections, PostgresConfigRepository, PostgresEventRepository};

// Re-exports - Redis
#[cfg(feature = "redis")]
pub use counter::{RedisConfig, RedisCounterStore, RedisCounterStoreConfig};
