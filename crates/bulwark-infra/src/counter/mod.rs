//! Counter store implementations - Redis primary, PostgreSQL fallback and an
//! in-memory store for single-process deployments and tests.

mod memory;

#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "redis")]
mod redis;

pub use memory::InMemoryCounterStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresCounterStore;
#[cfg(feature = "redis")]
pub use self::redis::{RedisConfig, RedisCounterStore, RedisCounterStoreConfig};
