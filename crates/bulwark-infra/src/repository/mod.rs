//! In-memory repositories - used when no database is configured.

mod memory;

pub use memory::{InMemoryConfigRepository, InMemoryEventRepository};
