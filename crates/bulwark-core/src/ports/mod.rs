//! Ports - trait definitions for external dependencies.
//! These are the "interfaces" that infrastructure must implement.

mod config_repository;
mod counter_store;
mod event_repository;

pub use config_repository::ConfigRepository;
pub use counter_store::CounterStore;
pub use event_repository::EventRepository;
