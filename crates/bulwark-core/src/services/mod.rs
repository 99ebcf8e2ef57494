//! Services - application logic composed over the ports.

pub mod config_provider;
pub mod coordinator;
pub mod event_recorder;
pub mod observer;

#[cfg(test)]
mod test_support;

pub use config_provider::{ConfigProvider, ConfigProviderSettings};
pub use coordinator::{ConsumeOptions, CoordinatorSettings, HealthReport, ResilientCoordinator};
pub use event_recorder::{DecisionRecord, EventRecorder, RecordOutcome, build_event};
pub use observer::{BackendMetrics, BackendObserver, BackendStats, MetricsSnapshot};
