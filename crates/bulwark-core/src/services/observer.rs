//! Backend health observability hooks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::domain::Backend;
use crate::error::StoreError;

/// Callbacks invoked by the coordinator at every routing side effect.
pub trait BackendObserver: Send + Sync {
    /// A backend answered a consume call.
    fn on_served(&self, backend: Backend, latency: Duration);

    /// A backend call failed or timed out.
    fn on_failure(&self, backend: Backend, error: &StoreError);

    /// Routing moved from one backend to the other. `time_in_fallback` is set
    /// when returning to the primary.
    fn on_switch(&self, from: Backend, to: Backend, time_in_fallback: Option<Duration>);
}

#[derive(Debug, Default)]
struct BackendCounters {
    served: AtomicU64,
    failures: AtomicU64,
    latency_us: AtomicU64,
}

impl BackendCounters {
    fn snapshot(&self) -> BackendStats {
        let served = self.served.load(Ordering::Relaxed);
        let latency_us = self.latency_us.load(Ordering::Relaxed);
        BackendStats {
            served,
            failures: self.failures.load(Ordering::Relaxed),
            avg_latency_us: latency_us.checked_div(served).unwrap_or(0),
        }
    }
}

/// Default observer: atomic counters plus structured logs.
#[derive(Debug, Default)]
pub struct BackendMetrics {
    primary: BackendCounters,
    fallback: BackendCounters,
    switches_to_fallback: AtomicU64,
    switches_to_primary: AtomicU64,
    fallback_time_ms: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackendStats {
    pub served: u64,
    pub failures: u64,
    pub avg_latency_us: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub primary: BackendStats,
    pub fallback: BackendStats,
    pub switches_to_fallback: u64,
    pub switches_to_primary: u64,
    pub fallback_time_ms: u64,
}

impl BackendMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, backend: Backend) -> &BackendCounters {
        match backend {
            Backend::Primary => &self.primary,
            Backend::Fallback => &self.fallback,
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            primary: self.primary.snapshot(),
            fallback: self.fallback.snapshot(),
            switches_to_fallback: self.switches_to_fallback.load(Ordering::Relaxed),
            switches_to_primary: self.switches_to_primary.load(Ordering::Relaxed),
            fallback_time_ms: self.fallback_time_ms.load(Ordering::Relaxed),
        }
    }
}

impl BackendObserver for BackendMetrics {
    fn on_served(&self, backend: Backend, latency: Duration) {
        let counters = self.counters(backend);
        counters.served.fetch_add(1, Ordering::Relaxed);
        counters.latency_us.fetch_add(
            u64::try_from(latency.as_micros()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
        tracing::trace!(backend = %backend, latency_us = latency.as_micros(), "Counter backend served");
    }

    fn on_failure(&self, backend: Backend, error: &StoreError) {
        self.counters(backend).failures.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(backend = %backend, error = %error, "Counter backend call failed");
    }

    fn on_switch(&self, from: Backend, to: Backend, time_in_fallback: Option<Duration>) {
        match to {
            Backend::Fallback => {
                self.switches_to_fallback.fetch_add(1, Ordering::Relaxed);
                tracing::error!(from = %from, to = %to, "Rate limiter switched to fallback backend");
            }
            Backend::Primary => {
                self.switches_to_primary.fetch_add(1, Ordering::Relaxed);
                let spent = time_in_fallback.unwrap_or_default();
                self.fallback_time_ms.fetch_add(
                    u64::try_from(spent.as_millis()).unwrap_or(u64::MAX),
                    Ordering::Relaxed,
                );
                tracing::info!(
                    from = %from,
                    to = %to,
                    fallback_ms = spent.as_millis(),
                    "Rate limiter restored primary backend"
                );
            }
        }
    }
}
