//! Cron-style job scheduler using tokio-cron-scheduler.

use std::sync::Arc;

use bulwark_core::services::ResilientCoordinator;
use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

/// Every minute, at second 0.
const DEFAULT_MAINTENANCE_SCHEDULE: &str = "0 * * * * *";

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Enable scheduler.
    pub enabled: bool,
    /// Cron expression of the rate limit maintenance pass.
    pub maintenance_schedule: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            maintenance_schedule: DEFAULT_MAINTENANCE_SCHEDULE.to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: std::env::var("SCHEDULER_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            maintenance_schedule: std::env::var("RATE_LIMIT_MAINTENANCE_CRON")
                .unwrap_or_else(|_| DEFAULT_MAINTENANCE_SCHEDULE.to_string()),
        }
    }
}

/// Cron job scheduler wrapper.
pub struct Scheduler {
    inner: JobScheduler,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a new scheduler.
    pub async fn new(config: SchedulerConfig) -> Result<Self, JobSchedulerError> {
        let inner = JobScheduler::new().await?;
        Ok(Self { inner, config })
    }

    /// Add a cron job.
    pub async fn add_cron<F, Fut>(
        &self,
        schedule: &str,
        task: F,
    ) -> Result<uuid::Uuid, JobSchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let job = Job::new_async(schedule, move |_uuid, _lock| {
            let task = task.clone();
            Box::pin(async move {
                task().await;
            })
        })?;

        let id = self.inner.add(job).await?;
        tracing::info!(schedule = %schedule, job_id = %id, "Cron job registered");
        Ok(id)
    }

    /// Register the periodic pass that prunes expired fallback counters
    /// and stale warning dedup marks.
    pub async fn add_rate_limit_maintenance(
        &self,
        limiter: Arc<ResilientCoordinator>,
    ) -> Result<uuid::Uuid, JobSchedulerError> {
        let schedule = self.config.maintenance_schedule.clone();
        self.add_cron(&schedule, move || {
            let limiter = limiter.clone();
            async move {
                match limiter.cleanup_expired(Utc::now()).await {
                    Ok(removed) if removed > 0 => {
                        tracing::info!(removed, "Expired rate limit counters removed");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "Rate limit maintenance failed"),
                }
            }
        })
        .await
    }

    /// Start the scheduler.
    pub async fn start(&self) -> Result<(), JobSchedulerError> {
        if !self.config.enabled {
            tracing::info!("Scheduler disabled");
            return Ok(());
        }

        self.inner.start().await?;
        tracing::info!("Scheduler started");
        Ok(())
    }

    /// Stop the scheduler.
    pub async fn shutdown(&mut self) -> Result<(), JobSchedulerError> {
        self.inner.shutdown().await?;
        tracing::info!("Scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule_runs_every_minute() {
        let config = SchedulerConfig::default();
        assert!(config.enabled);
        assert_eq!(config.maintenance_schedule, "0 * * * * *");
    }

    #[tokio::test]
    async fn test_maintenance_job_registers() {
        let scheduler = Scheduler::new(SchedulerConfig::default()).await.unwrap();
        let state = crate::state::AppState::in_memory();
        scheduler
            .add_rate_limit_maintenance(state.limiter.clone())
            .await
            .unwrap();
    }
}
