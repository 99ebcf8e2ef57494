//! Routes counter calls to whichever backend is healthy and fails back
//! automatically once the primary recovers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::domain::{
    Backend, BackendHealth, ConsumeRequest, ConsumeResult, CounterSnapshot, EnforcementMode,
    EventContext, EventType, StoreDecision,
};
use crate::error::{RateLimitError, StoreError};
use crate::ports::CounterStore;
use crate::services::config_provider::ConfigProvider;
use crate::services::event_recorder::{DecisionRecord, EventRecorder};
use crate::services::observer::BackendObserver;

/// Coordinator timing settings.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Cooldown before the primary is probed again after a failure.
    pub retry_interval: Duration,
    /// Upper bound on any single store call.
    pub store_timeout: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(60),
            store_timeout: Duration::from_millis(500),
        }
    }
}

/// Per-call options of [`ResilientCoordinator::consume`].
#[derive(Debug, Clone)]
pub struct ConsumeOptions {
    pub increment: bool,
    /// Decision time; defaults to the wall clock.
    pub now: Option<DateTime<Utc>>,
    pub context: EventContext,
}

impl Default for ConsumeOptions {
    fn default() -> Self {
        Self {
            increment: true,
            now: None,
            context: EventContext::default(),
        }
    }
}

impl ConsumeOptions {
    /// Read-only check that leaves the counter untouched.
    pub fn check() -> Self {
        Self {
            increment: false,
            ..Self::default()
        }
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    pub fn with_context(mut self, context: EventContext) -> Self {
        self.context = context;
        self
    }
}

/// Health of both backends, for the status page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub active: Backend,
    pub primary: BackendHealth,
    pub fallback: BackendHealth,
}

struct RoutingState {
    active: Backend,
    retry_at: Instant,
    /// Monotonic and wall-clock start of the current fallback period.
    fallback_since: Option<(Instant, DateTime<Utc>)>,
}

enum Route {
    Primary,
    Fallback,
    /// Retry interval elapsed: try the primary before the fallback.
    Probe,
}

/// Wraps the primary and fallback counter stores behind one admission API.
///
/// Backend selection is process-wide state guarded by one mutex; per-key
/// correctness is left to the stores' own atomicity.
pub struct ResilientCoordinator {
    primary: Arc<dyn CounterStore>,
    fallback: Arc<dyn CounterStore>,
    configs: Arc<ConfigProvider>,
    recorder: Arc<EventRecorder>,
    observer: Arc<dyn BackendObserver>,
    settings: CoordinatorSettings,
    state: Mutex<RoutingState>,
}

impl ResilientCoordinator {
    pub fn new(
        primary: Arc<dyn CounterStore>,
        fallback: Arc<dyn CounterStore>,
        configs: Arc<ConfigProvider>,
        recorder: Arc<EventRecorder>,
        observer: Arc<dyn BackendObserver>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            primary,
            fallback,
            configs,
            recorder,
            observer,
            settings,
            state: Mutex::new(RoutingState {
                active: Backend::Primary,
                retry_at: Instant::now(),
                fallback_since: None,
            }),
        }
    }

    pub fn configs(&self) -> &Arc<ConfigProvider> {
        &self.configs
    }

    pub fn recorder(&self) -> &Arc<EventRecorder> {
        &self.recorder
    }

    pub fn active_backend(&self) -> Backend {
        self.state.lock().active
    }

    /// Warm the config cache and copy live blocks into the primary.
    pub async fn init(&self) {
        let modules = self.configs.refresh_configs().await;
        let synced = match self.sync_blocks_from_database(Utc::now()).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "Block sync skipped during init");
                0
            }
        };
        tracing::info!(modules, synced_blocks = synced, "Rate limiter initialized");
    }

    /// Consume one unit for `(module, key)`.
    ///
    /// Backend failures are absorbed by failover; only a failure of both
    /// backends surfaces as an error.
    pub async fn consume(
        &self,
        key: &str,
        module: &str,
        options: ConsumeOptions,
    ) -> Result<ConsumeResult, RateLimitError> {
        let now = options.now.unwrap_or_else(Utc::now);
        let config = self.configs.get_config(module).await;

        if !config.is_active {
            return Ok(ConsumeResult::unlimited(&config, now));
        }

        let request = ConsumeRequest {
            key,
            module,
            config: &config,
            increment: options.increment,
            now,
        };
        let (decision, backend) = self.dispatch(&request).await?;

        if backend == Backend::Primary && decision.event == Some(EventType::Block) {
            self.mirror_block(key, module, decision.result.blocked_until)
                .await;
        }

        if let Some(event_type) = decision.event {
            self.recorder
                .record(DecisionRecord {
                    event_type,
                    module,
                    key,
                    config: &config,
                    context: &options.context,
                    result: &decision.result,
                    count: decision.count,
                    backend,
                    now,
                })
                .await;
        }

        Ok(decision.result)
    }

    /// Like [`consume`](Self::consume), but an error resolves to a deny for
    /// `enforce` modules and an allow for `monitor` modules.
    pub async fn consume_or_fail_safe(
        &self,
        key: &str,
        module: &str,
        options: ConsumeOptions,
    ) -> ConsumeResult {
        let now = options.now.unwrap_or_else(Utc::now);
        match self.consume(key, module, options).await {
            Ok(result) => result,
            Err(e) => {
                let config = self.configs.get_config(module).await;
                tracing::error!(module = %module, mode = %config.mode, error = %e, "Rate limit decision failed");
                let mut result = ConsumeResult::unlimited(&config, now);
                if config.mode == EnforcementMode::Enforce {
                    result.allowed = false;
                    result.remaining = 0;
                }
                result
            }
        }
    }

    async fn dispatch(
        &self,
        request: &ConsumeRequest<'_>,
    ) -> Result<(StoreDecision, Backend), RateLimitError> {
        match self.route() {
            Route::Primary => match self.call(Backend::Primary, request).await {
                Ok(decision) => Ok((decision, Backend::Primary)),
                Err(primary_err) => {
                    self.fail_over(request.now.min(Utc::now()));
                    self.serve_from_fallback(request, primary_err).await
                }
            },
            Route::Fallback => self
                .call(Backend::Fallback, request)
                .await
                .map(|decision| (decision, Backend::Fallback))
                .map_err(RateLimitError::Store),
            Route::Probe => match self.probe_primary(request).await {
                Ok(decision) => {
                    self.fail_back();
                    Ok((decision, Backend::Primary))
                }
                Err(primary_err) => {
                    tracing::debug!(error = %primary_err, "Primary still unavailable");
                    self.rearm_retry();
                    self.serve_from_fallback(request, primary_err).await
                }
            },
        }
    }

    async fn serve_from_fallback(
        &self,
        request: &ConsumeRequest<'_>,
        primary_err: StoreError,
    ) -> Result<(StoreDecision, Backend), RateLimitError> {
        match self.call(Backend::Fallback, request).await {
            Ok(decision) => Ok((decision, Backend::Fallback)),
            Err(fallback_err) => {
                tracing::error!(
                    primary = %primary_err,
                    fallback = %fallback_err,
                    "Both counter backends failed"
                );
                Err(RateLimitError::BackendsUnavailable {
                    primary: primary_err,
                    fallback: fallback_err,
                })
            }
        }
    }

    /// Warm the primary with what the fallback saw, then serve from it.
    async fn probe_primary(&self, request: &ConsumeRequest<'_>) -> Result<StoreDecision, StoreError> {
        let since = self
            .state
            .lock()
            .fallback_since
            .map(|(_, wall)| wall)
            .unwrap_or(request.now);

        match self
            .guarded(self.fallback.active_state(since, request.now))
            .await
        {
            Ok(snapshots) => {
                for snapshot in &snapshots {
                    self.guarded(self.primary.restore_state(snapshot))
                        .await
                        .inspect_err(|e| self.observer.on_failure(Backend::Primary, e))?;
                }
                if !snapshots.is_empty() {
                    tracing::info!(restored = snapshots.len(), "Primary warmed from fallback state");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not export fallback state, primary resumes cold");
            }
        }

        self.call(Backend::Primary, request).await
    }

    async fn call(
        &self,
        backend: Backend,
        request: &ConsumeRequest<'_>,
    ) -> Result<StoreDecision, StoreError> {
        let started = Instant::now();
        match self.guarded(self.store(backend).consume(request)).await {
            Ok(decision) => {
                self.observer.on_served(backend, started.elapsed());
                Ok(decision)
            }
            Err(e) => {
                self.observer.on_failure(backend, &e);
                Err(e)
            }
        }
    }

    /// Bounds a store call by the configured timeout.
    async fn guarded<T>(
        &self,
        op: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.settings.store_timeout, op)
            .await
            .unwrap_or(Err(StoreError::Timeout(self.settings.store_timeout)))
    }

    fn store(&self, backend: Backend) -> &Arc<dyn CounterStore> {
        match backend {
            Backend::Primary => &self.primary,
            Backend::Fallback => &self.fallback,
        }
    }

    fn route(&self) -> Route {
        let mut state = self.state.lock();
        match state.active {
            Backend::Primary => Route::Primary,
            Backend::Fallback => {
                let now = Instant::now();
                if now >= state.retry_at {
                    // Claim the probe so concurrent callers keep using the fallback.
                    state.retry_at = now + self.settings.retry_interval;
                    Route::Probe
                } else {
                    Route::Fallback
                }
            }
        }
    }

    /// `at` is the wall-clock start of the fallback period, used to pick the
    /// state to copy back on failback.
    fn fail_over(&self, at: DateTime<Utc>) {
        let switched = {
            let mut state = self.state.lock();
            if state.active == Backend::Primary {
                let now = Instant::now();
                state.active = Backend::Fallback;
                state.retry_at = now + self.settings.retry_interval;
                state.fallback_since = Some((now, at));
                true
            } else {
                false
            }
        };
        if switched {
            self.observer
                .on_switch(Backend::Primary, Backend::Fallback, None);
        }
    }

    fn fail_back(&self) {
        let spent = {
            let mut state = self.state.lock();
            if state.active != Backend::Fallback {
                return;
            }
            state.active = Backend::Primary;
            state
                .fallback_since
                .take()
                .map(|(since, _)| since.elapsed())
                .unwrap_or_default()
        };
        self.observer
            .on_switch(Backend::Fallback, Backend::Primary, Some(spent));
    }

    fn rearm_retry(&self) {
        self.state.lock().retry_at = Instant::now() + self.settings.retry_interval;
    }

    /// Copy a primary-issued block to the fallback so it survives a failover.
    async fn mirror_block(&self, key: &str, module: &str, blocked_until: Option<DateTime<Utc>>) {
        if let Err(e) = self
            .guarded(self.fallback.set_block(key, module, blocked_until))
            .await
        {
            tracing::warn!(module = %module, error = %e, "Block not mirrored to fallback");
        }
    }

    /// Write or clear a block on every reachable backend.
    pub async fn set_block(
        &self,
        key: &str,
        module: &str,
        blocked_until: Option<DateTime<Utc>>,
    ) -> Result<(), RateLimitError> {
        let primary = self
            .guarded(self.primary.set_block(key, module, blocked_until))
            .await;
        let fallback = self
            .guarded(self.fallback.set_block(key, module, blocked_until))
            .await;
        merge_admin("set_block", primary.map(|()| 1), fallback.map(|()| 1)).map(|_| ())
    }

    /// Delete counters and blocks on both backends. `None` is a wildcard.
    pub async fn reset_cache(
        &self,
        key: Option<&str>,
        module: Option<&str>,
    ) -> Result<u64, RateLimitError> {
        let primary = self.guarded(self.primary.reset(key, module)).await;
        let fallback = self.guarded(self.fallback.reset(key, module)).await;
        self.recorder.forget(key, module);
        let removed = merge_admin("reset_cache", primary, fallback)?;
        tracing::info!(key = ?key, module = ?module, removed, "Rate limit state reset");
        Ok(removed)
    }

    pub async fn clear_cache_completely(&self) -> Result<u64, RateLimitError> {
        let primary = self.guarded(self.primary.clear_all()).await;
        let fallback = self.guarded(self.fallback.clear_all()).await;
        self.recorder.forget(None, None);
        let removed = merge_admin("clear_cache_completely", primary, fallback)?;
        tracing::warn!(removed, "All rate limit state cleared");
        Ok(removed)
    }

    pub async fn health_check(&self) -> HealthReport {
        let timeout = self.settings.store_timeout;
        let probe = |store: Arc<dyn CounterStore>| async move {
            tokio::time::timeout(timeout, store.health_check())
                .await
                .unwrap_or_else(|_| {
                    BackendHealth::down(
                        u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                        "health check timed out",
                    )
                })
        };
        let (primary, fallback) = tokio::join!(
            probe(self.primary.clone()),
            probe(self.fallback.clone())
        );
        HealthReport {
            active: self.active_backend(),
            primary,
            fallback,
        }
    }

    /// Copy blocks still live in the durable store into the primary.
    ///
    /// Does nothing while the fallback is serving, since it already holds them.
    pub async fn sync_blocks_from_database(&self, now: DateTime<Utc>) -> Result<usize, RateLimitError> {
        if self.active_backend() == Backend::Fallback {
            return Ok(0);
        }

        let snapshots = self
            .guarded(self.fallback.active_state(DateTime::<Utc>::MIN_UTC, now))
            .await?;
        let blocks: Vec<&CounterSnapshot> = snapshots
            .iter()
            .filter(|s| s.blocked_until.is_some_and(|until| until > now))
            .collect();

        for snapshot in &blocks {
            self.guarded(self.primary.set_block(
                &snapshot.key,
                &snapshot.module,
                snapshot.blocked_until,
            ))
            .await?;
        }

        tracing::debug!(blocks = blocks.len(), "Blocks synced into primary store");
        Ok(blocks.len())
    }

    /// Maintenance pass: prune expired fallback rows and stale dedup marks.
    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<u64, RateLimitError> {
        let pruned = self.recorder.prune_expired(now);
        let removed = self.guarded(self.fallback.cleanup_expired(now)).await?;
        tracing::debug!(removed, pruned, "Rate limit maintenance finished");
        Ok(removed)
    }

    pub async fn shutdown(&self) {
        for (backend, store) in [
            (Backend::Primary, &self.primary),
            (Backend::Fallback, &self.fallback),
        ] {
            if let Err(e) = self.guarded(store.shutdown()).await {
                tracing::warn!(backend = %backend, error = %e, "Counter store shutdown failed");
            }
        }
        tracing::info!("Rate limiter shut down");
    }
}

/// Administrative calls succeed when at least one backend applied them.
fn merge_admin(
    operation: &str,
    primary: Result<u64, StoreError>,
    fallback: Result<u64, StoreError>,
) -> Result<u64, RateLimitError> {
    match (primary, fallback) {
        (Ok(a), Ok(b)) => Ok(a + b),
        (Ok(a), Err(e)) | (Err(e), Ok(a)) => {
            tracing::warn!(operation, error = %e, "Administrative call reached only one backend");
            Ok(a)
        }
        (Err(primary), Err(fallback)) => Err(RateLimitError::BackendsUnavailable { primary, fallback }),
    }
}
