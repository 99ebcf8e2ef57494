//! Audit event construction and warning deduplication.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::json;
use uuid::Uuid;

use crate::domain::masking::{mask_email, mask_identifier, mask_ip};
use crate::domain::{
    Backend, ConsumeResult, EVENT_SOURCE, EventContext, EventType, RateLimitConfig,
    RateLimitEvent,
};
use crate::ports::EventRepository;

/// Everything the recorder needs to know about one decision.
#[derive(Debug, Clone)]
pub struct DecisionRecord<'a> {
    pub event_type: EventType,
    pub module: &'a str,
    pub key: &'a str,
    pub config: &'a RateLimitConfig,
    pub context: &'a EventContext,
    pub result: &'a ConsumeResult,
    pub count: u32,
    pub backend: Backend,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    /// A warning for the same pair was recorded inside the dedup window.
    Suppressed,
    /// Persisting failed; the failure was logged and dropped.
    Failed,
}

/// Builds masked audit events and writes them best-effort.
///
/// Warnings are deduplicated per `(module, key)`; blocks never are.
pub struct EventRecorder {
    repository: Arc<dyn EventRepository>,
    dedup_window: ChronoDuration,
    recent_warnings: DashMap<(String, String), DateTime<Utc>>,
}

impl EventRecorder {
    pub fn new(repository: Arc<dyn EventRepository>, dedup_window: Duration) -> Self {
        Self {
            repository,
            dedup_window: ChronoDuration::from_std(dedup_window)
                .unwrap_or_else(|_| ChronoDuration::seconds(60)),
            recent_warnings: DashMap::new(),
        }
    }

    pub async fn record(&self, record: DecisionRecord<'_>) -> RecordOutcome {
        let pair = (record.module.to_string(), record.key.to_string());

        if record.event_type == EventType::Warning && !self.claim_warning(&pair, record.now) {
            tracing::trace!(module = %record.module, "Duplicate rate limit warning suppressed");
            return RecordOutcome::Suppressed;
        }

        let event = build_event(&record);
        match self.repository.append(&event).await {
            Ok(()) => {
                tracing::debug!(
                    module = %event.module,
                    event_type = %event.event_type,
                    subject = %event.subject,
                    "Rate limit event recorded"
                );
                RecordOutcome::Recorded
            }
            Err(e) => {
                tracing::error!(
                    module = %event.module,
                    event_type = %event.event_type,
                    error = %e,
                    "Failed to persist rate limit event"
                );
                if record.event_type == EventType::Warning {
                    // Let the next warning in the burst try again.
                    self.recent_warnings
                        .remove_if(&pair, |_, marked| *marked == record.now);
                }
                RecordOutcome::Failed
            }
        }
    }

    /// Atomically checks and marks the warning slot for a pair.
    fn claim_warning(&self, pair: &(String, String), now: DateTime<Utc>) -> bool {
        match self.recent_warnings.entry(pair.clone()) {
            Entry::Occupied(mut slot) => {
                if now - *slot.get() < self.dedup_window {
                    false
                } else {
                    slot.insert(now);
                    true
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }

    /// Forget dedup state for matching pairs. `None` matches everything.
    pub fn forget(&self, key: Option<&str>, module: Option<&str>) {
        self.recent_warnings.retain(|(m, k), _| {
            let module_matches = module.is_none_or(|wanted| wanted == m.as_str());
            let key_matches = key.is_none_or(|wanted| wanted == k.as_str());
            !(module_matches && key_matches)
        });
    }

    /// Drop dedup entries older than the window. Returns how many were removed.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.recent_warnings.len();
        self.recent_warnings
            .retain(|_, marked| now - *marked < self.dedup_window);
        before.saturating_sub(self.recent_warnings.len())
    }
}

/// Builds the masked event for a decision.
pub fn build_event(record: &DecisionRecord<'_>) -> RateLimitEvent {
    let config = record.config;
    let mut payload = json!({
        "key": mask_identifier(record.key),
        "count": record.count,
        "remaining": record.result.remaining,
        "maxRequests": config.max_requests,
        "windowMs": config.window_ms,
        "mode": config.mode,
        "allowed": record.result.allowed,
        "backend": record.backend,
    });

    if let Some(until) = record.result.blocked_until {
        payload["blockedUntil"] = json!(until);
        payload["blockMs"] = json!(config.block_ms);
    }
    if config.store_ip_in_events {
        if let Some(ip) = &record.context.ip {
            payload["ip"] = json!(mask_ip(ip));
        }
    }
    if config.store_email_in_events {
        if let Some(email) = &record.context.email {
            payload["email"] = json!(mask_email(email));
        }
    }

    RateLimitEvent {
        id: Uuid::new_v4(),
        source: EVENT_SOURCE.to_string(),
        module: record.module.to_string(),
        event_type: record.event_type,
        severity: record.event_type.severity(),
        actor: record.context.user_id.clone(),
        subject: mask_identifier(record.key),
        payload,
        created_at: record.now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Severity, builtin_default};
    use crate::services::test_support::MemoryEventRepository;

    fn allowed(now: DateTime<Utc>) -> ConsumeResult {
        ConsumeResult {
            allowed: true,
            remaining: 0,
            reset_time: now,
            warning: true,
            blocked_until: None,
        }
    }

    fn record<'a>(
        event_type: EventType,
        key: &'a str,
        config: &'a RateLimitConfig,
        context: &'a EventContext,
        result: &'a ConsumeResult,
        now: DateTime<Utc>,
    ) -> DecisionRecord<'a> {
        DecisionRecord {
            event_type,
            module: "auth",
            key,
            config,
            context,
            result,
            count: 5,
            backend: Backend::Primary,
            now,
        }
    }

    #[tokio::test]
    async fn test_warning_burst_records_once() {
        let repo = Arc::new(MemoryEventRepository::default());
        let recorder = EventRecorder::new(repo.clone(), Duration::from_secs(60));
        let config = builtin_default("auth").unwrap();
        let context = EventContext::default();
        let start = Utc::now();

        for offset in [0, 10, 59] {
            let now = start + ChronoDuration::seconds(offset);
            let result = allowed(now);
            recorder
                .record(record(EventType::Warning, "user-1", &config, &context, &result, now))
                .await;
        }
        assert_eq!(repo.events().len(), 1);

        let later = start + ChronoDuration::seconds(61);
        let result = allowed(later);
        let outcome = recorder
            .record(record(EventType::Warning, "user-1", &config, &context, &result, later))
            .await;
        assert_eq!(outcome, RecordOutcome::Recorded);
        assert_eq!(repo.events().len(), 2);
    }

    #[tokio::test]
    async fn test_warnings_for_different_keys_are_independent() {
        let repo = Arc::new(MemoryEventRepository::default());
        let recorder = EventRecorder::new(repo.clone(), Duration::from_secs(60));
        let config = builtin_default("auth").unwrap();
        let context = EventContext::default();
        let now = Utc::now();
        let result = allowed(now);

        recorder
            .record(record(EventType::Warning, "a", &config, &context, &result, now))
            .await;
        recorder
            .record(record(EventType::Warning, "b", &config, &context, &result, now))
            .await;
        assert_eq!(repo.events().len(), 2);
    }

    #[tokio::test]
    async fn test_block_events_are_never_deduplicated() {
        let repo = Arc::new(MemoryEventRepository::default());
        let recorder = EventRecorder::new(repo.clone(), Duration::from_secs(60));
        let config = builtin_default("auth").unwrap();
        let context = EventContext::default();
        let now = Utc::now();
        let result = ConsumeResult {
            allowed: false,
            remaining: 0,
            reset_time: now,
            warning: false,
            blocked_until: Some(now + ChronoDuration::minutes(30)),
        };

        for _ in 0..3 {
            recorder
                .record(record(EventType::Block, "user-1", &config, &context, &result, now))
                .await;
        }

        let events = repo.events();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.severity == Severity::Error));
    }

    #[tokio::test]
    async fn test_concurrent_warnings_record_exactly_one() {
        let repo = Arc::new(MemoryEventRepository::default());
        let recorder = Arc::new(EventRecorder::new(repo.clone(), Duration::from_secs(60)));
        let now = Utc::now();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let recorder = recorder.clone();
            handles.push(tokio::spawn(async move {
                let config = builtin_default("auth").unwrap();
                let context = EventContext::default();
                let result = allowed(now);
                recorder
                    .record(record(EventType::Warning, "racer", &config, &context, &result, now))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(repo.events().len(), 1);
    }

    #[tokio::test]
    async fn test_persistence_failure_is_swallowed_and_releases_slot() {
        let repo = Arc::new(MemoryEventRepository::default());
        repo.set_failing(true);
        let recorder = EventRecorder::new(repo.clone(), Duration::from_secs(60));
        let config = builtin_default("auth").unwrap();
        let context = EventContext::default();
        let now = Utc::now();
        let result = allowed(now);

        let outcome = recorder
            .record(record(EventType::Warning, "user-1", &config, &context, &result, now))
            .await;
        assert_eq!(outcome, RecordOutcome::Failed);

        repo.set_failing(false);
        let outcome = recorder
            .record(record(EventType::Warning, "user-1", &config, &context, &result, now))
            .await;
        assert_eq!(outcome, RecordOutcome::Recorded);
    }

    #[test]
    fn test_payload_masks_identity_per_config() {
        let mut config = builtin_default("registration-email").unwrap();
        config.store_email_in_events = true;
        config.store_ip_in_events = false;
        let context = EventContext {
            user_id: Some("u-42".to_string()),
            ip: Some("203.0.113.9".to_string()),
            email: Some("alice@example.org".to_string()),
        };
        let now = Utc::now();
        let result = allowed(now);

        let event = build_event(&DecisionRecord {
            module: "registration-email",
            ..record(
                EventType::Warning,
                "alice@example.org",
                &config,
                &context,
                &result,
                now,
            )
        });

        assert_eq!(event.actor.as_deref(), Some("u-42"));
        assert_eq!(event.subject, "a***e@e*********g");
        assert_eq!(event.payload["email"], "a***e@e*********g");
        assert!(event.payload.get("ip").is_none());
        assert_eq!(event.source, "rate-limit");
    }

    #[test]
    fn test_prune_and_forget() {
        let recorder = EventRecorder::new(
            Arc::new(MemoryEventRepository::default()),
            Duration::from_secs(60),
        );
        let now = Utc::now();
        recorder.claim_warning(&("auth".into(), "a".into()), now - ChronoDuration::seconds(120));
        recorder.claim_warning(&("auth".into(), "b".into()), now);
        recorder.claim_warning(&("export".into(), "b".into()), now);

        assert_eq!(recorder.prune_expired(now), 1);
        recorder.forget(Some("b"), Some("auth"));
        assert_eq!(recorder.recent_warnings.len(), 1);
        recorder.forget(None, None);
        assert!(recorder.recent_warnings.is_empty());
    }
}
