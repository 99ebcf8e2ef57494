use std::fmt;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use super::config::{EnforcementMode, RateLimitConfig};
use super::event::EventType;

/// One unit of admission work for a counter store.
#[derive(Debug, Clone)]
pub struct ConsumeRequest<'a> {
    pub key: &'a str,
    pub module: &'a str,
    pub config: &'a RateLimitConfig,
    /// `false` performs a read-only check.
    pub increment: bool,
    pub now: DateTime<Utc>,
}

/// Admission decision returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeResult {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_time: DateTime<Utc>,
    pub warning: bool,
    pub blocked_until: Option<DateTime<Utc>>,
}

impl ConsumeResult {
    /// Result for a key that is not rate-limited at all.
    pub fn unlimited(config: &RateLimitConfig, now: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            remaining: config.max_requests,
            reset_time: window_deadline(config, now),
            warning: false,
            blocked_until: None,
        }
    }

    /// Whole seconds until the block lifts, rounded up.
    pub fn retry_after_seconds(&self, now: DateTime<Utc>) -> Option<u64> {
        let until = self.blocked_until?;
        let millis = (until - now).num_milliseconds().max(0);
        Some(u64::try_from(millis).unwrap_or(0).div_ceil(1000))
    }
}

/// Denial for a key whose block record is still live. Counters stay untouched.
pub fn blocked_result(blocked_until: DateTime<Utc>, reset_time: DateTime<Utc>) -> ConsumeResult {
    ConsumeResult {
        allowed: false,
        remaining: 0,
        reset_time,
        warning: false,
        blocked_until: Some(blocked_until),
    }
}

/// Outcome of evaluating a counter value against a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub result: ConsumeResult,
    /// Block record the store must write, if any.
    pub block: Option<DateTime<Utc>>,
    /// Audit event the decision calls for.
    pub event: Option<EventType>,
}

/// Applies the admission rules to the post-consume `count`.
///
/// Read-only checks report the state but never write blocks or raise events.
pub fn evaluate(
    config: &RateLimitConfig,
    count: u32,
    increment: bool,
    now: DateTime<Utc>,
    reset_time: DateTime<Utc>,
) -> Evaluation {
    let remaining = config.max_requests.saturating_sub(count);

    if count > config.max_requests {
        return match config.mode {
            EnforcementMode::Enforce => {
                let blocked_until = block_deadline(config, now);
                Evaluation {
                    result: ConsumeResult {
                        allowed: false,
                        remaining: 0,
                        reset_time,
                        warning: false,
                        blocked_until: Some(blocked_until),
                    },
                    block: increment.then_some(blocked_until),
                    event: increment.then_some(EventType::Block),
                }
            }
            EnforcementMode::Monitor => Evaluation {
                result: ConsumeResult {
                    allowed: true,
                    remaining: 0,
                    reset_time,
                    warning: true,
                    blocked_until: None,
                },
                block: None,
                event: increment.then_some(EventType::Warning),
            },
        };
    }

    let warning = remaining <= config.warn_threshold;
    Evaluation {
        result: ConsumeResult {
            allowed: true,
            remaining,
            reset_time,
            warning,
            blocked_until: None,
        },
        block: None,
        event: (warning && increment).then_some(EventType::Warning),
    }
}

/// `now` shifted by `ms`, saturating at the last representable instant.
pub fn add_millis(now: DateTime<Utc>, ms: u64) -> DateTime<Utc> {
    i64::try_from(ms)
        .ok()
        .and_then(ChronoDuration::try_milliseconds)
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// End of a window opened at `now`.
pub fn window_deadline(config: &RateLimitConfig, now: DateTime<Utc>) -> DateTime<Utc> {
    add_millis(now, config.window_ms)
}

/// End of a block issued at `now`.
pub fn block_deadline(config: &RateLimitConfig, now: DateTime<Utc>) -> DateTime<Utc> {
    add_millis(now, config.block_ms)
}

/// What a counter store hands back to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreDecision {
    pub result: ConsumeResult,
    /// Counter value after this call.
    pub count: u32,
    pub event: Option<EventType>,
}

/// Portable counter/block state used to reseed one backend from another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterSnapshot {
    pub key: String,
    pub module: String,
    pub count: u32,
    /// End of the counting window; `None` when only a block is carried.
    pub window_end: Option<DateTime<Utc>>,
    pub blocked_until: Option<DateTime<Utc>>,
}

/// The two counter backends the coordinator routes between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Primary,
    Fallback,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a backend health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendHealth {
    pub healthy: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BackendHealth {
    pub fn up(latency_ms: u64) -> Self {
        Self {
            healthy: true,
            latency_ms,
            error: None,
        }
    }

    pub fn down(latency_ms: u64, error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            latency_ms,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::builtin_default;
    use rstest::rstest;

    fn auth() -> RateLimitConfig {
        builtin_default("auth").unwrap()
    }

    #[rstest]
    #[case(1, 4)]
    #[case(2, 3)]
    #[case(4, 1)]
    fn test_under_ceiling_is_allowed_without_warning(#[case] count: u32, #[case] remaining: u32) {
        let now = Utc::now();
        let eval = evaluate(&auth(), count, true, now, now);
        assert!(eval.result.allowed);
        assert!(!eval.result.warning);
        assert_eq!(eval.result.remaining, remaining);
        assert_eq!(eval.event, None);
        assert_eq!(eval.block, None);
    }

    #[test]
    fn test_reaching_threshold_warns() {
        let now = Utc::now();
        let eval = evaluate(&auth(), 5, true, now, now);
        assert!(eval.result.allowed);
        assert!(eval.result.warning);
        assert_eq!(eval.result.remaining, 0);
        assert_eq!(eval.event, Some(EventType::Warning));
    }

    #[test]
    fn test_crossing_ceiling_blocks_in_enforce_mode() {
        let now = Utc::now();
        let eval = evaluate(&auth(), 6, true, now, now);
        let until = now + ChronoDuration::milliseconds(1_800_000);
        assert!(!eval.result.allowed);
        assert_eq!(eval.result.blocked_until, Some(until));
        assert_eq!(eval.block, Some(until));
        assert_eq!(eval.event, Some(EventType::Block));
    }

    #[test]
    fn test_oversized_durations_saturate() {
        let mut config = auth();
        config.window_ms = u64::MAX;
        config.block_ms = u64::MAX;
        let now = Utc::now();

        let eval = evaluate(&config, 6, true, now, now);
        assert_eq!(eval.block, Some(DateTime::<Utc>::MAX_UTC));
        assert_eq!(
            ConsumeResult::unlimited(&config, now).reset_time,
            DateTime::<Utc>::MAX_UTC
        );
        assert_eq!(add_millis(now, 1_000), now + ChronoDuration::seconds(1));
    }

    #[rstest]
    #[case(6)]
    #[case(50)]
    fn test_monitor_mode_never_denies(#[case] count: u32) {
        let mut config = auth();
        config.mode = EnforcementMode::Monitor;
        let now = Utc::now();
        let eval = evaluate(&config, count, true, now, now);
        assert!(eval.result.allowed);
        assert!(eval.result.warning);
        assert_eq!(eval.block, None);
        assert_eq!(eval.event, Some(EventType::Warning));
    }

    #[test]
    fn test_read_only_check_has_no_side_effects() {
        let now = Utc::now();
        let eval = evaluate(&auth(), 9, false, now, now);
        assert!(!eval.result.allowed);
        assert_eq!(eval.block, None);
        assert_eq!(eval.event, None);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let now = Utc::now();
        let result = blocked_result(now + ChronoDuration::milliseconds(1_500), now);
        assert_eq!(result.retry_after_seconds(now), Some(2));
        assert_eq!(ConsumeResult::unlimited(&auth(), now).retry_after_seconds(now), None);
    }
}
