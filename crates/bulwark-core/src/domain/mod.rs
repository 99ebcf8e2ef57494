//! Domain types and pure admission rules.

pub mod config;
pub mod decision;
pub mod event;
pub mod masking;

pub use config::{
    EnforcementMode, RateLimitConfig, RateLimitConfigPatch, builtin_default, builtin_modules,
    creation_default,
};
pub use decision::{
    Backend, BackendHealth, ConsumeRequest, ConsumeResult, CounterSnapshot, Evaluation,
    StoreDecision, blocked_result, evaluate,
};
pub use event::{EVENT_SOURCE, EventContext, EventType, RateLimitEvent, Severity};
