use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Whether over-limit callers are denied or only observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementMode {
    Enforce,
    Monitor,
}

impl EnforcementMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enforce => "enforce",
            Self::Monitor => "monitor",
        }
    }
}

impl fmt::Display for EnforcementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnforcementMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "enforce" => Ok(Self::Enforce),
            "monitor" => Ok(Self::Monitor),
            other => Err(format!("unknown enforcement mode '{other}'")),
        }
    }
}

/// Rate-limit policy for one module, used as an immutable snapshot per decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// Ceiling per window.
    pub max_requests: u32,
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// How long an over-limit key stays blocked, in milliseconds.
    pub block_ms: u64,
    /// Remaining-request count at which warnings start.
    pub warn_threshold: u32,
    pub is_active: bool,
    pub mode: EnforcementMode,
    pub store_email_in_events: bool,
    pub store_ip_in_events: bool,
    /// Set when no explicit policy exists and the template was substituted.
    pub is_fallback: bool,
}

impl RateLimitConfig {
    /// The policy synthesized for modules nobody configured.
    pub fn fallback_template() -> Self {
        Self {
            max_requests: 100,
            window_ms: 60_000,
            block_ms: 0,
            warn_threshold: 10,
            is_active: false,
            mode: EnforcementMode::Monitor,
            store_email_in_events: false,
            store_ip_in_events: false,
            is_fallback: true,
        }
    }

    /// Applies the explicitly set fields of `patch` over this config.
    pub fn apply(&mut self, patch: &RateLimitConfigPatch) {
        if let Some(v) = patch.max_requests {
            self.max_requests = v;
        }
        if let Some(v) = patch.window_ms {
            self.window_ms = v;
        }
        if let Some(v) = patch.block_ms {
            self.block_ms = v;
        }
        if let Some(v) = patch.warn_threshold {
            self.warn_threshold = v;
        }
        if let Some(v) = patch.is_active {
            self.is_active = v;
        }
        if let Some(v) = patch.mode {
            self.mode = v;
        }
        if let Some(v) = patch.store_email_in_events {
            self.store_email_in_events = v;
        }
        if let Some(v) = patch.store_ip_in_events {
            self.store_ip_in_events = v;
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_requests == 0 {
            return Err("maxRequests must be greater than zero".to_string());
        }
        if self.window_ms == 0 {
            return Err("windowMs must be greater than zero".to_string());
        }
        check_duration("windowMs", self.window_ms)?;
        check_duration("blockMs", self.block_ms)
    }
}

/// Partial policy update. Omitted fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfigPatch {
    pub max_requests: Option<u32>,
    pub window_ms: Option<u64>,
    pub block_ms: Option<u64>,
    pub warn_threshold: Option<u32>,
    pub is_active: Option<bool>,
    pub mode: Option<EnforcementMode>,
    pub store_email_in_events: Option<bool>,
    pub store_ip_in_events: Option<bool>,
}

impl RateLimitConfigPatch {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_requests == Some(0) {
            return Err("maxRequests must be greater than zero".to_string());
        }
        if self.window_ms == Some(0) {
            return Err("windowMs must be greater than zero".to_string());
        }
        if let Some(v) = self.window_ms {
            check_duration("windowMs", v)?;
        }
        if let Some(v) = self.block_ms {
            check_duration("blockMs", v)?;
        }
        Ok(())
    }
}

/// Longest accepted window or block: ten years.
pub const MAX_DURATION_MS: u64 = 10 * 365 * 24 * HOUR_MS;

fn check_duration(field: &str, ms: u64) -> Result<(), String> {
    if ms > MAX_DURATION_MS {
        return Err(format!("{field} must be at most {MAX_DURATION_MS}"));
    }
    Ok(())
}

const MINUTE_MS: u64 = 60_000;
const HOUR_MS: u64 = 60 * MINUTE_MS;

struct ModuleDefault {
    module: &'static str,
    max_requests: u32,
    window_ms: u64,
    block_ms: u64,
    warn_threshold: u32,
    mode: EnforcementMode,
}

const BUILTIN_MODULES: &[ModuleDefault] = &[
    ModuleDefault {
        module: "auth",
        max_requests: 5,
        window_ms: 15 * MINUTE_MS,
        block_ms: 30 * MINUTE_MS,
        warn_threshold: 0,
        mode: EnforcementMode::Enforce,
    },
    ModuleDefault {
        module: "registration-ip",
        max_requests: 5,
        window_ms: HOUR_MS,
        block_ms: HOUR_MS,
        warn_threshold: 1,
        mode: EnforcementMode::Enforce,
    },
    ModuleDefault {
        module: "registration-email",
        max_requests: 3,
        window_ms: HOUR_MS,
        block_ms: HOUR_MS,
        warn_threshold: 1,
        mode: EnforcementMode::Enforce,
    },
    ModuleDefault {
        module: "password-reset",
        max_requests: 3,
        window_ms: HOUR_MS,
        block_ms: HOUR_MS,
        warn_threshold: 1,
        mode: EnforcementMode::Enforce,
    },
    ModuleDefault {
        module: "email-verification",
        max_requests: 5,
        window_ms: HOUR_MS,
        block_ms: 30 * MINUTE_MS,
        warn_threshold: 1,
        mode: EnforcementMode::Enforce,
    },
    ModuleDefault {
        module: "export",
        max_requests: 10,
        window_ms: HOUR_MS,
        block_ms: HOUR_MS,
        warn_threshold: 2,
        mode: EnforcementMode::Enforce,
    },
    ModuleDefault {
        module: "import",
        max_requests: 10,
        window_ms: HOUR_MS,
        block_ms: HOUR_MS,
        warn_threshold: 2,
        mode: EnforcementMode::Enforce,
    },
    ModuleDefault {
        module: "chat-message",
        max_requests: 30,
        window_ms: MINUTE_MS,
        block_ms: 5 * MINUTE_MS,
        warn_threshold: 5,
        mode: EnforcementMode::Enforce,
    },
    ModuleDefault {
        module: "translation",
        max_requests: 100,
        window_ms: HOUR_MS,
        block_ms: 15 * MINUTE_MS,
        warn_threshold: 10,
        mode: EnforcementMode::Enforce,
    },
    ModuleDefault {
        module: "api-general",
        max_requests: 600,
        window_ms: MINUTE_MS,
        block_ms: MINUTE_MS,
        warn_threshold: 60,
        mode: EnforcementMode::Monitor,
    },
];

/// Names of the modules that ship with a hard-coded default policy.
pub fn builtin_modules() -> impl Iterator<Item = &'static str> {
    BUILTIN_MODULES.iter().map(|d| d.module)
}

/// Built-in default policy for a known module.
pub fn builtin_default(module: &str) -> Option<RateLimitConfig> {
    BUILTIN_MODULES
        .iter()
        .find(|d| d.module == module)
        .map(|d| RateLimitConfig {
            max_requests: d.max_requests,
            window_ms: d.window_ms,
            block_ms: d.block_ms,
            warn_threshold: d.warn_threshold,
            is_active: true,
            mode: d.mode,
            store_email_in_events: false,
            store_ip_in_events: true,
            is_fallback: false,
        })
}

/// Default for a module on first creation: built-in if known, otherwise an
/// active copy of the fallback template.
pub fn creation_default(module: &str) -> RateLimitConfig {
    builtin_default(module).unwrap_or_else(|| RateLimitConfig {
        is_active: true,
        is_fallback: false,
        ..RateLimitConfig::fallback_template()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_auth_default_matches_login_policy() {
        let auth = builtin_default("auth").unwrap();
        assert_eq!(auth.max_requests, 5);
        assert_eq!(auth.window_ms, 900_000);
        assert_eq!(auth.block_ms, 1_800_000);
        assert_eq!(auth.warn_threshold, 0);
        assert_eq!(auth.mode, EnforcementMode::Enforce);
        assert!(auth.is_active);
        assert!(!auth.is_fallback);
    }

    #[test]
    fn test_fallback_template_is_inactive_monitor() {
        let template = RateLimitConfig::fallback_template();
        assert!(!template.is_active);
        assert_eq!(template.mode, EnforcementMode::Monitor);
        assert!(template.is_fallback);
    }

    #[test]
    fn test_apply_only_touches_set_fields() {
        let mut config = builtin_default("auth").unwrap();
        config.apply(&RateLimitConfigPatch {
            max_requests: Some(10),
            mode: Some(EnforcementMode::Monitor),
            ..Default::default()
        });

        assert_eq!(config.max_requests, 10);
        assert_eq!(config.mode, EnforcementMode::Monitor);
        assert_eq!(config.window_ms, 900_000);
        assert_eq!(config.block_ms, 1_800_000);
    }

    #[test]
    fn test_patch_rejects_zero_ceiling() {
        let patch = RateLimitConfigPatch {
            max_requests: Some(0),
            ..Default::default()
        };
        assert!(patch.validate().is_err());
    }

    #[rstest]
    #[case::window(Some(MAX_DURATION_MS + 1), None)]
    #[case::block(None, Some(MAX_DURATION_MS + 1))]
    #[case::block_max(None, Some(u64::MAX))]
    fn test_durations_beyond_ten_years_are_rejected(
        #[case] window_ms: Option<u64>,
        #[case] block_ms: Option<u64>,
    ) {
        let patch = RateLimitConfigPatch {
            window_ms,
            block_ms,
            ..Default::default()
        };
        assert!(patch.validate().is_err());

        let mut config = builtin_default("auth").unwrap();
        config.apply(&patch);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ten_year_block_is_accepted() {
        let mut config = builtin_default("auth").unwrap();
        config.block_ms = MAX_DURATION_MS;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_mode_parses_case_insensitively() {
        assert_eq!("ENFORCE".parse::<EnforcementMode>(), Ok(EnforcementMode::Enforce));
        assert!("block".parse::<EnforcementMode>().is_err());
    }
}
