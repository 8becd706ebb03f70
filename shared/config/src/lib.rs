pub mod threshold_rules;

pub use threshold_rules::{GroupBy, ThresholdRule};

use std::env;

/// Runtime knobs for the admission pipeline and its background tasks.
/// Loaded once at process start; malformed values fall back to defaults,
/// missing threshold-rule files fall back to the compiled-in rule set,
/// but a malformed rule file aborts startup (see `threshold_rules`).
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Per-IP admission quota: requests allowed per window.
    pub requests_per_window: u32,
    /// Length of the fixed admission window, in seconds.
    pub window_secs: u64,
    /// Whether advisory guard findings reject the request (true) or are
    /// logged and waved through (false).
    pub reject_suspicious: bool,
    /// How often the rate-limiter sweep removes stale windows, in seconds.
    pub rate_limit_cleanup_secs: u64,
    /// Idle timeout applied to admin sessions, in minutes.
    pub session_idle_minutes: i64,
    /// Interval between threshold evaluations, in seconds.
    pub alert_eval_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 100,
            window_secs: 60,
            reject_suspicious: true,
            rate_limit_cleanup_secs: 3600,
            session_idle_minutes: 30,
            alert_eval_secs: 60,
        }
    }
}

impl SecurityConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            requests_per_window: env_parse("ADMISSION_REQUESTS_PER_WINDOW", defaults.requests_per_window),
            window_secs: env_parse("ADMISSION_WINDOW_SECS", defaults.window_secs),
            reject_suspicious: env_parse("REJECT_SUSPICIOUS_REQUESTS", defaults.reject_suspicious),
            rate_limit_cleanup_secs: env_parse("RATE_LIMIT_CLEANUP_SECS", defaults.rate_limit_cleanup_secs),
            session_idle_minutes: env_parse("SESSION_IDLE_MINUTES", defaults.session_idle_minutes),
            alert_eval_secs: env_parse("ALERT_EVAL_INTERVAL_SECS", defaults.alert_eval_secs),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring unparseable value for {}", name);
            default
        }),
        Err(_) => default,
    }
}
