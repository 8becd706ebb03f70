// Security admission and threat-monitoring core.
//
// Everything is wired through `SecurityCore`: one instance per process,
// constructed at startup and handed to request handlers by reference, so
// there is no hidden global mutable state.

pub mod alerts;
pub mod api_keys;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod sessions;
mod tokens;

use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::Notify;

use alerts::AlertManager;
use api_keys::ApiKeyManager;
use events::SecurityEventLog;
use sessions::SessionActivityTracker;
use threatgate_config::{SecurityConfig, ThresholdRule};
use threatgate_middleware::{
    AdmissionConfig, AdmissionMiddleware, ApiKeyGate, EventSink, RateLimiter,
};

#[derive(Clone)]
pub struct SecurityCore {
    pub events: Arc<SecurityEventLog>,
    pub alerts: Arc<AlertManager>,
    pub api_keys: Arc<ApiKeyManager>,
    pub sessions: Arc<SessionActivityTracker>,
    pub limiter: Arc<RateLimiter>,
    config: SecurityConfig,
}

impl SecurityCore {
    pub fn new(pool: PgPool, config: SecurityConfig, rules: Vec<ThresholdRule>) -> Self {
        let nudge = Arc::new(Notify::new());
        let limiter = Arc::new(RateLimiter::with_cleanup_interval(
            chrono::Duration::seconds(config.rate_limit_cleanup_secs as i64),
        ));
        let events = Arc::new(SecurityEventLog::with_alert_nudge(
            pool.clone(),
            Arc::clone(&nudge),
        ));
        let alerts = Arc::new(AlertManager::new(pool.clone(), rules, nudge));
        let api_keys = Arc::new(ApiKeyManager::new(
            pool.clone(),
            Arc::clone(&limiter),
            Arc::clone(&events),
        ));
        let sessions = Arc::new(SessionActivityTracker::new(
            pool,
            Arc::clone(&events),
            config.session_idle_minutes,
        ));

        Self {
            events,
            alerts,
            api_keys,
            sessions,
            limiter,
            config,
        }
    }

    /// Admission middleware sharing this core's limiter, event log, and
    /// key manager.
    pub fn admission_middleware(&self) -> AdmissionMiddleware {
        let admission = AdmissionConfig {
            requests_per_window: self.config.requests_per_window,
            window_secs: self.config.window_secs,
            reject_suspicious: self.config.reject_suspicious,
            ..Default::default()
        };
        AdmissionMiddleware::new(
            admission,
            Arc::clone(&self.limiter),
            Arc::clone(&self.events) as Arc<dyn EventSink>,
            Some(Arc::clone(&self.api_keys) as Arc<dyn ApiKeyGate>),
        )
    }

    /// Rate-limiter sweep, alert evaluation, and session cleanup loops.
    pub fn spawn_background_tasks(&self) {
        tokio::spawn(threatgate_middleware::rate_limiter_sweep_task(
            Arc::clone(&self.limiter),
            self.config.rate_limit_cleanup_secs,
        ));
        tokio::spawn(alerts::alert_evaluation_task(
            Arc::clone(&self.alerts),
            self.config.alert_eval_secs,
        ));
        tokio::spawn(sessions::session_cleanup_task(Arc::clone(&self.sessions)));
    }
}
