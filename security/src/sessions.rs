use chrono::{Duration, Utc};
use ring::rand::SystemRandom;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::events::SecurityEventLog;
use crate::tokens::generate_secret;
use threatgate_models::security::{CreateSecurityEventInput, SecurityEventType, Severity};
use threatgate_models::sessions::{AdminSession, CreatedSession};

const TOKEN_PREFIX: &str = "tgs_";

/// Tracks last-seen time and validity for administrative sessions,
/// independent of the request guard. The authentication layer creates a
/// session after verifying credentials; this service only enforces the
/// idle timeout and records attempts against dead sessions.
pub struct SessionActivityTracker {
    pool: PgPool,
    events: Arc<SecurityEventLog>,
    idle_timeout: Duration,
    rng: SystemRandom,
}

impl SessionActivityTracker {
    pub fn new(pool: PgPool, events: Arc<SecurityEventLog>, idle_timeout_minutes: i64) -> Self {
        Self {
            pool,
            events,
            idle_timeout: Duration::minutes(idle_timeout_minutes),
            rng: SystemRandom::new(),
        }
    }

    pub async fn create_session(&self, admin_id: Uuid) -> Result<CreatedSession, ServiceError> {
        let token = generate_secret(&self.rng, TOKEN_PREFIX)?;
        let expires_at = Utc::now() + self.idle_timeout;

        let session = sqlx::query_as::<_, AdminSession>(
            r#"
            INSERT INTO admin_sessions (admin_id, session_token, expires_at)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(admin_id)
        .bind(&token)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(admin = %admin_id, "Created admin session");

        Ok(CreatedSession { session, token })
    }

    /// Refresh activity and extend the idle window. Returns false when the
    /// session is missing, inactive, or already expired.
    pub async fn touch(&self, session_token: &str) -> Result<bool, ServiceError> {
        let expires_at = Utc::now() + self.idle_timeout;

        let result = sqlx::query(
            r#"
            UPDATE admin_sessions
            SET last_activity_at = NOW(), expires_at = $2, updated_at = NOW()
            WHERE session_token = $1 AND is_active AND expires_at > NOW()
            "#,
        )
        .bind(session_token)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// True iff the session exists, is active, and has not expired.
    pub async fn is_valid(&self, session_token: &str) -> Result<bool, ServiceError> {
        let valid: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM admin_sessions WHERE session_token = $1 AND is_active AND expires_at > NOW())",
        )
        .bind(session_token)
        .fetch_one(&self.pool)
        .await?;

        Ok(valid)
    }

    /// Resolve a presented token to its session, recording an
    /// UNAUTHORIZED_ACCESS event when access was attempted with a missing
    /// or dead session. Database errors propagate: validity checks fail
    /// closed.
    pub async fn authorize(
        &self,
        session_token: Option<&str>,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<AdminSession, ServiceError> {
        let token = match session_token {
            Some(token) if !token.is_empty() => token,
            _ => {
                self.record_rejection(None, ip, user_agent, "missing session token");
                return Err(ServiceError::Unauthorized);
            }
        };

        let session = sqlx::query_as::<_, AdminSession>(
            "SELECT * FROM admin_sessions WHERE session_token = $1 AND is_active AND expires_at > NOW()",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        match session {
            Some(session) => Ok(session),
            None => {
                self.record_rejection(None, ip, user_agent, "invalid or expired session");
                Err(ServiceError::Unauthorized)
            }
        }
    }

    /// Idempotent revocation.
    pub async fn revoke(&self, session_token: &str) -> Result<(), ServiceError> {
        sqlx::query(
            "UPDATE admin_sessions SET is_active = false, updated_at = NOW() WHERE session_token = $1",
        )
        .bind(session_token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark expired sessions inactive; run hourly.
    pub async fn cleanup_expired_sessions(&self) -> Result<u64, ServiceError> {
        let result = sqlx::query(
            "UPDATE admin_sessions SET is_active = false, updated_at = NOW() WHERE is_active AND expires_at < NOW()",
        )
        .execute(&self.pool)
        .await?;

        let expired = result.rows_affected();
        if expired > 0 {
            tracing::info!("Cleaned up {} expired admin sessions", expired);
        }
        Ok(expired)
    }

    fn record_rejection(
        &self,
        admin_id: Option<Uuid>,
        ip: Option<&str>,
        user_agent: Option<&str>,
        detail: &str,
    ) {
        self.events.record_detached(CreateSecurityEventInput {
            event_type: SecurityEventType::UnauthorizedAccess,
            severity: Severity::Medium,
            source: "admin-sessions".to_string(),
            actor_id: admin_id.map(|id| id.to_string()),
            ip_address: ip.map(|v| v.to_string()),
            user_agent: user_agent.map(|v| v.to_string()),
            metadata: Some(json!({ "detail": detail })),
        });
    }
}

pub async fn session_cleanup_task(tracker: Arc<SessionActivityTracker>) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(3600));

    loop {
        interval.tick().await;
        if let Err(e) = tracker.cleanup_expired_sessions().await {
            tracing::error!("Failed to cleanup expired sessions: {}", e);
        }
    }
}
