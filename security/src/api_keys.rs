use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ring::rand::SystemRandom;
use serde_json::json;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::events::SecurityEventLog;
use crate::tokens::generate_secret;
use threatgate_middleware::{ApiKeyGate, KeyAdmission, RateLimiter};
use threatgate_models::keys::{
    is_known_capability, ApiKey, ApiKeyUsageBucket, CreateApiKeyRequest, CreatedApiKey,
};
use threatgate_models::security::{CreateSecurityEventInput, SecurityEventType, Severity};

const SECRET_PREFIX: &str = "tgk_";

/// Issues, validates, and revokes API keys. The plaintext secret exists
/// only in the creation response; storage holds its SHA-256 digest.
pub struct ApiKeyManager {
    pool: PgPool,
    limiter: Arc<RateLimiter>,
    events: Arc<SecurityEventLog>,
    rng: SystemRandom,
}

impl ApiKeyManager {
    pub fn new(pool: PgPool, limiter: Arc<RateLimiter>, events: Arc<SecurityEventLog>) -> Self {
        Self {
            pool,
            limiter,
            events,
            rng: SystemRandom::new(),
        }
    }

    pub async fn create_key(
        &self,
        owner_id: Uuid,
        request: &CreateApiKeyRequest,
    ) -> Result<CreatedApiKey, ServiceError> {
        validate_permissions(&request.permissions)?;

        let secret = generate_secret(&self.rng, SECRET_PREFIX)?;
        let digest = digest_secret(&secret);
        let expires_at = request.expires_in_days.map(|days| Utc::now() + Duration::days(days));

        let key = sqlx::query_as::<_, ApiKey>(
            r#"
            INSERT INTO api_keys (
                owner_id, name, key_digest, permissions, rate_limit, expires_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(owner_id)
        .bind(&request.name)
        .bind(&digest)
        .bind(&request.permissions)
        .bind(request.rate_limit)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(key_id = %key.id, owner = %owner_id, "Issued API key '{}'", key.name);

        Ok(CreatedApiKey { key, secret })
    }

    /// Resolve a presented secret to its key record. Inactive, expired,
    /// and unknown secrets are indistinguishable to the caller; each
    /// failure records an UNAUTHORIZED_ACCESS event. Database errors
    /// propagate so the caller fails closed.
    pub async fn validate_key(
        &self,
        presented: &str,
        endpoint: &str,
        ip: Option<&str>,
    ) -> Result<Option<ApiKey>, ServiceError> {
        let digest = digest_secret(presented);

        let candidate = sqlx::query_as::<_, ApiKey>(
            "SELECT * FROM api_keys WHERE key_digest = $1",
        )
        .bind(&digest)
        .fetch_optional(&self.pool)
        .await?;

        let key = match candidate {
            Some(key) if digests_match(&key.key_digest, &digest) => key,
            _ => {
                self.record_rejection(None, endpoint, ip, "unknown key");
                return Ok(None);
            }
        };

        if !is_usable(&key, Utc::now()) {
            self.record_rejection(Some(&key), endpoint, ip, "inactive or expired key");
            return Ok(None);
        }

        Ok(Some(key))
    }

    /// Per-key quota check against the key's own configured per-minute
    /// limit, delegated to the shared fixed-window limiter.
    pub fn check_rate_limit(&self, key: &ApiKey) -> threatgate_middleware::RateLimitDecision {
        self.limiter.check(
            &format!("api-key:{}", key.id),
            key.rate_limit.max(0) as u32,
            Duration::minutes(1),
        )
    }

    /// Fire-and-forget usage sample; never blocks the request path.
    pub fn record_usage_detached(&self, key_id: Uuid, endpoint: &str, status: u16, duration_ms: i64) {
        let pool = self.pool.clone();
        let endpoint = endpoint.to_string();
        tokio::spawn(async move {
            let result = async {
                sqlx::query(
                    "UPDATE api_keys SET usage_count = usage_count + 1, last_used_at = NOW(), updated_at = NOW() WHERE id = $1",
                )
                .bind(key_id)
                .execute(&pool)
                .await?;

                sqlx::query(
                    "INSERT INTO api_key_usage (api_key_id, endpoint, status_code, duration_ms) VALUES ($1, $2, $3, $4)",
                )
                .bind(key_id)
                .bind(&endpoint)
                .bind(status as i32)
                .bind(duration_ms)
                .execute(&pool)
                .await?;

                Ok::<_, sqlx::Error>(())
            }
            .await;

            if let Err(e) = result {
                tracing::error!(key_id = %key_id, "Failed to record API key usage: {}", e);
            }
        });
    }

    pub async fn list_keys(&self) -> Result<Vec<ApiKey>, ServiceError> {
        let keys = sqlx::query_as::<_, ApiKey>("SELECT * FROM api_keys ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(keys)
    }

    pub async fn get_key(&self, key_id: Uuid) -> Result<ApiKey, ServiceError> {
        sqlx::query_as::<_, ApiKey>("SELECT * FROM api_keys WHERE id = $1")
            .bind(key_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(ServiceError::NotFound)
    }

    /// Idempotent activation toggle.
    pub async fn set_active(&self, key_id: Uuid, active: bool) -> Result<ApiKey, ServiceError> {
        sqlx::query_as::<_, ApiKey>(
            "UPDATE api_keys SET is_active = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(key_id)
        .bind(active)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ServiceError::NotFound)
    }

    /// Delete a key; idempotent. Its usage history goes with it (cascade).
    pub async fn delete_key(&self, key_id: Uuid) -> Result<(), ServiceError> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = $1")
            .bind(key_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            tracing::info!(key_id = %key_id, "Deleted API key and its usage history");
        }
        Ok(())
    }

    /// Recorded usage aggregated per endpoint.
    pub async fn usage_summary(&self, key_id: Uuid) -> Result<Vec<ApiKeyUsageBucket>, ServiceError> {
        let buckets = sqlx::query_as::<_, ApiKeyUsageBucket>(
            r#"
            SELECT endpoint,
                   COUNT(*) AS requests,
                   AVG(duration_ms)::float8 AS avg_duration_ms
            FROM api_key_usage
            WHERE api_key_id = $1
            GROUP BY endpoint
            ORDER BY requests DESC
            "#,
        )
        .bind(key_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(buckets)
    }

    fn record_rejection(&self, key: Option<&ApiKey>, endpoint: &str, ip: Option<&str>, detail: &str) {
        self.events.record_detached(CreateSecurityEventInput {
            event_type: SecurityEventType::UnauthorizedAccess,
            severity: Severity::Medium,
            source: "api-keys".to_string(),
            actor_id: key.map(|k| k.owner_id.to_string()),
            ip_address: ip.map(|v| v.to_string()),
            user_agent: None,
            metadata: Some(json!({
                "endpoint": endpoint,
                "detail": detail,
            })),
        });
    }

    fn record_rate_limit_breach(&self, key: &ApiKey, endpoint: &str, ip: Option<&str>) {
        self.events.record_detached(CreateSecurityEventInput {
            event_type: SecurityEventType::RateLimitExceeded,
            severity: Severity::Medium,
            source: "api-keys".to_string(),
            actor_id: Some(key.owner_id.to_string()),
            ip_address: ip.map(|v| v.to_string()),
            user_agent: None,
            metadata: Some(json!({
                "endpoint": endpoint,
                "key_id": key.id,
                "rate_limit": key.rate_limit,
            })),
        });
    }
}

#[async_trait]
impl ApiKeyGate for ApiKeyManager {
    async fn admit(&self, presented: &str, endpoint: &str, ip: Option<&str>) -> KeyAdmission {
        let key = match self.validate_key(presented, endpoint, ip).await {
            Ok(Some(key)) => key,
            Ok(None) => return KeyAdmission::Invalid,
            Err(e) => {
                // Fail closed: an unreachable store denies rather than
                // silently admitting.
                tracing::error!("API key validation unavailable, denying: {}", e);
                return KeyAdmission::Invalid;
            }
        };

        let decision = self.check_rate_limit(&key);
        if !decision.allowed {
            self.record_rate_limit_breach(&key, endpoint, ip);
            let retry_after_secs = (decision.reset_at - Utc::now()).num_seconds().max(0);
            return KeyAdmission::Limited { retry_after_secs };
        }

        KeyAdmission::Granted {
            key_id: key.id,
            permissions: key.permissions.clone(),
        }
    }

    fn record_usage(&self, key_id: Uuid, endpoint: &str, status: u16, duration_ms: i64) {
        self.record_usage_detached(key_id, endpoint, status, duration_ms);
    }
}

/// SHA-256 hex digest of a plaintext secret.
pub fn digest_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Constant-time digest comparison; lookup by index plus this re-check
/// keeps validation free of timing side channels.
pub fn digests_match(stored: &str, computed: &str) -> bool {
    constant_time_eq::constant_time_eq(stored.as_bytes(), computed.as_bytes())
}

pub fn is_usable(key: &ApiKey, now: DateTime<Utc>) -> bool {
    if !key.is_active {
        return false;
    }
    match key.expires_at {
        Some(expires_at) => expires_at > now,
        None => true,
    }
}

fn validate_permissions(permissions: &[String]) -> Result<(), ServiceError> {
    if permissions.is_empty() {
        return Err(ServiceError::Validation(
            "At least one permission is required".to_string(),
        ));
    }
    for permission in permissions {
        if !is_known_capability(permission) {
            return Err(ServiceError::Validation(format!(
                "Unknown capability: {}",
                permission
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_key(active: bool, expires_at: Option<DateTime<Utc>>) -> ApiKey {
        ApiKey {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            name: "test".to_string(),
            key_digest: digest_secret("tgk_sample"),
            permissions: vec!["read:content".to_string()],
            rate_limit: 60,
            is_active: active,
            expires_at,
            usage_count: 0,
            last_used_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn digest_is_stable_and_hex() {
        let digest = digest_secret("tgk_abc");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, digest_secret("tgk_abc"));
        assert_ne!(digest, digest_secret("tgk_abd"));
    }

    #[test]
    fn digests_compare_in_constant_time_wrapper() {
        let digest = digest_secret("tgk_abc");
        assert!(digests_match(&digest, &digest_secret("tgk_abc")));
        assert!(!digests_match(&digest, &digest_secret("tgk_other")));
    }

    #[test]
    fn inactive_and_expired_keys_are_unusable() {
        let now = Utc::now();
        assert!(is_usable(&sample_key(true, None), now));
        assert!(is_usable(&sample_key(true, Some(now + Duration::days(1))), now));
        assert!(!is_usable(&sample_key(false, None), now));
        assert!(!is_usable(&sample_key(true, Some(now - Duration::seconds(1))), now));
    }

    #[test]
    fn permission_vocabulary_is_enforced() {
        assert!(validate_permissions(&["read:content".to_string()]).is_ok());
        assert!(validate_permissions(&[]).is_err());
        assert!(validate_permissions(&["read:content".to_string(), "launch:missiles".to_string()]).is_err());
    }
}
