use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Fixed capability vocabulary for API keys. Creation requests naming a
/// capability outside this list are rejected.
pub const CAPABILITY_VOCABULARY: &[&str] = &[
    "read:content",
    "write:content",
    "read:events",
    "manage:keys",
    "admin",
];

pub fn is_known_capability(capability: &str) -> bool {
    CAPABILITY_VOCABULARY.contains(&capability)
}

/// An issued API key. The plaintext secret is never stored; `key_digest`
/// holds its SHA-256 and is excluded from serialized responses.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ApiKey {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    #[serde(skip_serializing)]
    pub key_digest: String,
    pub permissions: Vec<String>,
    pub rate_limit: i32,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub usage_count: i64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateApiKeyRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be between 1 and 100 characters"))]
    pub name: String,
    #[validate(length(min = 1, message = "At least one permission is required"))]
    pub permissions: Vec<String>,
    #[validate(range(min = 1, max = 100_000, message = "Rate limit must be between 1 and 100000"))]
    pub rate_limit: i32,
    pub expires_in_days: Option<i64>,
}

/// Returned only from the creation call. The secret cannot be recovered
/// afterwards.
#[derive(Debug, Serialize)]
pub struct CreatedApiKey {
    #[serde(flatten)]
    pub key: ApiKey,
    pub secret: String,
}

/// Per-endpoint aggregation over recorded usage samples.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ApiKeyUsageBucket {
    pub endpoint: String,
    pub requests: i64,
    pub avg_duration_ms: Option<f64>,
}
