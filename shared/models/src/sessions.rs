use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// An administrative session, issued by the authentication layer and
/// tracked here for idle-timeout enforcement.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AdminSession {
    pub id: Uuid,
    pub admin_id: Uuid,
    #[serde(skip_serializing)]
    pub session_token: String,
    pub is_active: bool,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSessionRequest {
    pub admin_id: Uuid,
}

/// Returned only from session creation; the token is never listed again.
#[derive(Debug, Serialize)]
pub struct CreatedSession {
    #[serde(flatten)]
    pub session: AdminSession,
    pub token: String,
}
