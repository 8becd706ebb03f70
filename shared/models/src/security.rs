use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

/// Severity of a security event or alert. Totally ordered: Low < Medium < High < Critical.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Numeric rank used for ordering in SQL (`ORDER BY CASE severity ...`).
    pub fn rank(&self) -> i32 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
            Severity::Critical => 4,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// Enumerated kinds of security events raised by the admission pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEventType {
    AuthFailure,
    RateLimitExceeded,
    SqlInjectionAttempt,
    XssAttempt,
    PathTraversalAttempt,
    CsrfRejected,
    InvalidContentType,
    PrivilegeEscalation,
    SuspiciousActivity,
    UnauthorizedAccess,
}

impl SecurityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventType::AuthFailure => "AUTH_FAILURE",
            SecurityEventType::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            SecurityEventType::SqlInjectionAttempt => "SQL_INJECTION_ATTEMPT",
            SecurityEventType::XssAttempt => "XSS_ATTEMPT",
            SecurityEventType::PathTraversalAttempt => "PATH_TRAVERSAL_ATTEMPT",
            SecurityEventType::CsrfRejected => "CSRF_REJECTED",
            SecurityEventType::InvalidContentType => "INVALID_CONTENT_TYPE",
            SecurityEventType::PrivilegeEscalation => "PRIVILEGE_ESCALATION",
            SecurityEventType::SuspiciousActivity => "SUSPICIOUS_ACTIVITY",
            SecurityEventType::UnauthorizedAccess => "UNAUTHORIZED_ACCESS",
        }
    }
}

impl fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AUTH_FAILURE" => Ok(SecurityEventType::AuthFailure),
            "RATE_LIMIT_EXCEEDED" => Ok(SecurityEventType::RateLimitExceeded),
            "SQL_INJECTION_ATTEMPT" => Ok(SecurityEventType::SqlInjectionAttempt),
            "XSS_ATTEMPT" => Ok(SecurityEventType::XssAttempt),
            "PATH_TRAVERSAL_ATTEMPT" => Ok(SecurityEventType::PathTraversalAttempt),
            "CSRF_REJECTED" => Ok(SecurityEventType::CsrfRejected),
            "INVALID_CONTENT_TYPE" => Ok(SecurityEventType::InvalidContentType),
            "PRIVILEGE_ESCALATION" => Ok(SecurityEventType::PrivilegeEscalation),
            "SUSPICIOUS_ACTIVITY" => Ok(SecurityEventType::SuspiciousActivity),
            "UNAUTHORIZED_ACCESS" => Ok(SecurityEventType::UnauthorizedAccess),
            other => Err(format!("unknown event type: {}", other)),
        }
    }
}

/// A persisted security event. Immutable once written except for the
/// resolution toggle.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SecurityEvent {
    pub id: Uuid,
    pub event_type: String,
    pub severity: String,
    pub source: String,
    pub actor_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub resolved: bool,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSecurityEventInput {
    pub event_type: SecurityEventType,
    pub severity: Severity,
    pub source: String,
    pub actor_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Query parameters for the event listing endpoint.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct EventQuery {
    pub severity: Option<Severity>,
    pub event_type: Option<SecurityEventType>,
    pub source: Option<String>,
    pub actor_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    #[validate(range(min = 1))]
    pub page: Option<i64>,
    #[validate(range(min = 1))]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

#[derive(Debug, Serialize)]
pub struct EventPage {
    pub events: Vec<SecurityEvent>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CountBucket {
    pub key: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct EventSummary {
    pub total: i64,
    pub unresolved: i64,
    pub by_severity: Vec<CountBucket>,
    pub by_type: Vec<CountBucket>,
    pub by_source: Vec<CountBucket>,
}

/// A deduplicated alert produced by the threshold engine. At most one
/// active (triggered, unacknowledged) alert exists per alert_type.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SecurityAlert {
    pub id: Uuid,
    pub alert_type: String,
    pub severity: String,
    pub title: String,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
    pub triggered: bool,
    pub acknowledged: bool,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct AlertStatistics {
    pub active: i64,
    pub by_severity: Vec<CountBucket>,
}

#[derive(Debug, Serialize)]
pub struct AlertPage {
    pub alerts: Vec<SecurityAlert>,
    pub statistics: AlertStatistics,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResolveEventRequest {
    #[validate(length(min = 1, max = 100, message = "resolved_by is required"))]
    pub resolved_by: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_is_totally_ordered() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
        assert_eq!(Severity::Critical.rank(), 4);
    }

    #[test]
    fn event_type_round_trips_through_str() {
        for ty in [
            SecurityEventType::AuthFailure,
            SecurityEventType::RateLimitExceeded,
            SecurityEventType::SqlInjectionAttempt,
            SecurityEventType::UnauthorizedAccess,
        ] {
            assert_eq!(ty.as_str().parse::<SecurityEventType>().unwrap(), ty);
        }
        assert!("NOT_A_THING".parse::<SecurityEventType>().is_err());
    }

    #[test]
    fn severity_serializes_uppercase() {
        let json = serde_json::to_string(&Severity::High).unwrap();
        assert_eq!(json, "\"HIGH\"");
        let back: Severity = serde_json::from_str("\"CRITICAL\"").unwrap();
        assert_eq!(back, Severity::Critical);
    }
}
