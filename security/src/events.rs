use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::errors::ServiceError;
use threatgate_middleware::EventSink;
use threatgate_models::security::{
    CountBucket, CreateSecurityEventInput, EventPage, EventQuery, EventSummary, Pagination,
    SecurityEvent,
};

const MAX_PAGE_SIZE: i64 = 100;
const DEFAULT_PAGE_SIZE: i64 = 50;

/// Append-only store of security events. Writes on the request path go
/// through `record_detached`, which never fails or blocks the caller's
/// own operation: persistence errors are swallowed and reported on the
/// process log instead.
pub struct SecurityEventLog {
    pool: PgPool,
    /// Nudges the alert engine after a successful write so thresholds are
    /// re-evaluated promptly, not only on the timer.
    alert_nudge: Option<Arc<Notify>>,
}

impl SecurityEventLog {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            alert_nudge: None,
        }
    }

    pub fn with_alert_nudge(pool: PgPool, nudge: Arc<Notify>) -> Self {
        Self {
            pool,
            alert_nudge: Some(nudge),
        }
    }

    /// Append one event and return its id.
    pub async fn record(&self, input: &CreateSecurityEventInput) -> Result<Uuid, ServiceError> {
        let id = insert_event(&self.pool, input).await?;

        if let Some(nudge) = &self.alert_nudge {
            nudge.notify_one();
        }

        Ok(id)
    }

    /// Fire-and-forget append for the request path. Failures must never
    /// surface to the request being admitted or denied.
    pub fn record_detached(&self, input: CreateSecurityEventInput) {
        let pool = self.pool.clone();
        let nudge = self.alert_nudge.clone();
        tokio::spawn(async move {
            match insert_event(&pool, &input).await {
                Ok(_) => {
                    if let Some(nudge) = nudge {
                        nudge.notify_one();
                    }
                }
                Err(e) => {
                    tracing::error!(
                        event_type = input.event_type.as_str(),
                        "Failed to persist security event: {}",
                        e
                    );
                }
            }
        });
    }

    /// Filtered, paginated listing. Newest first; `limit` is clamped so a
    /// single response stays bounded.
    pub async fn query(&self, query: &EventQuery) -> Result<EventPage, ServiceError> {
        let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let page = query.page.unwrap_or(1).max(1);
        let offset = (page - 1) * limit;

        let severity = query.severity.map(|s| s.as_str().to_string());
        let event_type = query.event_type.map(|t| t.as_str().to_string());

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM security_events
            WHERE ($1::text IS NULL OR severity = $1)
              AND ($2::text IS NULL OR event_type = $2)
              AND ($3::text IS NULL OR source = $3)
              AND ($4::text IS NULL OR actor_id = $4)
              AND ($5::timestamptz IS NULL OR created_at >= $5)
              AND ($6::timestamptz IS NULL OR created_at <= $6)
            "#,
        )
        .bind(&severity)
        .bind(&event_type)
        .bind(&query.source)
        .bind(&query.actor_id)
        .bind(query.from)
        .bind(query.to)
        .fetch_one(&self.pool)
        .await?;

        let events = sqlx::query_as::<_, SecurityEvent>(
            r#"
            SELECT * FROM security_events
            WHERE ($1::text IS NULL OR severity = $1)
              AND ($2::text IS NULL OR event_type = $2)
              AND ($3::text IS NULL OR source = $3)
              AND ($4::text IS NULL OR actor_id = $4)
              AND ($5::timestamptz IS NULL OR created_at >= $5)
              AND ($6::timestamptz IS NULL OR created_at <= $6)
            ORDER BY created_at DESC
            LIMIT $7 OFFSET $8
            "#,
        )
        .bind(&severity)
        .bind(&event_type)
        .bind(&query.source)
        .bind(&query.actor_id)
        .bind(query.from)
        .bind(query.to)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total_pages = (total + limit - 1) / limit;

        Ok(EventPage {
            events,
            pagination: Pagination {
                page,
                limit,
                total,
                total_pages,
            },
        })
    }

    /// Counts grouped by severity, type, and source, for the dashboard.
    pub async fn summarize(&self) -> Result<EventSummary, ServiceError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM security_events")
            .fetch_one(&self.pool)
            .await?;

        let unresolved: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM security_events WHERE NOT resolved")
                .fetch_one(&self.pool)
                .await?;

        let by_severity = sqlx::query_as::<_, CountBucket>(
            "SELECT severity AS key, COUNT(*) AS count FROM security_events GROUP BY severity ORDER BY count DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        let by_type = sqlx::query_as::<_, CountBucket>(
            "SELECT event_type AS key, COUNT(*) AS count FROM security_events GROUP BY event_type ORDER BY count DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        let by_source = sqlx::query_as::<_, CountBucket>(
            "SELECT source AS key, COUNT(*) AS count FROM security_events GROUP BY source ORDER BY count DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(EventSummary {
            total,
            unresolved,
            by_severity,
            by_type,
            by_source,
        })
    }

    /// Toggle an event's resolution state.
    pub async fn resolve(
        &self,
        event_id: Uuid,
        resolved_by: &str,
    ) -> Result<SecurityEvent, ServiceError> {
        let event = sqlx::query_as::<_, SecurityEvent>(
            r#"
            UPDATE security_events
            SET resolved = true, resolved_by = $2, resolved_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(event_id)
        .bind(resolved_by)
        .fetch_optional(&self.pool)
        .await?;

        event.ok_or(ServiceError::NotFound)
    }
}

impl EventSink for SecurityEventLog {
    fn record(&self, input: CreateSecurityEventInput) {
        self.record_detached(input);
    }
}

async fn insert_event(
    pool: &PgPool,
    input: &CreateSecurityEventInput,
) -> Result<Uuid, ServiceError> {
    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO security_events (
            event_type, severity, source, actor_id, ip_address, user_agent, metadata
        ) VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id
        "#,
    )
    .bind(input.event_type.as_str())
    .bind(input.severity.as_str())
    .bind(&input.source)
    .bind(input.actor_id.as_deref())
    .bind(input.ip_address.as_deref())
    .bind(input.user_agent.as_deref())
    .bind(&input.metadata)
    .fetch_one(pool)
    .await?;

    Ok(id)
}
