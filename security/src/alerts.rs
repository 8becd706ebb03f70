use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::errors::ServiceError;
use threatgate_config::{GroupBy, ThresholdRule};
use threatgate_models::security::{AlertPage, AlertStatistics, CountBucket, SecurityAlert};

/// Evaluates declarative threshold rules over recent security events and
/// maintains the deduplicated set of active alerts. At most one active
/// (triggered, unacknowledged) alert exists per alert_type; a repeated
/// breach refreshes the existing alert instead of duplicating it.
pub struct AlertManager {
    pool: PgPool,
    rules: Vec<ThresholdRule>,
    nudge: Arc<Notify>,
}

impl AlertManager {
    /// Rules must already be validated (`threatgate_config::load_rules`
    /// fails fast at startup).
    pub fn new(pool: PgPool, rules: Vec<ThresholdRule>, nudge: Arc<Notify>) -> Self {
        Self { pool, rules, nudge }
    }

    pub fn nudge_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.nudge)
    }

    /// Run every rule against its window. Returns the number of alerts
    /// created or refreshed.
    pub async fn evaluate_thresholds(&self) -> Result<usize, ServiceError> {
        let mut touched = 0;

        for rule in &self.rules {
            let window_start = Utc::now() - Duration::minutes(rule.window_minutes);

            match rule.group_by {
                GroupBy::None => {
                    let count: i64 = sqlx::query_scalar(
                        "SELECT COUNT(*) FROM security_events WHERE event_type = $1 AND created_at >= $2",
                    )
                    .bind(rule.event_type.as_str())
                    .bind(window_start)
                    .fetch_one(&self.pool)
                    .await?;

                    if count >= rule.threshold {
                        self.upsert_active_alert(rule, None, count).await?;
                        touched += 1;
                    }
                }
                GroupBy::Actor | GroupBy::Ip => {
                    let column = match rule.group_by {
                        GroupBy::Actor => "actor_id",
                        _ => "ip_address",
                    };
                    // The grouping column comes from a fixed match above,
                    // never from input.
                    let sql = format!(
                        "SELECT {col} AS key, COUNT(*) AS count FROM security_events \
                         WHERE event_type = $1 AND created_at >= $2 AND {col} IS NOT NULL \
                         GROUP BY {col} HAVING COUNT(*) >= $3",
                        col = column
                    );
                    let breaches = sqlx::query_as::<_, CountBucket>(&sql)
                        .bind(rule.event_type.as_str())
                        .bind(window_start)
                        .bind(rule.threshold)
                        .fetch_all(&self.pool)
                        .await?;

                    for breach in breaches {
                        self.upsert_active_alert(rule, Some(&breach.key), breach.count)
                            .await?;
                        touched += 1;
                    }
                }
            }
        }

        Ok(touched)
    }

    /// Create or refresh the active alert for a rule. The lookup and the
    /// write happen inside one transaction with a row lock so concurrent
    /// evaluations cannot produce duplicates.
    async fn upsert_active_alert(
        &self,
        rule: &ThresholdRule,
        subject: Option<&str>,
        count: i64,
    ) -> Result<SecurityAlert, ServiceError> {
        let metadata = json!({
            "event_type": rule.event_type.as_str(),
            "window_minutes": rule.window_minutes,
            "threshold": rule.threshold,
            "observed_count": count,
            "subject": subject,
        });
        let message = match subject {
            Some(subject) => format!(
                "{} events of {} from {} within {} minutes",
                count, rule.event_type, subject, rule.window_minutes
            ),
            None => format!(
                "{} events of {} within {} minutes",
                count, rule.event_type, rule.window_minutes
            ),
        };

        let mut tx = self.pool.begin().await?;

        let existing: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM security_alerts WHERE alert_type = $1 AND triggered AND NOT acknowledged FOR UPDATE",
        )
        .bind(&rule.alert_type)
        .fetch_optional(&mut *tx)
        .await?;

        let alert = match existing {
            Some(id) => {
                let alert = sqlx::query_as::<_, SecurityAlert>(
                    r#"
                    UPDATE security_alerts
                    SET metadata = $2, message = $3, updated_at = NOW()
                    WHERE id = $1
                    RETURNING *
                    "#,
                )
                .bind(id)
                .bind(&metadata)
                .bind(&message)
                .fetch_one(&mut *tx)
                .await?;

                tracing::debug!(alert_type = %rule.alert_type, "Refreshed active alert");
                alert
            }
            None => {
                let alert = sqlx::query_as::<_, SecurityAlert>(
                    r#"
                    INSERT INTO security_alerts (
                        alert_type, severity, title, message, metadata, triggered, acknowledged
                    ) VALUES ($1, $2, $3, $4, $5, true, false)
                    RETURNING *
                    "#,
                )
                .bind(&rule.alert_type)
                .bind(rule.severity.as_str())
                .bind(&rule.title)
                .bind(&message)
                .bind(&metadata)
                .fetch_one(&mut *tx)
                .await?;

                tracing::warn!(
                    alert_type = %rule.alert_type,
                    severity = rule.severity.as_str(),
                    "Triggered security alert: {}",
                    message
                );
                alert
            }
        };

        tx.commit().await?;
        Ok(alert)
    }

    /// Acknowledging is terminal: a later breach of the same rule opens a
    /// new alert, preserving history. Acknowledging twice is a no-op.
    pub async fn acknowledge(
        &self,
        alert_id: Uuid,
        admin_id: &str,
    ) -> Result<SecurityAlert, ServiceError> {
        let updated = sqlx::query_as::<_, SecurityAlert>(
            r#"
            UPDATE security_alerts
            SET acknowledged = true, acknowledged_by = $2, acknowledged_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND NOT acknowledged
            RETURNING *
            "#,
        )
        .bind(alert_id)
        .bind(admin_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(alert) = updated {
            return Ok(alert);
        }

        // Already acknowledged, or missing entirely.
        sqlx::query_as::<_, SecurityAlert>("SELECT * FROM security_alerts WHERE id = $1")
            .bind(alert_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(ServiceError::NotFound)
    }

    /// Active alerts ordered by severity descending, then recency.
    pub async fn list_active(&self) -> Result<AlertPage, ServiceError> {
        let alerts = sqlx::query_as::<_, SecurityAlert>(
            r#"
            SELECT * FROM security_alerts
            WHERE triggered AND NOT acknowledged
            ORDER BY CASE severity
                WHEN 'CRITICAL' THEN 4
                WHEN 'HIGH' THEN 3
                WHEN 'MEDIUM' THEN 2
                ELSE 1
            END DESC, updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let by_severity = sqlx::query_as::<_, CountBucket>(
            "SELECT severity AS key, COUNT(*) AS count FROM security_alerts WHERE triggered AND NOT acknowledged GROUP BY severity ORDER BY count DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        let active = alerts.len() as i64;

        Ok(AlertPage {
            alerts,
            statistics: AlertStatistics { active, by_severity },
        })
    }
}

/// Recurring evaluation, nudged early whenever an event write lands so
/// alerting stays prompt without coupling it to request handling.
pub async fn alert_evaluation_task(manager: Arc<AlertManager>, interval_secs: u64) {
    let nudge = manager.nudge_handle();
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_secs));

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = nudge.notified() => {}
        }

        if let Err(e) = manager.evaluate_thresholds().await {
            tracing::error!("Threshold evaluation failed: {}", e);
        }
    }
}
