// Database-backed integration tests. They run against the database named
// by TEST_DATABASE_URL and are skipped (with a note on stderr) when the
// variable is unset, so the suite stays green on machines without
// Postgres.

use chrono::{Duration, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

use threatgate_config::{GroupBy, ThresholdRule};
use threatgate_middleware::RateLimiter;
use threatgate_models::keys::CreateApiKeyRequest;
use threatgate_models::security::{
    CreateSecurityEventInput, EventQuery, SecurityEventType, Severity,
};
use threatgate_security::alerts::AlertManager;
use threatgate_security::api_keys::ApiKeyManager;
use threatgate_security::errors::ServiceError;
use threatgate_security::events::SecurityEventLog;
use threatgate_security::sessions::SessionActivityTracker;

async fn test_pool() -> Option<PgPool> {
    let url = match std::env::var("TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("TEST_DATABASE_URL not set; skipping integration test");
            return None;
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("Failed to connect to test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    Some(pool)
}

fn event(
    event_type: SecurityEventType,
    severity: Severity,
    source: &str,
    actor: Option<&str>,
) -> CreateSecurityEventInput {
    CreateSecurityEventInput {
        event_type,
        severity,
        source: source.to_string(),
        actor_id: actor.map(|a| a.to_string()),
        ip_address: Some("203.0.113.77".to_string()),
        user_agent: Some("integration-test".to_string()),
        metadata: None,
    }
}

async fn cleanup_events(pool: &PgPool, source: &str) {
    sqlx::query("DELETE FROM security_events WHERE source = $1")
        .bind(source)
        .execute(pool)
        .await
        .expect("Failed to cleanup events");
}

#[tokio::test]
#[serial_test::serial]
async fn api_key_lifecycle() {
    let Some(pool) = test_pool().await else { return };
    let events = Arc::new(SecurityEventLog::new(pool.clone()));
    let manager = ApiKeyManager::new(pool.clone(), Arc::new(RateLimiter::new()), events);

    let owner = Uuid::new_v4();
    let request = CreateApiKeyRequest {
        name: "itest-lifecycle".to_string(),
        permissions: vec!["read:content".to_string(), "read:events".to_string()],
        rate_limit: 60,
        expires_in_days: Some(30),
    };

    let created = manager.create_key(owner, &request).await.unwrap();
    assert!(created.secret.starts_with("tgk_"));
    assert_eq!(created.key.usage_count, 0);

    // The listing never contains the plaintext secret or the digest.
    let listing = serde_json::to_string(&manager.list_keys().await.unwrap()).unwrap();
    assert!(!listing.contains(&created.secret));
    assert!(!listing.contains(&created.key.key_digest));

    // A matching secret validates; garbage and revoked keys do not, and
    // the two failures are indistinguishable.
    let valid = manager
        .validate_key(&created.secret, "/itest", None)
        .await
        .unwrap();
    assert_eq!(valid.map(|k| k.id), Some(created.key.id));

    let unknown = manager
        .validate_key("tgk_never_issued", "/itest", None)
        .await
        .unwrap();
    assert!(unknown.is_none());

    manager.set_active(created.key.id, false).await.unwrap();
    let revoked = manager
        .validate_key(&created.secret, "/itest", None)
        .await
        .unwrap();
    assert!(revoked.is_none());

    // Deleting removes the key and cascades its usage history.
    manager.delete_key(created.key.id).await.unwrap();
    assert!(matches!(
        manager.get_key(created.key.id).await,
        Err(ServiceError::NotFound)
    ));
}

#[tokio::test]
#[serial_test::serial]
async fn expired_api_key_is_invalid_even_with_matching_secret() {
    let Some(pool) = test_pool().await else { return };
    let events = Arc::new(SecurityEventLog::new(pool.clone()));
    let manager = ApiKeyManager::new(pool.clone(), Arc::new(RateLimiter::new()), events);

    let request = CreateApiKeyRequest {
        name: "itest-expired".to_string(),
        permissions: vec!["read:content".to_string()],
        rate_limit: 60,
        expires_in_days: Some(-1),
    };

    let created = manager.create_key(Uuid::new_v4(), &request).await.unwrap();
    let outcome = manager
        .validate_key(&created.secret, "/itest", None)
        .await
        .unwrap();
    assert!(outcome.is_none());

    manager.delete_key(created.key.id).await.unwrap();
}

#[tokio::test]
#[serial_test::serial]
async fn event_query_filters_and_orders_newest_first() {
    let Some(pool) = test_pool().await else { return };
    let source = "itest-query";
    cleanup_events(&pool, source).await;

    let log = SecurityEventLog::new(pool.clone());
    for i in 0..3 {
        log.record(&event(
            SecurityEventType::AuthFailure,
            Severity::High,
            source,
            Some(&format!("actor-{}", i)),
        ))
        .await
        .unwrap();
    }
    log.record(&event(
        SecurityEventType::SuspiciousActivity,
        Severity::Low,
        source,
        None,
    ))
    .await
    .unwrap();

    let query = EventQuery {
        severity: Some(Severity::High),
        source: Some(source.to_string()),
        from: Some(Utc::now() - Duration::minutes(5)),
        to: Some(Utc::now() + Duration::minutes(1)),
        ..Default::default()
    };
    let page = log.query(&query).await.unwrap();

    assert_eq!(page.pagination.total, 3);
    assert_eq!(page.events.len(), 3);
    assert!(page.events.iter().all(|e| e.severity == "HIGH"));
    assert!(page
        .events
        .windows(2)
        .all(|pair| pair[0].created_at >= pair[1].created_at));

    // The LOW event is outside the predicate but inside the store.
    let unfiltered = log
        .query(&EventQuery {
            source: Some(source.to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(unfiltered.pagination.total, 4);

    // Resolution toggles without rewriting history.
    let target = page.events[0].id;
    let resolved = log.resolve(target, "itest-admin").await.unwrap();
    assert!(resolved.resolved);
    assert_eq!(resolved.resolved_by.as_deref(), Some("itest-admin"));

    cleanup_events(&pool, source).await;
}

#[tokio::test]
#[serial_test::serial]
async fn pagination_clamps_limit_and_reports_total_pages() {
    let Some(pool) = test_pool().await else { return };
    let source = "itest-paging";
    cleanup_events(&pool, source).await;

    let log = SecurityEventLog::new(pool.clone());
    for _ in 0..7 {
        log.record(&event(
            SecurityEventType::RateLimitExceeded,
            Severity::Medium,
            source,
            None,
        ))
        .await
        .unwrap();
    }

    let page = log
        .query(&EventQuery {
            source: Some(source.to_string()),
            limit: Some(3),
            page: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(page.events.len(), 3);
    assert_eq!(page.pagination.total, 7);
    assert_eq!(page.pagination.total_pages, 3);

    let clamped = log
        .query(&EventQuery {
            source: Some(source.to_string()),
            limit: Some(10_000),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(clamped.pagination.limit, 100);

    cleanup_events(&pool, source).await;
}

fn itest_rule() -> ThresholdRule {
    ThresholdRule {
        event_type: SecurityEventType::AuthFailure,
        window_minutes: 15,
        threshold: 10,
        group_by: GroupBy::Actor,
        alert_type: "ITEST_AUTH_BURST".to_string(),
        severity: Severity::High,
        title: "Repeated authentication failures".to_string(),
    }
}

async fn cleanup_alerts(pool: &PgPool) {
    sqlx::query("DELETE FROM security_alerts WHERE alert_type = 'ITEST_AUTH_BURST'")
        .execute(pool)
        .await
        .expect("Failed to cleanup alerts");
}

#[tokio::test]
#[serial_test::serial]
async fn threshold_breach_triggers_exactly_one_active_alert() {
    let Some(pool) = test_pool().await else { return };
    let source = "itest-alerts";
    cleanup_events(&pool, source).await;
    cleanup_alerts(&pool).await;

    let log = SecurityEventLog::new(pool.clone());
    let manager = AlertManager::new(pool.clone(), vec![itest_rule()], Arc::new(Notify::new()));

    for _ in 0..10 {
        log.record(&event(
            SecurityEventType::AuthFailure,
            Severity::High,
            source,
            Some("itest-actor"),
        ))
        .await
        .unwrap();
    }

    manager.evaluate_thresholds().await.unwrap();
    let first = manager.list_active().await.unwrap();
    let active: Vec<_> = first
        .alerts
        .iter()
        .filter(|a| a.alert_type == "ITEST_AUTH_BURST")
        .collect();
    assert_eq!(active.len(), 1);
    let alert_id = active[0].id;

    // An eleventh event refreshes the existing alert instead of opening a
    // second one; re-evaluation is idempotent.
    log.record(&event(
        SecurityEventType::AuthFailure,
        Severity::High,
        source,
        Some("itest-actor"),
    ))
    .await
    .unwrap();
    manager.evaluate_thresholds().await.unwrap();
    manager.evaluate_thresholds().await.unwrap();

    let second = manager.list_active().await.unwrap();
    let active: Vec<_> = second
        .alerts
        .iter()
        .filter(|a| a.alert_type == "ITEST_AUTH_BURST")
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, alert_id);
    let observed = active[0]
        .metadata
        .as_ref()
        .and_then(|m| m["observed_count"].as_i64())
        .unwrap();
    assert_eq!(observed, 11);

    cleanup_events(&pool, source).await;
    cleanup_alerts(&pool).await;
}

#[tokio::test]
#[serial_test::serial]
async fn acknowledged_alert_stays_closed_and_new_breach_opens_a_fresh_one() {
    let Some(pool) = test_pool().await else { return };
    let source = "itest-ack";
    cleanup_events(&pool, source).await;
    cleanup_alerts(&pool).await;

    let log = SecurityEventLog::new(pool.clone());
    let manager = AlertManager::new(pool.clone(), vec![itest_rule()], Arc::new(Notify::new()));

    for _ in 0..10 {
        log.record(&event(
            SecurityEventType::AuthFailure,
            Severity::High,
            source,
            Some("itest-ack-actor"),
        ))
        .await
        .unwrap();
    }
    manager.evaluate_thresholds().await.unwrap();

    let page = manager.list_active().await.unwrap();
    let alert = page
        .alerts
        .iter()
        .find(|a| a.alert_type == "ITEST_AUTH_BURST")
        .expect("alert should be active");

    let acked = manager.acknowledge(alert.id, "itest-admin").await.unwrap();
    assert!(acked.acknowledged);
    assert_eq!(acked.acknowledged_by.as_deref(), Some("itest-admin"));

    // Acknowledging again is a no-op, not an error.
    let again = manager.acknowledge(alert.id, "someone-else").await.unwrap();
    assert_eq!(again.acknowledged_by.as_deref(), Some("itest-admin"));

    // The window still breaches, so evaluation opens a distinct alert and
    // the acknowledged one stays in history.
    manager.evaluate_thresholds().await.unwrap();
    let reopened = manager.list_active().await.unwrap();
    let fresh = reopened
        .alerts
        .iter()
        .find(|a| a.alert_type == "ITEST_AUTH_BURST")
        .expect("new alert should be active");
    assert_ne!(fresh.id, alert.id);

    cleanup_events(&pool, source).await;
    cleanup_alerts(&pool).await;
}

#[tokio::test]
#[serial_test::serial]
async fn admin_session_touch_revoke_and_expiry() {
    let Some(pool) = test_pool().await else { return };
    let events = Arc::new(SecurityEventLog::new(pool.clone()));

    let tracker = SessionActivityTracker::new(pool.clone(), Arc::clone(&events), 30);
    let created = tracker.create_session(Uuid::new_v4()).await.unwrap();
    assert!(created.token.starts_with("tgs_"));

    assert!(tracker.is_valid(&created.token).await.unwrap());
    assert!(tracker.touch(&created.token).await.unwrap());

    let authorized = tracker
        .authorize(Some(&created.token), None, None)
        .await
        .unwrap();
    assert_eq!(authorized.admin_id, created.session.admin_id);

    tracker.revoke(&created.token).await.unwrap();
    assert!(!tracker.is_valid(&created.token).await.unwrap());
    assert!(matches!(
        tracker.authorize(Some(&created.token), None, None).await,
        Err(ServiceError::Unauthorized)
    ));

    // A tracker with a negative idle timeout issues sessions that are
    // already expired; cleanup marks them inactive.
    let expired_tracker = SessionActivityTracker::new(pool.clone(), events, -1);
    let expired = expired_tracker.create_session(Uuid::new_v4()).await.unwrap();
    assert!(!expired_tracker.is_valid(&expired.token).await.unwrap());
    assert!(!expired_tracker.touch(&expired.token).await.unwrap());
    expired_tracker.cleanup_expired_sessions().await.unwrap();

    sqlx::query("DELETE FROM admin_sessions WHERE session_token IN ($1, $2)")
        .bind(&created.token)
        .bind(&expired.token)
        .execute(&pool)
        .await
        .unwrap();
}
