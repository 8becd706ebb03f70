use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage, HttpResponse,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use futures_util::future::LocalBoxFuture;
use serde_json::json;
use std::{
    future::{ready, Ready},
    rc::Rc,
    sync::Arc,
};
use uuid::Uuid;

use crate::guard::{GuardVerdict, PatternGuard};
use crate::rate_limiting::RateLimiter;
use threatgate_models::request::RequestSnapshot;
use threatgate_models::security::{CreateSecurityEventInput, SecurityEventType, Severity};

/// Destination for security events raised during admission. Recording is
/// fire-and-forget: implementations must not block the request path and
/// must swallow their own persistence failures.
pub trait EventSink: Send + Sync {
    fn record(&self, input: CreateSecurityEventInput);
}

/// Answer from the API-key layer for a presented secret. Invalid collapses
/// missing, revoked, and expired keys into one indistinguishable outcome.
#[derive(Debug, Clone)]
pub enum KeyAdmission {
    Granted {
        key_id: Uuid,
        permissions: Vec<String>,
    },
    Invalid,
    Limited {
        retry_after_secs: i64,
    },
}

/// Seam to the API-key manager. The implementation is responsible for
/// emitting the security events for its own denials.
#[async_trait]
pub trait ApiKeyGate: Send + Sync {
    async fn admit(&self, presented: &str, endpoint: &str, ip: Option<&str>) -> KeyAdmission;

    /// Fire-and-forget usage sample for a completed request.
    fn record_usage(&self, key_id: Uuid, endpoint: &str, status: u16, duration_ms: i64);
}

/// Identity attached to request extensions once an API key is admitted.
#[derive(Debug, Clone)]
pub struct ApiKeyIdentity {
    pub key_id: Uuid,
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Per-IP quota for the fixed admission window.
    pub requests_per_window: u32,
    pub window_secs: u64,
    /// Reject advisory guard findings instead of log-and-continue.
    pub reject_suspicious: bool,
    /// Paths exempt from admission (health probes).
    pub exempt_paths: Vec<String>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 100,
            window_secs: 60,
            reject_suspicious: true,
            exempt_paths: vec!["/health".to_string()],
        }
    }
}

/// Admission middleware: every request passes the pattern guard and the
/// per-IP rate limiter; requests bearing `X-API-Key` are additionally
/// validated and rate-limited per key. Every denial produces exactly one
/// security event before the response is returned.
#[derive(Clone)]
pub struct AdmissionMiddleware {
    config: AdmissionConfig,
    limiter: Arc<RateLimiter>,
    sink: Arc<dyn EventSink>,
    key_gate: Option<Arc<dyn ApiKeyGate>>,
}

impl AdmissionMiddleware {
    pub fn new(
        config: AdmissionConfig,
        limiter: Arc<RateLimiter>,
        sink: Arc<dyn EventSink>,
        key_gate: Option<Arc<dyn ApiKeyGate>>,
    ) -> Self {
        Self {
            config,
            limiter,
            sink,
            key_gate,
        }
    }

    fn guard_event(&self, snapshot: &RequestSnapshot, event_type: SecurityEventType, severity: Severity, detail: &str) {
        self.sink.record(CreateSecurityEventInput {
            event_type,
            severity,
            source: "admission".to_string(),
            actor_id: None,
            ip_address: snapshot.ip_address.clone(),
            user_agent: snapshot.user_agent.clone(),
            metadata: Some(json!({
                "method": snapshot.method,
                "path": snapshot.path,
                "detail": detail,
            })),
        });
    }
}

pub fn snapshot_request(req: &ServiceRequest) -> RequestSnapshot {
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    };

    RequestSnapshot {
        method: req.method().as_str().to_string(),
        path: req.path().to_string(),
        query: req.query_string().to_string(),
        host: req.connection_info().host().to_string(),
        origin: header("Origin"),
        referer: header("Referer"),
        user_agent: header("User-Agent"),
        content_type: header("Content-Type"),
        ip_address: req
            .connection_info()
            .realip_remote_addr()
            .map(|ip| ip.to_string()),
    }
}

impl<S, B> Transform<S, ServiceRequest> for AdmissionMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = AdmissionMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AdmissionMiddlewareService {
            service: Rc::new(service),
            middleware: self.clone(),
        }))
    }
}

pub struct AdmissionMiddlewareService<S> {
    service: Rc<S>,
    middleware: AdmissionMiddleware,
}

impl<S, B> Service<ServiceRequest> for AdmissionMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let middleware = self.middleware.clone();
        let service = Rc::clone(&self.service);
        let snapshot = snapshot_request(&req);
        let presented_key = req
            .headers()
            .get("X-API-Key")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        Box::pin(async move {
            if middleware.config.exempt_paths.iter().any(|p| p == &snapshot.path) {
                let res = service.call(req).await?;
                return Ok(res.map_into_left_body());
            }

            match PatternGuard::inspect(&snapshot) {
                GuardVerdict::Clean => {}
                GuardVerdict::Reject { event_type, code, detail } => {
                    middleware.guard_event(&snapshot, event_type, Severity::Medium, &detail);
                    let response = HttpResponse::Forbidden().json(json!({
                        "error": "Forbidden",
                        "code": code,
                    }));
                    return Ok(req.into_response(response).map_into_right_body());
                }
                GuardVerdict::Suspicious { event_type, detail } => {
                    middleware.guard_event(&snapshot, event_type, Severity::High, &detail);
                    if middleware.config.reject_suspicious {
                        tracing::warn!(
                            path = %snapshot.path,
                            ip = ?snapshot.ip_address,
                            "Rejecting suspicious request: {}",
                            detail
                        );
                        let response = HttpResponse::Forbidden().json(json!({
                            "error": "Forbidden",
                            "code": "suspicious_request",
                        }));
                        return Ok(req.into_response(response).map_into_right_body());
                    }
                    tracing::warn!(
                        path = %snapshot.path,
                        ip = ?snapshot.ip_address,
                        "Allowing suspicious request through: {}",
                        detail
                    );
                }
            }

            let ip_key = format!(
                "ip:{}",
                snapshot.ip_address.as_deref().unwrap_or("unknown")
            );
            let decision = middleware.limiter.check(
                &ip_key,
                middleware.config.requests_per_window,
                Duration::seconds(middleware.config.window_secs as i64),
            );
            if !decision.allowed {
                let retry_after = (decision.reset_at - Utc::now()).num_seconds().max(0);
                middleware.guard_event(
                    &snapshot,
                    SecurityEventType::RateLimitExceeded,
                    Severity::Medium,
                    &format!("per-ip quota of {} exhausted", middleware.config.requests_per_window),
                );
                let response = HttpResponse::TooManyRequests()
                    .insert_header(("Retry-After", retry_after.to_string()))
                    .insert_header((
                        "X-RateLimit-Limit",
                        middleware.config.requests_per_window.to_string(),
                    ))
                    .insert_header(("X-RateLimit-Remaining", decision.remaining.to_string()))
                    .json(json!({
                        "error": "Too many requests",
                        "code": "rate_limited",
                    }));
                return Ok(req.into_response(response).map_into_right_body());
            }

            if let (Some(secret), Some(gate)) = (presented_key, middleware.key_gate.clone()) {
                let started = std::time::Instant::now();
                match gate
                    .admit(&secret, &snapshot.path, snapshot.ip_address.as_deref())
                    .await
                {
                    KeyAdmission::Granted { key_id, permissions } => {
                        req.extensions_mut().insert(ApiKeyIdentity { key_id, permissions });
                        let path = snapshot.path.clone();
                        let res = service.call(req).await?;
                        gate.record_usage(
                            key_id,
                            &path,
                            res.status().as_u16(),
                            started.elapsed().as_millis() as i64,
                        );
                        return Ok(res.map_into_left_body());
                    }
                    KeyAdmission::Invalid => {
                        // The gate has already recorded the event.
                        let response = HttpResponse::Unauthorized().json(json!({
                            "error": "Unauthorized",
                            "code": "invalid_api_key",
                        }));
                        return Ok(req.into_response(response).map_into_right_body());
                    }
                    KeyAdmission::Limited { retry_after_secs } => {
                        let response = HttpResponse::TooManyRequests()
                            .insert_header(("Retry-After", retry_after_secs.to_string()))
                            .json(json!({
                                "error": "Too many requests",
                                "code": "api_key_rate_limited",
                            }));
                        return Ok(req.into_response(response).map_into_right_body());
                    }
                }
            }

            let res = service.call(req).await?;
            Ok(res.map_into_left_body())
        })
    }
}
