pub mod alerts;
pub mod events;
pub mod keys;
pub mod sessions;

use actix_web::{web, HttpRequest, HttpResponse};

use crate::errors::ServiceError;
use crate::SecurityCore;
use threatgate_models::sessions::AdminSession;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/security")
            .configure(events::configure)
            .configure(alerts::configure)
            .configure(keys::configure)
            .configure(sessions::configure),
    );
}

/// Session guard for operator routes: the caller's `X-Admin-Token` must
/// resolve to a live session before the handler proceeds. Handlers call
/// `touch_session` after a successful operation.
pub(crate) async fn authorize_admin(
    req: &HttpRequest,
    core: &SecurityCore,
) -> Result<AdminSession, ServiceError> {
    let token = req
        .headers()
        .get("X-Admin-Token")
        .and_then(|v| v.to_str().ok());
    let ip = req
        .connection_info()
        .realip_remote_addr()
        .map(|v| v.to_string());
    let user_agent = req
        .headers()
        .get("User-Agent")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    core.sessions
        .authorize(token, ip.as_deref(), user_agent.as_deref())
        .await
}

pub(crate) async fn touch_session(core: &SecurityCore, session: &AdminSession) {
    if let Err(e) = core.sessions.touch(&session.session_token).await {
        tracing::warn!("Failed to refresh admin session activity: {}", e);
    }
}

pub(crate) fn error_response(error: ServiceError) -> HttpResponse {
    match error {
        ServiceError::NotFound => HttpResponse::NotFound().finish(),
        ServiceError::Unauthorized => HttpResponse::Unauthorized().json(serde_json::json!({
            "error": "Unauthorized"
        })),
        ServiceError::Validation(message) => HttpResponse::BadRequest().json(serde_json::json!({
            "error": message
        })),
        ServiceError::RateLimited { retry_after_secs } => HttpResponse::TooManyRequests()
            .insert_header(("Retry-After", retry_after_secs.to_string()))
            .json(serde_json::json!({ "error": "Too many requests" })),
        other => {
            tracing::error!("Request failed: {}", other);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Internal server error"
            }))
        }
    }
}
