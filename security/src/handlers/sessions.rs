use actix_web::{web, HttpRequest, HttpResponse, Responder};

use super::error_response;
use crate::SecurityCore;
use threatgate_models::sessions::CreateSessionRequest;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/sessions")
            .route("", web::post().to(create_session))
            .route("/current", web::delete().to(revoke_current_session)),
    );
}

/// Called by the authentication layer after it has verified the admin's
/// credentials; this service only tracks the resulting session.
async fn create_session(
    core: web::Data<SecurityCore>,
    body: web::Json<CreateSessionRequest>,
) -> impl Responder {
    match core.sessions.create_session(body.admin_id).await {
        Ok(created) => HttpResponse::Created().json(created),
        Err(e) => error_response(e),
    }
}

async fn revoke_current_session(req: HttpRequest, core: web::Data<SecurityCore>) -> impl Responder {
    let token = req
        .headers()
        .get("X-Admin-Token")
        .and_then(|v| v.to_str().ok());

    match token {
        Some(token) => match core.sessions.revoke(token).await {
            Ok(()) => HttpResponse::NoContent().finish(),
            Err(e) => error_response(e),
        },
        None => HttpResponse::Unauthorized().json(serde_json::json!({ "error": "Unauthorized" })),
    }
}
