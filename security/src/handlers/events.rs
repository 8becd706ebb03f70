use actix_web::{web, HttpRequest, HttpResponse, Responder};
use uuid::Uuid;
use validator::Validate;

use super::{authorize_admin, error_response, touch_session};
use crate::SecurityCore;
use threatgate_models::security::{EventQuery, ResolveEventRequest};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/events")
            .route("", web::get().to(list_events))
            .route("/summary", web::get().to(event_summary))
            .route("/{event_id}/resolve", web::post().to(resolve_event)),
    );
}

async fn list_events(
    req: HttpRequest,
    core: web::Data<SecurityCore>,
    query: web::Query<EventQuery>,
) -> impl Responder {
    let session = match authorize_admin(&req, &core).await {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };

    if let Err(e) = query.validate() {
        return HttpResponse::BadRequest().json(serde_json::json!({ "error": e.to_string() }));
    }

    match core.events.query(&query.into_inner()).await {
        Ok(page) => {
            touch_session(&core, &session).await;
            HttpResponse::Ok().json(page)
        }
        Err(e) => error_response(e),
    }
}

async fn event_summary(req: HttpRequest, core: web::Data<SecurityCore>) -> impl Responder {
    let session = match authorize_admin(&req, &core).await {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };

    match core.events.summarize().await {
        Ok(summary) => {
            touch_session(&core, &session).await;
            HttpResponse::Ok().json(serde_json::json!({ "statistics": summary }))
        }
        Err(e) => error_response(e),
    }
}

async fn resolve_event(
    req: HttpRequest,
    core: web::Data<SecurityCore>,
    path: web::Path<Uuid>,
    body: web::Json<ResolveEventRequest>,
) -> impl Responder {
    let session = match authorize_admin(&req, &core).await {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };

    if let Err(e) = body.validate() {
        return HttpResponse::BadRequest().json(serde_json::json!({ "error": e.to_string() }));
    }

    match core.events.resolve(path.into_inner(), &body.resolved_by).await {
        Ok(event) => {
            touch_session(&core, &session).await;
            HttpResponse::Ok().json(event)
        }
        Err(e) => error_response(e),
    }
}
