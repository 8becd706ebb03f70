use actix_web::{web, HttpRequest, HttpResponse, Responder};
use uuid::Uuid;

use super::{authorize_admin, error_response, touch_session};
use crate::SecurityCore;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/alerts")
            .route("", web::get().to(list_active_alerts))
            .route("/{alert_id}/acknowledge", web::post().to(acknowledge_alert)),
    );
}

async fn list_active_alerts(req: HttpRequest, core: web::Data<SecurityCore>) -> impl Responder {
    let session = match authorize_admin(&req, &core).await {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };

    match core.alerts.list_active().await {
        Ok(page) => {
            touch_session(&core, &session).await;
            HttpResponse::Ok().json(page)
        }
        Err(e) => error_response(e),
    }
}

async fn acknowledge_alert(
    req: HttpRequest,
    core: web::Data<SecurityCore>,
    path: web::Path<Uuid>,
) -> impl Responder {
    let session = match authorize_admin(&req, &core).await {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };

    let admin_id = session.admin_id.to_string();
    match core.alerts.acknowledge(path.into_inner(), &admin_id).await {
        Ok(alert) => {
            touch_session(&core, &session).await;
            HttpResponse::Ok().json(alert)
        }
        Err(e) => error_response(e),
    }
}
