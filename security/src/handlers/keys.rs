use actix_web::{web, HttpRequest, HttpResponse, Responder};
use uuid::Uuid;
use validator::Validate;

use super::{authorize_admin, error_response, touch_session};
use crate::SecurityCore;
use threatgate_models::keys::CreateApiKeyRequest;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/keys")
            .route("", web::post().to(create_key))
            .route("", web::get().to(list_keys))
            .route("/{key_id}/usage", web::get().to(key_usage))
            .route("/{key_id}/activate", web::post().to(activate_key))
            .route("/{key_id}/deactivate", web::post().to(deactivate_key))
            .route("/{key_id}", web::delete().to(delete_key)),
    );
}

async fn create_key(
    req: HttpRequest,
    core: web::Data<SecurityCore>,
    body: web::Json<CreateApiKeyRequest>,
) -> impl Responder {
    let session = match authorize_admin(&req, &core).await {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };

    if let Err(e) = body.validate() {
        return HttpResponse::BadRequest().json(serde_json::json!({ "error": e.to_string() }));
    }

    // The response is the only place the plaintext secret ever appears.
    match core.api_keys.create_key(session.admin_id, &body.into_inner()).await {
        Ok(created) => {
            touch_session(&core, &session).await;
            HttpResponse::Created().json(created)
        }
        Err(e) => error_response(e),
    }
}

async fn list_keys(req: HttpRequest, core: web::Data<SecurityCore>) -> impl Responder {
    let session = match authorize_admin(&req, &core).await {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };

    match core.api_keys.list_keys().await {
        Ok(keys) => {
            touch_session(&core, &session).await;
            HttpResponse::Ok().json(keys)
        }
        Err(e) => error_response(e),
    }
}

async fn key_usage(
    req: HttpRequest,
    core: web::Data<SecurityCore>,
    path: web::Path<Uuid>,
) -> impl Responder {
    let session = match authorize_admin(&req, &core).await {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };

    let key_id = path.into_inner();
    match core.api_keys.get_key(key_id).await {
        Ok(_) => {}
        Err(e) => return error_response(e),
    }

    match core.api_keys.usage_summary(key_id).await {
        Ok(buckets) => {
            touch_session(&core, &session).await;
            HttpResponse::Ok().json(serde_json::json!({ "usage": buckets }))
        }
        Err(e) => error_response(e),
    }
}

async fn activate_key(
    req: HttpRequest,
    core: web::Data<SecurityCore>,
    path: web::Path<Uuid>,
) -> impl Responder {
    set_key_active(req, core, path.into_inner(), true).await
}

async fn deactivate_key(
    req: HttpRequest,
    core: web::Data<SecurityCore>,
    path: web::Path<Uuid>,
) -> impl Responder {
    set_key_active(req, core, path.into_inner(), false).await
}

async fn set_key_active(
    req: HttpRequest,
    core: web::Data<SecurityCore>,
    key_id: Uuid,
    active: bool,
) -> HttpResponse {
    let session = match authorize_admin(&req, &core).await {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };

    match core.api_keys.set_active(key_id, active).await {
        Ok(key) => {
            touch_session(&core, &session).await;
            HttpResponse::Ok().json(key)
        }
        Err(e) => error_response(e),
    }
}

async fn delete_key(
    req: HttpRequest,
    core: web::Data<SecurityCore>,
    path: web::Path<Uuid>,
) -> impl Responder {
    let session = match authorize_admin(&req, &core).await {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };

    match core.api_keys.delete_key(path.into_inner()).await {
        Ok(()) => {
            touch_session(&core, &session).await;
            HttpResponse::NoContent().finish()
        }
        Err(e) => error_response(e),
    }
}
