use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::{
        header::{
            ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
            ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE,
            ORIGIN,
        },
        Method,
    },
    Error, HttpResponse,
};
use futures_util::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    future::{ready, Ready},
    rc::Rc,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age: Option<u32>,
    pub allow_any_origin: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:8080".to_string(),
            ],
            allowed_methods: vec![
                "GET".to_string(),
                "POST".to_string(),
                "DELETE".to_string(),
                "OPTIONS".to_string(),
            ],
            allowed_headers: vec![
                "Content-Type".to_string(),
                "X-API-Key".to_string(),
                "X-Admin-Token".to_string(),
            ],
            allow_credentials: false,
            max_age: Some(3600),
            allow_any_origin: false,
        }
    }
}

impl CorsConfig {
    /// Development preset: any origin, no credentials.
    pub fn permissive() -> Self {
        Self {
            allow_any_origin: true,
            ..Default::default()
        }
    }
}

#[derive(Clone)]
pub struct CorsMiddleware {
    config: CorsConfig,
    origins: HashSet<String>,
}

impl CorsMiddleware {
    pub fn new(config: CorsConfig) -> Self {
        let origins = config.allowed_origins.iter().cloned().collect();
        Self { config, origins }
    }

    fn is_origin_allowed(&self, origin: &str) -> bool {
        self.config.allow_any_origin || self.origins.contains(origin)
    }

    fn preflight_response(&self, origin: Option<&str>) -> HttpResponse {
        let mut response = HttpResponse::NoContent();

        match origin {
            Some(origin) if self.is_origin_allowed(origin) => {
                if self.config.allow_any_origin && !self.config.allow_credentials {
                    response.insert_header((ACCESS_CONTROL_ALLOW_ORIGIN, "*"));
                } else {
                    response.insert_header((ACCESS_CONTROL_ALLOW_ORIGIN, origin));
                }
            }
            _ => return HttpResponse::Forbidden().finish(),
        }

        response.insert_header((
            ACCESS_CONTROL_ALLOW_METHODS,
            self.config.allowed_methods.join(", "),
        ));
        response.insert_header((
            ACCESS_CONTROL_ALLOW_HEADERS,
            self.config.allowed_headers.join(", "),
        ));
        if self.config.allow_credentials {
            response.insert_header((ACCESS_CONTROL_ALLOW_CREDENTIALS, "true"));
        }
        if let Some(max_age) = self.config.max_age {
            response.insert_header((ACCESS_CONTROL_MAX_AGE, max_age.to_string()));
        }

        response.finish()
    }
}

impl<S, B> Transform<S, ServiceRequest> for CorsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = CorsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(CorsMiddlewareService {
            service: Rc::new(service),
            middleware: self.clone(),
        }))
    }
}

pub struct CorsMiddlewareService<S> {
    service: Rc<S>,
    middleware: CorsMiddleware,
}

impl<S, B> Service<ServiceRequest> for CorsMiddlewareService<S>
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

        Box::pin(async move {
            let origin = req
                .headers()
                .get(ORIGIN)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string());

            if req.method() == Method::OPTIONS {
                let response = middleware.preflight_response(origin.as_deref());
                return Ok(req.into_response(response).map_into_right_body());
            }

            let mut res = service.call(req).await?;

            if let Some(origin) = origin {
                if middleware.is_origin_allowed(&origin) {
                    let headers = res.headers_mut();
                    if middleware.config.allow_any_origin && !middleware.config.allow_credentials {
                        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, "*".parse().unwrap());
                    } else if let Ok(value) = origin.parse() {
                        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
                    }
                    if middleware.config.allow_credentials {
                        headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, "true".parse().unwrap());
                    }
                }
            }

            Ok(res.map_into_left_body())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_lists_service_headers() {
        let config = CorsConfig::default();
        assert!(config.allowed_headers.iter().any(|h| h == "X-API-Key"));
        assert!(config.allowed_headers.iter().any(|h| h == "X-Admin-Token"));
        assert!(!config.allow_any_origin);
    }

    #[test]
    fn permissive_preset_allows_any_origin_without_credentials() {
        let middleware = CorsMiddleware::new(CorsConfig::permissive());
        assert!(middleware.is_origin_allowed("https://anywhere.example"));
        assert!(!middleware.config.allow_credentials);
    }
}
