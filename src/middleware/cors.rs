// CORS middleware: whitelist from configuration, with origin reflection
// when a wildcard is configured outside production (credentials cannot be
// combined with a literal `*`)

use axum::{
    body::Body,
    http::{
        header::{self, HeaderValue},
        Method, Request, StatusCode,
    },
    middleware::Next,
    response::Response,
};
use tracing::debug;

pub async fn cors_middleware(req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let config = crate::app_config::config();

    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let has_wildcard = config.cors_allowed_origins.iter().any(|o| o == "*");

    let allowed_origin = if has_wildcard && !config.is_production() {
        debug!("CORS: reflecting origin for non-production: {:?}", origin);
        origin.clone()
    } else {
        origin.as_ref().and_then(|req_origin| {
            if config.cors_allowed_origins.contains(req_origin) {
                Some(req_origin.clone())
            } else {
                debug!("CORS: origin not in whitelist: {}", req_origin);
                None
            }
        })
    };

    if req.method() == Method::OPTIONS {
        let mut response = Response::new(Body::empty());

        if let Some(allowed) = allowed_origin {
            let headers = response.headers_mut();
            if let Ok(value) = HeaderValue::from_str(&allowed) {
                headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
            }
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static("GET, POST, PUT, PATCH, DELETE, OPTIONS"),
            );
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static("content-type, authorization, accept, origin"),
            );
            headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("3600"));
        }

        *response.status_mut() = StatusCode::OK;
        return Ok(response);
    }

    let mut response = next.run(req).await;

    if let Some(allowed) = allowed_origin {
        if let Ok(value) = HeaderValue::from_str(&allowed) {
            response
                .headers_mut()
                .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
            response.headers_mut().insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
    }

    Ok(response)
}
