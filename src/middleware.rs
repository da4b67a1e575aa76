//! Request middleware: SigV4 authentication and response stamping.

use crate::{
    errors::{AppError, REQUEST_ID_HEADER},
    state::AppState,
};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Method, Request, header},
    middleware::Next,
    response::Response,
};
use tracing::warn;
use uuid::Uuid;

pub const SERVER_NAME: &str = "LocalS3";

/// Authentication middleware
///
/// Verifies the SigV4 signature of every request except the health probe and
/// CORS pre-flights. Disabled entirely by `disable_auth`.
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    if state.config.disable_auth || is_public(request.method(), request.uri().path()) {
        return Ok(next.run(request).await);
    }

    if let Err(err) = state
        .verifier
        .authenticate(request.method(), request.uri(), request.headers())
    {
        warn!(
            "rejected {} {}: {}",
            request.method(),
            request.uri().path(),
            err
        );
        return Err(AppError::from(err).with_resource(request.uri().path()));
    }

    Ok(next.run(request).await)
}

fn is_public(method: &Method, path: &str) -> bool {
    *method == Method::OPTIONS || path == "/health"
}

/// Stamp `Server` and `x-amz-request-id` on every response. Error responses
/// already carry the request ID they rendered into their body.
pub async fn request_id_middleware(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(header::SERVER, HeaderValue::from_static(SERVER_NAME));
    if !headers.contains_key(REQUEST_ID_HEADER) {
        if let Ok(value) = HeaderValue::from_str(&Uuid::new_v4().simple().to_string()) {
            headers.insert(REQUEST_ID_HEADER, value);
        }
    }
    response
}
