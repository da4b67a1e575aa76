//! Defines routes for all S3-compatible bucket and object operations
//! (path-style addressing).
//!
//! ## Structure
//! - **Service endpoints**
//!   - `GET    /health` — liveness, unauthenticated
//!   - `GET    /` — list buckets
//!
//! - **Bucket-level endpoints** (also reachable with a trailing slash)
//!   - `GET    /{bucket}` — list objects (V1, or V2 with `list-type=2`)
//!   - `PUT    /{bucket}` — create bucket
//!   - `HEAD   /{bucket}` — bucket existence
//!   - `DELETE /{bucket}` — delete empty bucket
//!
//! - **Object-level endpoints**
//!   - `PUT    /{bucket}/{*key}` — upload object, or a part with `?partNumber&uploadId`
//!   - `GET    /{bucket}/{*key}` — download object
//!   - `HEAD   /{bucket}/{*key}` — object headers only
//!   - `DELETE /{bucket}/{*key}` — delete object, or abort an upload with `?uploadId`
//!   - `POST   /{bucket}/{*key}` — `?uploads` initiates, `?uploadId` completes
//!
//! The wildcard `*key` allows nested keys like `photos/2025/img.jpg`.

use crate::{
    handlers::{
        bucket_handlers::{create_bucket, delete_bucket, head_bucket, list_buckets, list_objects},
        health_handlers::health,
        object_handlers::{delete_object, get_object, head_object, post_object, put_object},
    },
    middleware::{auth_middleware, request_id_middleware},
    state::AppState,
};
use axum::{
    Router,
    http::{HeaderName, Method, header},
    middleware,
    routing::{get, put},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Route table only, without state or middleware.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/", get(list_buckets))
        // Object-level routes
        .route(
            "/{bucket}/{*key}",
            put(put_object)
                .get(get_object)
                .head(head_object)
                .delete(delete_object)
                .post(post_object),
        )
        // Bucket-level routes
        .route(
            "/{bucket}",
            get(list_objects)
                .put(create_bucket)
                .head(head_bucket)
                .delete(delete_bucket),
        )
        .route(
            "/{bucket}/",
            get(list_objects)
                .put(create_bucket)
                .head(head_bucket)
                .delete(delete_bucket),
        )
}

/// Build the complete application: routes, authentication, response
/// stamping, tracing and CORS, bound to `state`.
pub fn create_router(state: AppState) -> Router {
    routes()
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::HEAD,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .expose_headers([
            header::ETAG,
            HeaderName::from_static("x-amz-request-id"),
            HeaderName::from_static("x-amz-bucket-region"),
        ])
}
