//! HTTP handlers for the service root and bucket operations.

use crate::{
    errors::AppError,
    handlers::xml::{ListingEcho, ListingVersion, list_buckets_xml, list_objects_xml, xml_response},
    services::storage_service::{ListObjectsParams, StorageError},
    state::AppState,
};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderName, HeaderValue, StatusCode, header},
    response::Response,
};
use base64::{Engine as _, engine::general_purpose};
use serde::Deserialize;
use tracing::info;

const DEFAULT_MAX_KEYS: usize = 1000;

/// Query params accepted by ListObjects (V1) and ListObjectsV2.
#[derive(Debug, Default, Deserialize)]
pub struct ListObjectsQuery {
    #[serde(rename = "list-type")]
    pub list_type: Option<String>,
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub marker: Option<String>,
    #[serde(rename = "max-keys")]
    pub max_keys: Option<String>,
    #[serde(rename = "continuation-token")]
    pub continuation_token: Option<String>,
    #[serde(rename = "start-after")]
    pub start_after: Option<String>,
}

/// `GET /` — list buckets.
pub async fn list_buckets(State(state): State<AppState>) -> Result<Response, AppError> {
    let buckets = state.store.list_buckets().await?;
    Ok(xml_response(list_buckets_xml(state.verifier.access_key(), &buckets)))
}

/// `PUT /{bucket}` — create bucket. Any request body is ignored.
pub async fn create_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<Response, AppError> {
    if state.store.bucket_exists(&bucket).await {
        return Err(StorageError::BucketAlreadyExists(bucket).into());
    }
    state.store.create_bucket(&bucket).await?;
    info!("created bucket {}", bucket);

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    if let Ok(value) = HeaderValue::from_str(&format!("/{}", bucket)) {
        response.headers_mut().insert(header::LOCATION, value);
    }
    Ok(response)
}

/// `HEAD /{bucket}` — 200 with the bucket region, or 404.
pub async fn head_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<Response, AppError> {
    if !state.store.bucket_exists(&bucket).await {
        return Err(StorageError::BucketNotFound(bucket).into());
    }

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    if let Ok(value) = HeaderValue::from_str(&state.config.region) {
        response
            .headers_mut()
            .insert(HeaderName::from_static("x-amz-bucket-region"), value);
    }
    Ok(response)
}

/// `DELETE /{bucket}` — delete an empty bucket.
pub async fn delete_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<Response, AppError> {
    state.store.delete_bucket(&bucket).await?;
    info!("deleted bucket {}", bucket);

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NO_CONTENT;
    Ok(response)
}

/// `GET /{bucket}` — list objects. `list-type=2` selects V2 paging
/// (continuation tokens), anything else V1 (markers).
pub async fn list_objects(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(q): Query<ListObjectsQuery>,
) -> Result<Response, AppError> {
    let v2 = q.list_type.as_deref() == Some("2");
    let max_keys = parse_max_keys(q.max_keys.as_deref());
    let prefix = q.prefix.clone().unwrap_or_default();
    let delimiter = q.delimiter.clone().unwrap_or_default();

    let marker = if v2 {
        match (&q.continuation_token, &q.start_after) {
            (Some(token), _) => decode_continuation_token(token),
            (None, Some(start_after)) => start_after.clone(),
            (None, None) => String::new(),
        }
    } else {
        q.marker.clone().unwrap_or_default()
    };

    let params = ListObjectsParams {
        prefix,
        delimiter,
        marker,
        max_keys,
    };
    let result = state.store.list_objects(&bucket, &params).await?;

    let version = if v2 {
        ListingVersion::V2 {
            continuation_token: q.continuation_token.as_deref(),
            start_after: q.start_after.as_deref(),
            next_continuation_token: result.next_marker.as_deref().map(encode_continuation_token),
        }
    } else {
        ListingVersion::V1
    };
    let echo = ListingEcho {
        prefix: &params.prefix,
        delimiter: &params.delimiter,
        marker: &params.marker,
        max_keys,
        version,
    };

    Ok(xml_response(list_objects_xml(
        &bucket,
        state.verifier.access_key(),
        &echo,
        &result,
    )))
}

/// Positive integers are honoured; missing, zero, negative or garbage
/// values fall back to the default page size.
fn parse_max_keys(raw: Option<&str>) -> usize {
    raw.and_then(|value| value.trim().parse::<i64>().ok())
        .filter(|n| *n > 0)
        .map(|n| n as usize)
        .unwrap_or(DEFAULT_MAX_KEYS)
}

fn encode_continuation_token(token: &str) -> String {
    general_purpose::STANDARD.encode(token)
}

fn decode_continuation_token(token: &str) -> String {
    general_purpose::STANDARD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| token.to_string())
}
