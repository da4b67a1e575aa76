//! HTTP handlers for object operations.
//! Streams object bodies in both directions and dispatches multipart
//! sub-operations by query string.

use crate::{
    errors::AppError,
    handlers::multipart_handlers::{
        abort_multipart_upload, complete_multipart_upload, initiate_multipart_upload, upload_part,
    },
    models::{
        metadata::{UserMetadata, is_user_metadata},
        object::ObjectInfo,
    },
    state::AppState,
};
use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::Response,
};
use futures::{Stream, StreamExt};
use std::{collections::HashMap, io};
use tokio_util::io::ReaderStream;
use tracing::debug;

/// `PUT /{bucket}/{*key}` — upload an object, or a part when `uploadId` is set.
pub async fn put_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    if let Some(upload_id) = query.get("uploadId") {
        return upload_part(&state, &bucket, &key, upload_id, query.get("partNumber"), &headers, body).await;
    }

    let metadata = request_metadata(&headers);
    let info = state
        .store
        .put_object(&bucket, &key, body_stream(body), declared_size(&headers), &metadata)
        .await?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    if let Ok(value) = HeaderValue::from_str(&info.quoted_etag()) {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}

/// `GET /{bucket}/{*key}` — download an object as a streaming response.
pub async fn get_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let (info, file) = state.store.get_object(&bucket, &key).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &info);
    Ok(response)
}

/// `HEAD /{bucket}/{*key}` — same headers as GET but no body.
pub async fn head_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let info = state.store.head_object(&bucket, &key).await?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &info);
    Ok(response)
}

/// `DELETE /{bucket}/{*key}` — delete an object, or abort an upload when
/// `uploadId` is set.
pub async fn delete_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    if let Some(upload_id) = query.get("uploadId") {
        return abort_multipart_upload(&state, &bucket, &key, upload_id).await;
    }

    state.store.delete_object(&bucket, &key).await?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NO_CONTENT;
    Ok(response)
}

/// `POST /{bucket}/{*key}` — `?uploads` starts a multipart upload,
/// `?uploadId=` completes one.
pub async fn post_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    if query.contains_key("uploads") {
        return initiate_multipart_upload(&state, &bucket, &key, &headers).await;
    }
    if let Some(upload_id) = query.get("uploadId") {
        return complete_multipart_upload(&state, &bucket, &key, upload_id, &body).await;
    }

    debug!("unsupported POST on {}/{}", bucket, key);
    Err(AppError::new(
        StatusCode::BAD_REQUEST,
        "InvalidRequest",
        "POST on an object requires `uploads` or `uploadId`",
    )
    .with_resource(format!("/{}/{}", bucket, key)))
}

/// Adapt a request body into the byte stream the store consumes.
pub(crate) fn body_stream(body: Body) -> impl Stream<Item = io::Result<Bytes>> + Send {
    body.into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other))
}

/// `Content-Length` of the request, when present and numeric.
pub(crate) fn declared_size(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Collect `x-amz-meta-*` request headers. Repeated headers keep the last value.
pub(crate) fn request_metadata(headers: &HeaderMap) -> UserMetadata {
    headers
        .iter()
        .filter(|(name, _)| is_user_metadata(name.as_str()))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn set_object_headers(headers: &mut HeaderMap, info: &ObjectInfo) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&info.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(info.size));

    if let Ok(value) = HeaderValue::from_str(&info.quoted_etag()) {
        headers.insert(header::ETAG, value);
    }

    let last_modified = info.last_modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        headers.insert(header::LAST_MODIFIED, value);
    }

    for (name, value) in &info.metadata {
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            headers.insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::time::SystemTime;

    #[test]
    fn metadata_comes_only_from_prefixed_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-amz-meta-owner", HeaderValue::from_static("team-a"));
        headers.insert("X-Amz-Meta-Stage", HeaderValue::from_static("beta"));
        headers.insert("content-type", HeaderValue::from_static("text/plain"));

        let metadata = request_metadata(&headers);
        assert_eq!(metadata.len(), 2);
        assert_eq!(metadata["x-amz-meta-owner"], "team-a");
        assert_eq!(metadata["x-amz-meta-stage"], "beta");
    }

    #[test]
    fn declared_size_reads_content_length() {
        let mut headers = HeaderMap::new();
        assert_eq!(declared_size(&headers), None);
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("42"));
        assert_eq!(declared_size(&headers), Some(42));
    }

    #[test]
    fn object_headers_use_imf_fixdate_and_echo_metadata() {
        let ts = Utc.with_ymd_and_hms(2024, 2, 29, 8, 5, 9).unwrap();
        let mut metadata = UserMetadata::new();
        metadata.insert("x-amz-meta-color".into(), "red".into());
        let info = ObjectInfo::new("img.png", 12, SystemTime::from(ts), metadata);

        let mut headers = HeaderMap::new();
        set_object_headers(&mut headers, &info);
        assert_eq!(headers[header::LAST_MODIFIED], "Thu, 29 Feb 2024 08:05:09 GMT");
        assert_eq!(headers[header::CONTENT_TYPE], "image/png");
        assert_eq!(headers[header::CONTENT_LENGTH], "12");
        assert_eq!(headers[header::ETAG], info.quoted_etag().as_str());
        assert_eq!(headers["x-amz-meta-color"], "red");
    }
}
