//! Multipart upload sub-operations, reached through the object routes.

use crate::{
    errors::AppError,
    handlers::{
        object_handlers::{body_stream, declared_size, request_metadata},
        xml::{complete_multipart_xml, initiate_multipart_xml, xml_response},
    },
    models::multipart::CompleteMultipartUpload,
    services::storage_service::StorageError,
    state::AppState,
};
use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use tracing::{debug, info};

/// `POST /{bucket}/{*key}?uploads`
pub async fn initiate_multipart_upload(
    state: &AppState,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
) -> Result<Response, AppError> {
    let metadata = request_metadata(headers);
    let upload_id = state
        .store
        .initiate_multipart_upload(bucket, key, &metadata)
        .await?;
    info!("multipart upload {} started for {}/{}", upload_id, bucket, key);
    Ok(xml_response(initiate_multipart_xml(bucket, key, &upload_id)))
}

/// `PUT /{bucket}/{*key}?partNumber=N&uploadId=ID`
pub async fn upload_part(
    state: &AppState,
    bucket: &str,
    key: &str,
    upload_id: &str,
    part_number: Option<&String>,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    ensure_bucket(state, bucket).await?;
    let part_number = parse_part_number(part_number)?;
    let part = state
        .store
        .upload_part(
            bucket,
            key,
            upload_id,
            part_number,
            body_stream(body),
            declared_size(headers),
        )
        .await?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", part.etag)) {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}

/// `POST /{bucket}/{*key}?uploadId=ID`
pub async fn complete_multipart_upload(
    state: &AppState,
    bucket: &str,
    key: &str,
    upload_id: &str,
    body: &Bytes,
) -> Result<Response, AppError> {
    let request: CompleteMultipartUpload = quick_xml::de::from_reader(body.as_ref()).map_err(|err| {
        debug!("unparseable CompleteMultipartUpload body: {}", err);
        AppError::malformed_xml("The XML you provided was not well-formed or did not validate against our published schema.")
    })?;
    if request.parts.is_empty() {
        return Err(AppError::malformed_xml(
            "CompleteMultipartUpload must list at least one part.",
        ));
    }

    let info = state
        .store
        .complete_multipart_upload(bucket, key, upload_id, &request.parts)
        .await?;
    info!(
        "multipart upload {} completed into {}/{} ({} bytes)",
        upload_id, bucket, key, info.size
    );

    let location = format!("http://{}/{}/{}", state.config.base_domain, bucket, key);
    Ok(xml_response(complete_multipart_xml(&location, bucket, key, &info.etag)))
}

/// `DELETE /{bucket}/{*key}?uploadId=ID`
pub async fn abort_multipart_upload(
    state: &AppState,
    bucket: &str,
    key: &str,
    upload_id: &str,
) -> Result<Response, AppError> {
    ensure_bucket(state, bucket).await?;
    state
        .store
        .abort_multipart_upload(bucket, key, upload_id)
        .await?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NO_CONTENT;
    Ok(response)
}

/// Staging lookups alone cannot tell a missing bucket from a missing upload.
async fn ensure_bucket(state: &AppState, bucket: &str) -> Result<(), AppError> {
    if state.store.bucket_exists(bucket).await {
        Ok(())
    } else {
        Err(StorageError::BucketNotFound(bucket.to_string()).into())
    }
}

/// Part numbers are positive integers; anything else is `InvalidPart`.
fn parse_part_number(raw: Option<&String>) -> Result<u32, AppError> {
    raw.and_then(|value| value.trim().parse::<u32>().ok())
        .filter(|n| *n >= 1)
        .ok_or_else(|| AppError::invalid_part("partNumber must be a positive integer"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_numbers_must_be_positive() {
        let parse = |s: &str| parse_part_number(Some(&s.to_string())).ok();
        assert_eq!(parse("1"), Some(1));
        assert_eq!(parse("10000"), Some(10000));
        assert_eq!(parse("0"), None);
        assert_eq!(parse("-2"), None);
        assert_eq!(parse("two"), None);
        assert!(parse_part_number(None).is_err());
    }
}
