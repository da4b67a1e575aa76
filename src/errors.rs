//! HTTP-facing error type rendering the S3 XML error envelope.

use crate::{
    handlers::xml::xml_escape,
    services::{auth_service::AuthError, storage_service::StorageError},
};
use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::fmt;
use tracing::error;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-amz-request-id";

/// An S3 error: status, machine-readable code, human message and the
/// resource it concerns.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub resource: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: msg.into(),
            resource: String::new(),
        }
    }

    /// Shortcut for a 500 InternalError
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "InternalError", msg)
    }

    pub fn malformed_xml(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "MalformedXML", msg)
    }

    pub fn invalid_part(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "InvalidPart", msg)
    }

    /// Replace the resource reported in the envelope.
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().simple().to_string();
        let body = format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8"?>"#,
                "<Error><Code>{}</Code><Message>{}</Message>",
                "<Resource>{}</Resource><RequestId>{}</RequestId></Error>"
            ),
            self.code,
            xml_escape(&self.message),
            xml_escape(&self.resource),
            request_id
        );

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = self.status;
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/xml"));
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            headers.insert(REQUEST_ID_HEADER, value);
        }
        response
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        let message = err.to_string();
        match err {
            StorageError::BucketNotFound(bucket) => {
                Self::new(StatusCode::NOT_FOUND, "NoSuchBucket", message).with_resource(format!("/{}", bucket))
            }
            StorageError::BucketAlreadyExists(bucket) => {
                Self::new(StatusCode::CONFLICT, "BucketAlreadyExists", message)
                    .with_resource(format!("/{}", bucket))
            }
            StorageError::BucketNotEmpty(bucket) => {
                Self::new(StatusCode::CONFLICT, "BucketNotEmpty", message).with_resource(format!("/{}", bucket))
            }
            StorageError::InvalidBucketName { name, .. } => {
                Self::new(StatusCode::BAD_REQUEST, "InvalidBucketName", message).with_resource(format!("/{}", name))
            }
            StorageError::ObjectNotFound { bucket, key } => {
                Self::new(StatusCode::NOT_FOUND, "NoSuchKey", message)
                    .with_resource(format!("/{}/{}", bucket, key))
            }
            StorageError::InvalidObjectKey(_) => Self::new(StatusCode::BAD_REQUEST, "InvalidArgument", message),
            StorageError::UploadNotFound(_) => Self::new(StatusCode::NOT_FOUND, "NoSuchUpload", message),
            StorageError::InvalidPart(_) => Self::invalid_part(message),
            StorageError::Io(io_err) => {
                error!("storage I/O failure: {}", io_err);
                Self::internal("We encountered an internal error. Please try again.")
            }
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        let code = match err {
            AuthError::AccessKeyMismatch => "InvalidAccessKeyId",
            AuthError::SignatureMismatch => "SignatureDoesNotMatch",
            AuthError::MissingAuthorization
            | AuthError::MalformedAuthorization
            | AuthError::MalformedCredential => "AccessDenied",
        };
        Self::new(StatusCode::FORBIDDEN, code, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn renders_xml_envelope_with_request_id() {
        let err: AppError = StorageError::ObjectNotFound {
            bucket: "b".into(),
            key: "a&b.txt".into(),
        }
        .into();
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/xml");
        let request_id = response.headers()[REQUEST_ID_HEADER].to_str().unwrap().to_string();

        let body = body_text(response).await;
        assert!(body.contains("<Code>NoSuchKey</Code>"));
        assert!(body.contains("<Resource>/b/a&amp;b.txt</Resource>"));
        assert!(body.contains(&format!("<RequestId>{}</RequestId>", request_id)));
    }

    #[test]
    fn storage_errors_map_to_s3_codes() {
        let cases: Vec<(StorageError, StatusCode, &str)> = vec![
            (StorageError::BucketNotFound("b".into()), StatusCode::NOT_FOUND, "NoSuchBucket"),
            (StorageError::BucketAlreadyExists("b".into()), StatusCode::CONFLICT, "BucketAlreadyExists"),
            (StorageError::BucketNotEmpty("b".into()), StatusCode::CONFLICT, "BucketNotEmpty"),
            (
                StorageError::InvalidBucketName { name: "B".into(), reason: "r".into() },
                StatusCode::BAD_REQUEST,
                "InvalidBucketName",
            ),
            (StorageError::InvalidObjectKey("../x".into()), StatusCode::BAD_REQUEST, "InvalidArgument"),
            (StorageError::UploadNotFound("1".into()), StatusCode::NOT_FOUND, "NoSuchUpload"),
            (StorageError::InvalidPart(3), StatusCode::BAD_REQUEST, "InvalidPart"),
            (
                StorageError::Io(io::Error::new(io::ErrorKind::Other, "disk on fire")),
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalError",
            ),
        ];
        for (err, status, code) in cases {
            let app: AppError = err.into();
            assert_eq!((app.status, app.code), (status, code));
        }
    }

    #[test]
    fn io_details_stay_out_of_the_message() {
        let app: AppError = StorageError::Io(io::Error::new(io::ErrorKind::Other, "/secret/path")).into();
        assert!(!app.message.contains("/secret/path"));
    }

    #[test]
    fn auth_errors_are_forbidden() {
        for (err, code) in [
            (AuthError::MissingAuthorization, "AccessDenied"),
            (AuthError::MalformedAuthorization, "AccessDenied"),
            (AuthError::MalformedCredential, "AccessDenied"),
            (AuthError::AccessKeyMismatch, "InvalidAccessKeyId"),
            (AuthError::SignatureMismatch, "SignatureDoesNotMatch"),
        ] {
            let app: AppError = err.into();
            assert_eq!(app.status, StatusCode::FORBIDDEN);
            assert_eq!(app.code, code);
        }
    }
}
