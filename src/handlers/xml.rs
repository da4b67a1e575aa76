//! Hand-built S3 XML response bodies.

use crate::{
    models::{bucket::BucketInfo, object::ObjectInfo},
    services::storage_service::ListObjectsResult,
};
use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use chrono::SecondsFormat;

const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;
const S3_NS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// Request-side listing parameters echoed back in `ListBucketResult`.
#[derive(Debug, Default)]
pub struct ListingEcho<'a> {
    pub prefix: &'a str,
    pub delimiter: &'a str,
    /// V1 only.
    pub marker: &'a str,
    pub max_keys: usize,
    pub version: ListingVersion<'a>,
}

#[derive(Debug, Default)]
pub enum ListingVersion<'a> {
    #[default]
    V1,
    V2 {
        continuation_token: Option<&'a str>,
        start_after: Option<&'a str>,
        next_continuation_token: Option<String>,
    },
}

pub fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Wrap an XML document in a 200 response.
pub fn xml_response(xml: String) -> Response {
    let mut response = Response::new(Body::from(xml));
    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/xml"));
    response
}

fn owner_xml(owner: &str) -> String {
    let owner = xml_escape(owner);
    format!("<Owner><ID>{}</ID><DisplayName>{}</DisplayName></Owner>", owner, owner)
}

pub fn list_buckets_xml(owner: &str, buckets: &[BucketInfo]) -> String {
    let mut xml = format!(r#"{}<ListAllMyBucketsResult xmlns="{}">"#, XML_DECL, S3_NS);
    xml.push_str(&owner_xml(owner));
    xml.push_str("<Buckets>");
    for bucket in buckets {
        xml.push_str(&format!(
            "<Bucket><Name>{}</Name><CreationDate>{}</CreationDate></Bucket>",
            xml_escape(&bucket.name),
            bucket.creation_date.to_rfc3339_opts(SecondsFormat::Millis, true)
        ));
    }
    xml.push_str("</Buckets></ListAllMyBucketsResult>");
    xml
}

pub fn list_objects_xml(bucket: &str, owner: &str, echo: &ListingEcho<'_>, result: &ListObjectsResult) -> String {
    let mut xml = format!(r#"{}<ListBucketResult xmlns="{}">"#, XML_DECL, S3_NS);
    xml.push_str(&format!("<Name>{}</Name>", xml_escape(bucket)));
    xml.push_str(&format!("<Prefix>{}</Prefix>", xml_escape(echo.prefix)));

    match &echo.version {
        ListingVersion::V1 => {
            xml.push_str(&format!("<Marker>{}</Marker>", xml_escape(echo.marker)));
        }
        ListingVersion::V2 {
            continuation_token,
            start_after,
            ..
        } => {
            xml.push_str(&format!(
                "<KeyCount>{}</KeyCount>",
                result.objects.len() + result.common_prefixes.len()
            ));
            if let Some(token) = continuation_token {
                xml.push_str(&format!("<ContinuationToken>{}</ContinuationToken>", xml_escape(token)));
            }
            if let Some(sa) = start_after {
                xml.push_str(&format!("<StartAfter>{}</StartAfter>", xml_escape(sa)));
            }
        }
    }

    xml.push_str(&format!("<MaxKeys>{}</MaxKeys>", echo.max_keys));
    if !echo.delimiter.is_empty() {
        xml.push_str(&format!("<Delimiter>{}</Delimiter>", xml_escape(echo.delimiter)));
    }
    xml.push_str(&format!(
        "<IsTruncated>{}</IsTruncated>",
        if result.is_truncated { "true" } else { "false" }
    ));

    match &echo.version {
        ListingVersion::V1 => {
            if let Some(next) = &result.next_marker {
                xml.push_str(&format!("<NextMarker>{}</NextMarker>", xml_escape(next)));
            }
        }
        ListingVersion::V2 {
            next_continuation_token: Some(next),
            ..
        } => {
            xml.push_str(&format!(
                "<NextContinuationToken>{}</NextContinuationToken>",
                xml_escape(next)
            ));
        }
        ListingVersion::V2 { .. } => {}
    }

    for obj in &result.objects {
        push_contents(&mut xml, obj, owner);
    }

    for prefix in &result.common_prefixes {
        xml.push_str("<CommonPrefixes><Prefix>");
        xml.push_str(&xml_escape(prefix));
        xml.push_str("</Prefix></CommonPrefixes>");
    }

    xml.push_str("</ListBucketResult>");
    xml
}

fn push_contents(xml: &mut String, obj: &ObjectInfo, owner: &str) {
    xml.push_str("<Contents>");
    xml.push_str(&format!("<Key>{}</Key>", xml_escape(&obj.key)));
    xml.push_str(&format!(
        "<LastModified>{}</LastModified>",
        obj.last_modified.to_rfc3339_opts(SecondsFormat::Millis, true)
    ));
    xml.push_str(&format!("<ETag>\"{}\"</ETag>", xml_escape(&obj.etag)));
    xml.push_str(&format!("<Size>{}</Size>", obj.size));
    xml.push_str("<StorageClass>STANDARD</StorageClass>");
    xml.push_str(&owner_xml(owner));
    xml.push_str("</Contents>");
}

pub fn initiate_multipart_xml(bucket: &str, key: &str, upload_id: &str) -> String {
    format!(
        concat!(
            "{}",
            r#"<InitiateMultipartUploadResult xmlns="{}">"#,
            "<Bucket>{}</Bucket><Key>{}</Key><UploadId>{}</UploadId>",
            "</InitiateMultipartUploadResult>"
        ),
        XML_DECL,
        S3_NS,
        xml_escape(bucket),
        xml_escape(key),
        xml_escape(upload_id)
    )
}

/// `etag` is unquoted.
pub fn complete_multipart_xml(location: &str, bucket: &str, key: &str, etag: &str) -> String {
    format!(
        concat!(
            "{}",
            r#"<CompleteMultipartUploadResult xmlns="{}">"#,
            "<Location>{}</Location><Bucket>{}</Bucket><Key>{}</Key><ETag>\"{}\"</ETag>",
            "</CompleteMultipartUploadResult>"
        ),
        XML_DECL,
        S3_NS,
        xml_escape(location),
        xml_escape(bucket),
        xml_escape(key),
        xml_escape(etag)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::metadata::UserMetadata;
    use chrono::{TimeZone, Utc};
    use std::time::SystemTime;

    #[test]
    fn escapes_markup() {
        assert_eq!(xml_escape(r#"a<b>&"c'"#), "a&lt;b&gt;&amp;&quot;c&apos;");
    }

    #[test]
    fn v1_listing_reports_next_marker_and_prefixes() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let result = ListObjectsResult {
            objects: vec![ObjectInfo::new("a<1>", 3, SystemTime::from(ts), UserMetadata::new())],
            common_prefixes: vec!["dir/".into()],
            is_truncated: true,
            next_marker: Some("a<1>".into()),
        };
        let echo = ListingEcho {
            delimiter: "/",
            max_keys: 1,
            ..Default::default()
        };
        let xml = list_objects_xml("bucket", "owner", &echo, &result);

        assert!(xml.contains("<Key>a&lt;1&gt;</Key>"));
        assert!(xml.contains("<LastModified>2024-05-01T12:00:00.000Z</LastModified>"));
        assert!(xml.contains("<IsTruncated>true</IsTruncated>"));
        assert!(xml.contains("<NextMarker>a&lt;1&gt;</NextMarker>"));
        assert!(xml.contains("<CommonPrefixes><Prefix>dir/</Prefix></CommonPrefixes>"));
        assert!(xml.contains("<StorageClass>STANDARD</StorageClass>"));
        assert!(xml.contains("<Delimiter>/</Delimiter>"));
        assert!(!xml.contains("KeyCount"));
    }

    #[test]
    fn v2_listing_reports_key_count_and_tokens() {
        let result = ListObjectsResult::default();
        let echo = ListingEcho {
            prefix: "p/",
            max_keys: 1000,
            version: ListingVersion::V2 {
                continuation_token: Some("abc"),
                start_after: None,
                next_continuation_token: Some("def".into()),
            },
            ..Default::default()
        };
        let xml = list_objects_xml("bucket", "owner", &echo, &result);

        assert!(xml.contains("<KeyCount>0</KeyCount>"));
        assert!(xml.contains("<ContinuationToken>abc</ContinuationToken>"));
        assert!(xml.contains("<NextContinuationToken>def</NextContinuationToken>"));
        assert!(!xml.contains("<Marker>"));
    }
}
