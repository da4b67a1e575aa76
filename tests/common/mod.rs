//! Shared harness for the HTTP integration tests: a router over a temporary
//! data directory plus a from-scratch SigV4 client signer.

#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Request, Response},
};
use hmac::{Hmac, Mac};
use locals3::{AppState, config::AppConfig, create_router};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tower::ServiceExt;

type HmacSha256 = Hmac<Sha256>;

pub const ACCESS_KEY: &str = "test";
pub const SECRET_KEY: &str = "test123456789";
pub const REGION: &str = "ap-southeast-3";
pub const HOST: &str = "localhost:3000";

pub struct TestApp {
    pub router: Router,
    pub dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::build(false)
    }

    pub fn without_auth() -> Self {
        Self::build(true)
    }

    fn build(disable_auth: bool) -> Self {
        let dir = TempDir::new().unwrap();
        let config = AppConfig {
            host: "127.0.0.1".to_string(),
            port: 3000,
            data_dir: dir.path().join("data"),
            access_key: ACCESS_KEY.to_string(),
            secret_key: SECRET_KEY.to_string(),
            region: REGION.to_string(),
            log_level: "debug".to_string(),
            base_domain: "s3.local.test".to_string(),
            disable_auth,
        };
        let router = create_router(AppState::new(config));
        Self { router, dir }
    }

    /// Send a request signed with the configured credential.
    pub async fn send(&self, method: &str, uri: &str, headers: &[(&str, &str)], body: &[u8]) -> Response<Body> {
        self.send_signed_with(ACCESS_KEY, SECRET_KEY, method, uri, headers, body)
            .await
    }

    pub async fn send_signed_with(
        &self,
        access_key: &str,
        secret_key: &str,
        method: &str,
        uri: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> Response<Body> {
        let signed = sign_request(access_key, secret_key, method, uri, headers, body);
        self.dispatch(method, uri, &signed, body).await
    }

    /// Send a request with exactly the given headers.
    pub async fn send_unsigned(&self, method: &str, uri: &str, headers: &[(&str, &str)], body: &[u8]) -> Response<Body> {
        let owned: Vec<(String, String)> = headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.dispatch(method, uri, &owned, body).await
    }

    async fn dispatch(&self, method: &str, uri: &str, headers: &[(String, String)], body: &[u8]) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let request = builder.body(Body::from(body.to_vec())).unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Text between the first `<tag>` and its closing tag.
pub fn xml_field(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml[start..end].to_string())
}

/// Every `<Key>` value in document order.
pub fn xml_keys(xml: &str) -> Vec<String> {
    xml.split("<Key>")
        .skip(1)
        .filter_map(|rest| rest.split("</Key>").next())
        .map(str::to_string)
        .collect()
}

/// Returns the full header list to send: `extra` (names lowercased) plus
/// host, x-amz-date, x-amz-content-sha256 and authorization.
pub fn sign_request(
    access_key: &str,
    secret_key: &str,
    method: &str,
    uri: &str,
    extra: &[(&str, &str)],
    body: &[u8],
) -> Vec<(String, String)> {
    let (path, query) = uri.split_once('?').unwrap_or((uri, ""));

    let now = chrono::Utc::now();
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let payload_hash = hex::encode(Sha256::digest(body));

    let mut headers: Vec<(String, String)> = extra
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    headers.push(("host".to_string(), HOST.to_string()));
    headers.push(("x-amz-date".to_string(), amz_date.clone()));
    headers.push(("x-amz-content-sha256".to_string(), payload_hash.clone()));
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let signed_headers = headers.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>().join(";");
    let canonical_headers: String = headers.iter().map(|(k, v)| format!("{}:{}\n", k, v)).collect();

    let mut pairs: Vec<(String, String)> = query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (aws_encode(&percent_decode(k)), aws_encode(&percent_decode(v)))
        })
        .collect();
    pairs.sort();
    let canonical_query = pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method, path, canonical_query, canonical_headers, signed_headers, payload_hash
    );

    let scope = format!("{}/{}/s3/aws4_request", date_stamp, REGION);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let k_date = hmac(format!("AWS4{}", secret_key).as_bytes(), date_stamp.as_bytes());
    let k_region = hmac(&k_date, REGION.as_bytes());
    let k_service = hmac(&k_region, b"s3");
    let k_signing = hmac(&k_service, b"aws4_request");
    let signature = hex::encode(hmac(&k_signing, string_to_sign.as_bytes()));

    headers.push((
        "authorization".to_string(),
        format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            access_key, scope, signed_headers, signature
        ),
    ));
    headers
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).unwrap();
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn percent_decode(value: &str) -> String {
    urlencoding::decode(value).unwrap().into_owned()
}

fn aws_encode(value: &str) -> String {
    let mut out = String::new();
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
