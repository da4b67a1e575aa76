//! AWS Signature Version 4 verification for header-signed requests.
//!
//! Only the `Authorization: AWS4-HMAC-SHA256 ...` form is understood.
//! Presigned URLs and clock-skew checks are not supported.

use axum::http::{HeaderMap, Method, Uri};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";
pub const TERMINATOR: &str = "aws4_request";
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

const CONTENT_SHA256_HEADER: &str = "x-amz-content-sha256";
const AMZ_DATE_HEADER: &str = "x-amz-date";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing Authorization header")]
    MissingAuthorization,
    #[error("malformed Authorization header")]
    MalformedAuthorization,
    #[error("malformed credential scope")]
    MalformedCredential,
    #[error("unknown access key")]
    AccessKeyMismatch,
    #[error("signature does not match")]
    SignatureMismatch,
}

/// Parsed `Authorization` header fields.
#[derive(Debug, PartialEq, Eq)]
struct AuthorizationHeader<'a> {
    access_key: &'a str,
    date: &'a str,
    region: &'a str,
    service: &'a str,
    signed_headers: &'a str,
    signature: &'a str,
}

/// Verifies requests against the single credential configured for this server.
///
/// The credential scope (date, region, service) is taken from the request
/// itself, so a client signing for another region still authenticates.
#[derive(Clone)]
pub struct SignatureVerifier {
    access_key: String,
    secret_key: String,
}

impl fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl SignatureVerifier {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    /// Check the request's SigV4 signature. Pure: reads method, URI and
    /// headers and touches nothing else.
    pub fn authenticate(&self, method: &Method, uri: &Uri, headers: &HeaderMap) -> Result<(), AuthError> {
        let raw = headers
            .get(axum::http::header::AUTHORIZATION)
            .ok_or(AuthError::MissingAuthorization)?
            .to_str()
            .map_err(|_| AuthError::MalformedAuthorization)?;
        if raw.trim().is_empty() {
            return Err(AuthError::MissingAuthorization);
        }

        let auth = parse_authorization(raw)?;
        if auth.access_key != self.access_key {
            return Err(AuthError::AccessKeyMismatch);
        }

        let canonical = canonical_request(method, uri, headers, auth.signed_headers);
        let timestamp = header_value(headers, AMZ_DATE_HEADER)
            .or_else(|| header_value(headers, "date"))
            .unwrap_or_default();
        let scope = format!("{}/{}/{}/{}", auth.date, auth.region, auth.service, TERMINATOR);
        let to_sign = string_to_sign(&timestamp, &scope, &canonical);

        let key = signing_key(&self.secret_key, auth.date, auth.region, auth.service);
        let expected = hex::encode(hmac_sha256(&key, to_sign.as_bytes()));

        if expected != auth.signature {
            return Err(AuthError::SignatureMismatch);
        }
        Ok(())
    }
}

/// Split `AWS4-HMAC-SHA256 Credential=..., SignedHeaders=..., Signature=...`.
fn parse_authorization(raw: &str) -> Result<AuthorizationHeader<'_>, AuthError> {
    let rest = raw
        .trim()
        .strip_prefix(ALGORITHM)
        .ok_or(AuthError::MalformedAuthorization)?;
    if !rest.starts_with(char::is_whitespace) {
        return Err(AuthError::MalformedAuthorization);
    }

    let mut credential = None;
    let mut signed_headers = None;
    let mut signature = None;
    for part in rest.split(',') {
        let (name, value) = part
            .trim()
            .split_once('=')
            .ok_or(AuthError::MalformedAuthorization)?;
        match name.trim() {
            "Credential" => credential = Some(value.trim()),
            "SignedHeaders" => signed_headers = Some(value.trim()),
            "Signature" => signature = Some(value.trim()),
            _ => {}
        }
    }

    let (credential, signed_headers, signature) = match (credential, signed_headers, signature) {
        (Some(c), Some(h), Some(s)) if !c.is_empty() && !h.is_empty() && !s.is_empty() => (c, h, s),
        _ => return Err(AuthError::MalformedAuthorization),
    };

    let scope: Vec<&str> = credential.split('/').collect();
    let [access_key, date, region, service, terminator] = scope[..] else {
        return Err(AuthError::MalformedCredential);
    };
    if terminator != TERMINATOR {
        return Err(AuthError::MalformedCredential);
    }

    Ok(AuthorizationHeader {
        access_key,
        date,
        region,
        service,
        signed_headers,
        signature,
    })
}

/// Canonical request: method, path, query, headers, signed-header list and
/// payload hash, newline separated.
pub fn canonical_request(method: &Method, uri: &Uri, headers: &HeaderMap, signed_headers: &str) -> String {
    let path = match uri.path() {
        "" => "/",
        path => path,
    };
    let payload_hash =
        header_value(headers, CONTENT_SHA256_HEADER).unwrap_or_else(|| UNSIGNED_PAYLOAD.to_string());

    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method.as_str(),
        path,
        canonical_query(uri.query().unwrap_or("")),
        canonical_headers(uri, headers, signed_headers),
        signed_headers,
        payload_hash
    )
}

/// Decode every parameter, re-encode with RFC 3986 unreserved characters
/// left as-is, then sort by encoded key (stable, so repeated keys keep their
/// order).
fn canonical_query(query: &str) -> String {
    let mut params: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (urlencoding::encode(&k).into_owned(), urlencoding::encode(&v).into_owned()))
        .collect();
    params.sort_by(|a, b| a.0.cmp(&b.0));

    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// One `name:value\n` line per signed header present on the request, sorted
/// by name. `host` falls back to the URI authority.
fn canonical_headers(uri: &Uri, headers: &HeaderMap, signed_headers: &str) -> String {
    let mut names: Vec<String> = signed_headers
        .split(';')
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();
    names.sort();
    names.dedup();

    let mut out = String::new();
    for name in names {
        let value = match header_value(headers, &name) {
            Some(value) => value,
            None if name == "host" => match uri.authority() {
                Some(authority) => authority.as_str().to_string(),
                None => continue,
            },
            None => continue,
        };
        out.push_str(&name);
        out.push(':');
        out.push_str(&value);
        out.push('\n');
    }
    out
}

/// All values of a header joined by `,`, each with whitespace runs
/// collapsed. `None` when the header is absent or empty.
fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let values: Vec<String> = headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(collapse_whitespace)
        .collect();
    let joined = values.join(",");
    if joined.is_empty() { None } else { Some(joined) }
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn string_to_sign(timestamp: &str, scope: &str, canonical_request: &str) -> String {
    format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        timestamp,
        scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    )
}

pub fn signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, TERMINATOR.as_bytes())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}
