//! Represents an object (file) stored in a bucket.

use crate::models::metadata::UserMetadata;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::SystemTime;

/// Content type reported for keys without a recognised extension.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Descriptor of a single object, as returned by put/get/head/list.
///
/// The object bytes themselves are never held here; `get_object` hands back
/// an open file alongside this descriptor.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object key (slash-separated, relative to the bucket).
    pub key: String,

    /// Size in bytes.
    pub size: u64,

    /// Entity tag, unquoted. Derived from the modification time, not from
    /// the content: see [`etag_for`].
    pub etag: String,

    /// Modification time of the object file.
    pub last_modified: DateTime<Utc>,

    /// MIME type inferred from the key's extension.
    pub content_type: String,

    /// User metadata (`x-amz-meta-*` entries only).
    pub metadata: UserMetadata,
}

impl ObjectInfo {
    pub fn new(key: &str, size: u64, modified: SystemTime, metadata: UserMetadata) -> Self {
        let last_modified = DateTime::<Utc>::from(modified);
        Self {
            key: key.to_string(),
            size,
            etag: etag_for(&last_modified),
            last_modified,
            content_type: content_type_for(key).to_string(),
            metadata,
        }
    }

    /// The entity tag wrapped in double quotes, as it travels in headers and XML.
    pub fn quoted_etag(&self) -> String {
        format!("\"{}\"", self.etag)
    }
}

/// Entity tag for a file last modified at `modified`: the Unix timestamp in
/// seconds, hex-encoded.
///
/// Two writes landing in the same second share a tag, and rewriting identical
/// bytes later changes it.
pub fn etag_for(modified: &DateTime<Utc>) -> String {
    format!("{:x}", modified.timestamp())
}

/// Map a key's extension (case-insensitive) to a MIME type.
pub fn content_type_for(key: &str) -> &'static str {
    let file_name = key.rsplit('/').next().unwrap_or(key);
    let ext = match file_name.rfind('.') {
        Some(idx) => file_name[idx + 1..].to_ascii_lowercase(),
        None => return DEFAULT_CONTENT_TYPE,
    };

    match ext.as_str() {
        "json" => "application/json",
        "xml" => "application/xml",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn content_type_follows_extension_table() {
        assert_eq!(content_type_for("docs/readme.txt"), "text/plain");
        assert_eq!(content_type_for("IMG.JPEG"), "image/jpeg");
        assert_eq!(content_type_for("site/index.htm"), "text/html");
        assert_eq!(content_type_for("data.bin"), DEFAULT_CONTENT_TYPE);
        assert_eq!(content_type_for("no-extension"), DEFAULT_CONTENT_TYPE);
        // the dot belongs to a directory, not the file
        assert_eq!(content_type_for("v1.2/blob"), DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn etag_is_hex_of_unix_seconds() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(etag_for(&ts), format!("{:x}", ts.timestamp()));

        let info = ObjectInfo::new("a.json", 3, SystemTime::from(ts), UserMetadata::new());
        assert_eq!(info.quoted_etag(), format!("\"{:x}\"", ts.timestamp()));
        assert_eq!(info.content_type, "application/json");
    }
}
