//! Represents multipart upload parts.
//!
//! Sessions have no record of their own: an upload is the staging directory
//! `{bucket}/.uploads/{upload_id}` and its parts are the `part-{n}` files in it.

use serde::{Deserialize, Serialize};

/// Directory under each bucket that holds in-progress uploads.
pub const UPLOADS_DIR: &str = ".uploads";

/// File name of a staged part.
pub fn part_file_name(part_number: u32) -> String {
    format!("part-{}", part_number)
}

/// A staged part, as returned by `upload_part`.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct PartInfo {
    /// Part number (1-based).
    pub part_number: u32,

    /// Entity tag of the staged file (time-derived, unquoted).
    pub etag: String,

    /// Size in bytes.
    pub size: u64,
}

/// One `<Part>` entry of a `CompleteMultipartUpload` request body.
///
/// The ETag is carried through but never compared with the staged data.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CompletePart {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,

    #[serde(rename = "ETag", default)]
    pub etag: String,
}

/// Body of a `CompleteMultipartUpload` request. Parts appear in the order the
/// object should be assembled.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct CompleteMultipartUpload {
    #[serde(rename = "Part", default)]
    pub parts: Vec<CompletePart>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_body_keeps_caller_order() {
        let body = r#"<CompleteMultipartUpload xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
            <Part><PartNumber>2</PartNumber><ETag>"b"</ETag></Part>
            <Part><PartNumber>1</PartNumber><ETag>"a"</ETag></Part>
        </CompleteMultipartUpload>"#;
        let parsed: CompleteMultipartUpload = quick_xml::de::from_str(body).unwrap();
        let numbers: Vec<u32> = parsed.parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![2, 1]);
        assert_eq!(parsed.parts[1].etag, "\"a\"");
    }

    #[test]
    fn part_files_are_named_by_number() {
        assert_eq!(part_file_name(7), "part-7");
    }
}
