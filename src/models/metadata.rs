//! User-defined metadata attached to objects and its on-disk sidecar format.
//!
//! Only `x-amz-meta-*` entries are kept. The sidecar lives next to the object
//! file as `<object>.metadata` and holds one `name=value` entry per line.

use std::{
    collections::BTreeMap,
    ffi::OsString,
    path::{Path, PathBuf},
};

/// Header-name prefix that marks user metadata.
pub const METADATA_PREFIX: &str = "x-amz-meta-";

/// Suffix appended to an object's path to form its sidecar path.
pub const SIDECAR_SUFFIX: &str = ".metadata";

/// Metadata entries keyed by header name.
pub type UserMetadata = BTreeMap<String, String>;

/// Keep only the entries whose name carries the metadata prefix
/// (compared case-insensitively).
pub fn user_metadata(metadata: &UserMetadata) -> UserMetadata {
    metadata
        .iter()
        .filter(|(name, _)| is_user_metadata(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

pub fn is_user_metadata(name: &str) -> bool {
    name.len() >= METADATA_PREFIX.len()
        && name.as_bytes()[..METADATA_PREFIX.len()].eq_ignore_ascii_case(METADATA_PREFIX.as_bytes())
}

/// Path of the sidecar file for the object stored at `object_path`.
pub fn sidecar_path(object_path: &Path) -> PathBuf {
    let mut raw: OsString = object_path.as_os_str().to_owned();
    raw.push(SIDECAR_SUFFIX);
    PathBuf::from(raw)
}

pub fn encode_sidecar(metadata: &UserMetadata) -> String {
    let mut out = String::new();
    for (name, value) in metadata {
        out.push_str(name);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    out
}

/// Parse sidecar contents. Blank lines and lines without `=` are ignored;
/// the value is everything after the first `=`.
pub fn decode_sidecar(contents: &str) -> UserMetadata {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| line.split_once('='))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_by_prefix_case_insensitively() {
        let mut md = UserMetadata::new();
        md.insert("X-Amz-Meta-Author".into(), "ada".into());
        md.insert("x-amz-meta-color".into(), "blue".into());
        md.insert("content-type".into(), "text/plain".into());
        md.insert("x-amz-date".into(), "20240101T000000Z".into());

        let kept = user_metadata(&md);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept["X-Amz-Meta-Author"], "ada");
        assert_eq!(kept["x-amz-meta-color"], "blue");
    }

    #[test]
    fn sidecar_text_survives_equals_in_values() {
        let mut md = UserMetadata::new();
        md.insert("x-amz-meta-query".into(), "a=b=c".into());
        md.insert("x-amz-meta-empty".into(), String::new());

        let text = encode_sidecar(&md);
        assert_eq!(text, "x-amz-meta-empty=\nx-amz-meta-query=a=b=c\n");
        assert_eq!(decode_sidecar(&text), md);
    }

    #[test]
    fn decode_skips_junk_lines() {
        let parsed = decode_sidecar("\n  x-amz-meta-a=1  \nnot-a-pair\n\n");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed["x-amz-meta-a"], "1");
    }

    #[test]
    fn sidecar_sits_next_to_object() {
        let p = sidecar_path(Path::new("/data/b/photos/cat.png"));
        assert_eq!(p, PathBuf::from("/data/b/photos/cat.png.metadata"));
    }
}
