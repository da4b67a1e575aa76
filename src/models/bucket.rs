//! Represents a logical bucket — a top-level directory under the base path.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A bucket as reported by `ListBuckets`.
///
/// The creation date is not stored anywhere; it is the modification time of
/// the bucket directory, so it moves whenever an entry is added or removed
/// directly beneath it.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct BucketInfo {
    /// Directory name, which is also the bucket name.
    pub name: String,

    /// Modification time of the bucket directory.
    pub creation_date: DateTime<Utc>,
}
