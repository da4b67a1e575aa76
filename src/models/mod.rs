//! Core data models for the filesystem-backed object store.
//!
//! These types carry every field the S3 XML responses need; none of them is
//! persisted as-is. Object bytes, sidecar metadata and staged parts live on
//! disk in the layout described in `services::storage_service`.

pub mod bucket;
pub mod metadata;
pub mod multipart;
pub mod object;
