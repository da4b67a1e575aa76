//! src/services/storage_service.rs
//!
//! ObjectStore — S3-like bucket, object and multipart operations mapped
//! directly onto a directory tree rooted at `base_path`:
//!
//! - `{base}/{bucket}/{key}` holds the object bytes
//! - `{base}/{bucket}/{key}.metadata` holds user metadata, one `name=value` per line
//! - `{base}/{bucket}/.uploads/{upload_id}/part-{n}` holds staged multipart parts
//!
//! The store keeps no cache and takes no locks. Every call observes the
//! filesystem as it is at that moment, and concurrent writers to the same key
//! race exactly as the underlying rename/remove calls do.

use crate::models::{
    bucket::BucketInfo,
    metadata::{SIDECAR_SUFFIX, UserMetadata, decode_sidecar, encode_sidecar, sidecar_path, user_metadata},
    multipart::{CompletePart, PartInfo, UPLOADS_DIR, part_file_name},
    object::{ObjectInfo, etag_for},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, TryStreamExt, pin_mut};
use std::{
    collections::BTreeSet,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Clone, Debug, Default)]
pub struct ListObjectsParams {
    pub prefix: String,
    pub delimiter: String,
    pub marker: String,
    /// Zero means no limit.
    pub max_keys: usize,
}

#[derive(Debug, Default)]
pub struct ListObjectsResult {
    pub objects: Vec<ObjectInfo>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_marker: Option<String>,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{0}` is not empty")]
    BucketNotEmpty(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key `{0}`")]
    InvalidObjectKey(String),
    #[error("upload `{0}` not found")]
    UploadNotFound(String),
    #[error("part {0} has not been uploaded")]
    InvalidPart(u32),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

/// Prefix of in-flight temporary files written next to their destination.
const TMP_PREFIX: &str = ".locals3-tmp-";

/// Last upload ID handed out, so IDs stay strictly increasing even when the
/// clock stalls or steps backwards.
static LAST_UPLOAD_ID: AtomicU64 = AtomicU64::new(0);

/// ObjectStore owns everything beneath `base_path`.
///
/// Cloning is cheap: the store is just the root path.
#[derive(Clone, Debug)]
pub struct ObjectStore {
    /// Base directory on disk; each bucket is a directory directly beneath it.
    pub base_path: PathBuf,
}

impl ObjectStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    // ----------------------------------------------------------------------
    // Buckets
    // ----------------------------------------------------------------------

    /// Create the bucket directory (and the base path if needed).
    ///
    /// Succeeds on an existing bucket; callers that must reject duplicates
    /// check [`ObjectStore::bucket_exists`] first.
    pub async fn create_bucket(&self, name: &str) -> StorageResult<()> {
        ensure_bucket_name_safe(name)?;
        let bucket_root = self.bucket_root(name);
        fs::create_dir_all(&bucket_root).await?;
        debug!("created bucket directory {}", bucket_root.display());
        Ok(())
    }

    /// Remove an empty bucket directory.
    pub async fn delete_bucket(&self, name: &str) -> StorageResult<()> {
        let bucket_root = self.existing_bucket(name).await?;

        let mut entries = match fs::read_dir(&bucket_root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StorageError::BucketNotFound(name.to_string()));
            }
            Err(err) => return Err(StorageError::Io(err)),
        };
        if entries.next_entry().await?.is_some() {
            return Err(StorageError::BucketNotEmpty(name.to_string()));
        }

        fs::remove_dir(&bucket_root).await?;
        debug!("removed bucket directory {}", bucket_root.display());
        Ok(())
    }

    /// Every directory directly under the base path, sorted by name.
    ///
    /// A missing base path yields an empty list. Entries whose metadata
    /// cannot be read are skipped.
    pub async fn list_buckets(&self) -> StorageResult<Vec<BucketInfo>> {
        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StorageError::Io(err)),
        };

        let mut buckets = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Ok(modified) = meta.modified() else {
                continue;
            };
            buckets.push(BucketInfo {
                name,
                creation_date: modified.into(),
            });
        }

        buckets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(buckets)
    }

    /// True iff `name` is a usable bucket name with a directory behind it.
    pub async fn bucket_exists(&self, name: &str) -> bool {
        ensure_bucket_name_safe(name).is_ok() && is_dir(&self.bucket_root(name)).await
    }

    // ----------------------------------------------------------------------
    // Objects
    // ----------------------------------------------------------------------

    /// Stream an object body to disk.
    ///
    /// - Writes the bytes verbatim to a temporary file beside the destination.
    /// - Renames it over the destination, replacing any previous object.
    /// - Writes the metadata sidecar when `metadata` has `x-amz-meta-*` entries,
    ///   otherwise removes a stale one.
    ///
    /// `declared_size` is informational only; the returned size is the number
    /// of bytes actually written.
    pub async fn put_object<S>(
        &self,
        bucket: &str,
        key: &str,
        stream: S,
        declared_size: Option<u64>,
        metadata: &UserMetadata,
    ) -> StorageResult<ObjectInfo>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let bucket_root = self.existing_bucket(bucket).await?;
        ensure_key_safe(key)?;

        let file_path = bucket_root.join(key);
        let written = write_replacing(&file_path, stream).await?;
        if let Some(declared) = declared_size {
            if declared != written {
                debug!(
                    "object {}/{}: declared {} bytes, wrote {}",
                    bucket, key, declared, written
                );
            }
        }

        let user = user_metadata(metadata);
        store_metadata(&file_path, &user).await;

        let modified = fs::metadata(&file_path).await?.modified()?;
        debug!("stored object {}/{} ({} bytes)", bucket, key, written);
        Ok(ObjectInfo::new(key, written, modified, user))
    }

    /// Open an object for reading.
    ///
    /// Returns the descriptor and a file handle positioned at the start; the
    /// caller drops the handle once the body has been streamed out.
    pub async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<(ObjectInfo, File)> {
        let bucket_root = self.existing_bucket(bucket).await?;
        ensure_key_safe(key)?;

        let file_path = bucket_root.join(key);
        let file = File::open(&file_path)
            .await
            .map_err(|err| not_found_as_object(err, bucket, key))?;
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(object_not_found(bucket, key));
        }

        let metadata = load_metadata(&file_path).await;
        let info = ObjectInfo::new(key, meta.len(), meta.modified()?, metadata);
        Ok((info, file))
    }

    /// Same descriptor as [`ObjectStore::get_object`], without opening the file.
    pub async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectInfo> {
        let bucket_root = self.existing_bucket(bucket).await?;
        ensure_key_safe(key)?;

        let file_path = bucket_root.join(key);
        let meta = fs::metadata(&file_path)
            .await
            .map_err(|err| not_found_as_object(err, bucket, key))?;
        if !meta.is_file() {
            return Err(object_not_found(bucket, key));
        }

        let metadata = load_metadata(&file_path).await;
        Ok(ObjectInfo::new(key, meta.len(), meta.modified()?, metadata))
    }

    /// Remove an object and its sidecar, then prune directories the key
    /// left empty.
    pub async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let bucket_root = self.existing_bucket(bucket).await?;
        ensure_key_safe(key)?;

        let file_path = bucket_root.join(key);
        let _ = fs::remove_file(sidecar_path(&file_path)).await;
        fs::remove_file(&file_path)
            .await
            .map_err(|err| not_found_as_object(err, bucket, key))?;
        debug!("removed object {}/{}", bucket, key);

        if let Some(parent) = file_path.parent() {
            prune_empty_dirs(parent, &bucket_root).await;
        }
        Ok(())
    }

    /// True iff something exists at the object's path.
    ///
    /// Unlike the other accessors this does not check the bucket first: a
    /// missing bucket simply means a missing path.
    pub async fn object_exists(&self, bucket: &str, key: &str) -> bool {
        if ensure_bucket_name_safe(bucket).is_err() || ensure_key_safe(key).is_err() {
            return false;
        }
        fs::metadata(self.bucket_root(bucket).join(key)).await.is_ok()
    }

    /// List objects with S3 ListObjects (V1) semantics.
    ///
    /// Walks the whole bucket, skipping sidecars, temporary files and the
    /// `.uploads` staging tree, then in key order:
    /// - drops keys not starting with `prefix`
    /// - drops keys `<= marker`
    /// - with a delimiter, rolls keys up into common prefixes
    /// - truncates the object list to `max_keys`
    ///
    /// The walk sees whatever the directory tree holds while it runs; entries
    /// that vanish mid-walk are skipped.
    pub async fn list_objects(
        &self,
        bucket: &str,
        params: &ListObjectsParams,
    ) -> StorageResult<ListObjectsResult> {
        let bucket_root = self.existing_bucket(bucket).await?;
        let mut files = walk_bucket(&bucket_root).await?;
        files.sort_by(|a, b| a.0.cmp(&b.0));

        let mut matched = Vec::new();
        let mut common_prefixes = BTreeSet::new();
        for (key, path) in files {
            if !key.starts_with(&params.prefix) {
                continue;
            }
            if !params.marker.is_empty() && key.as_str() <= params.marker.as_str() {
                continue;
            }
            if !params.delimiter.is_empty() {
                if let Some(prefix) = compute_common_prefix(&key, &params.prefix, &params.delimiter) {
                    common_prefixes.insert(prefix);
                    continue;
                }
            }
            matched.push((key, path));
        }

        let mut is_truncated = false;
        let mut next_marker = None;
        if params.max_keys > 0 && matched.len() > params.max_keys {
            matched.truncate(params.max_keys);
            is_truncated = true;
            next_marker = matched.last().map(|(key, _)| key.clone());
        }

        let mut objects = Vec::with_capacity(matched.len());
        for (key, path) in matched {
            let meta = match fs::metadata(&path).await {
                Ok(meta) => meta,
                Err(err) => {
                    debug!("skipping {} during listing: {}", path.display(), err);
                    continue;
                }
            };
            let metadata = load_metadata(&path).await;
            objects.push(ObjectInfo::new(&key, meta.len(), meta.modified()?, metadata));
        }

        Ok(ListObjectsResult {
            objects,
            common_prefixes: common_prefixes.into_iter().collect(),
            is_truncated,
            next_marker,
        })
    }

    // ----------------------------------------------------------------------
    // Multipart uploads
    // ----------------------------------------------------------------------

    /// Start an upload session and return its ID.
    ///
    /// `metadata` is accepted for interface parity but is not persisted: the
    /// completed object carries no user metadata.
    pub async fn initiate_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: &UserMetadata,
    ) -> StorageResult<String> {
        let bucket_root = self.existing_bucket(bucket).await?;
        ensure_key_safe(key)?;

        let upload_id = next_upload_id();
        let upload_dir = bucket_root.join(UPLOADS_DIR).join(&upload_id);
        fs::create_dir_all(&upload_dir).await?;
        debug!(
            "initiated upload {} for {}/{} ({} metadata entries dropped)",
            upload_id,
            bucket,
            key,
            metadata.len()
        );
        Ok(upload_id)
    }

    /// Stage one part. The session directory is not checked up front; an
    /// unknown upload ID surfaces when the part file cannot be created.
    pub async fn upload_part<S>(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        stream: S,
        declared_size: Option<u64>,
    ) -> StorageResult<PartInfo>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        if part_number == 0 {
            return Err(StorageError::InvalidPart(part_number));
        }
        let upload_dir = self.upload_dir(bucket, upload_id)?;
        let part_path = upload_dir.join(part_file_name(part_number));

        let mut file = File::create(&part_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::UploadNotFound(upload_id.to_string())
            } else {
                StorageError::Io(err)
            }
        })?;
        let written = copy_stream(&mut file, stream).await?;
        file.flush().await?;
        if let Some(declared) = declared_size {
            if declared != written {
                debug!(
                    "part {} of upload {}: declared {} bytes, wrote {}",
                    part_number, upload_id, declared, written
                );
            }
        }

        let modified = file.metadata().await?.modified()?;
        debug!(
            "staged part {} of upload {} for {}/{} ({} bytes)",
            part_number, upload_id, bucket, key, written
        );
        Ok(PartInfo {
            part_number,
            etag: etag_for(&DateTime::<Utc>::from(modified)),
            size: written,
        })
    }

    /// Concatenate staged parts, in exactly the order given, into the object
    /// at `key`, then drop the session.
    ///
    /// Every referenced part must exist before the destination is touched.
    /// Part ETags in `parts` are not compared with the staged data.
    pub async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletePart],
    ) -> StorageResult<ObjectInfo> {
        let bucket_root = self.existing_bucket(bucket).await?;
        ensure_key_safe(key)?;
        let upload_dir = self.upload_dir(bucket, upload_id)?;
        if !is_dir(&upload_dir).await {
            return Err(StorageError::UploadNotFound(upload_id.to_string()));
        }

        let mut part_paths = Vec::with_capacity(parts.len());
        for part in parts {
            let path = upload_dir.join(part_file_name(part.part_number));
            match fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => part_paths.push(path),
                _ => return Err(StorageError::InvalidPart(part.part_number)),
            }
        }

        let file_path = bucket_root.join(key);
        let parts_stream = futures::stream::iter(part_paths)
            .then(|path| File::open(path))
            .map_ok(ReaderStream::new)
            .try_flatten();
        let total = write_replacing(&file_path, parts_stream).await?;

        if let Err(err) = fs::remove_dir_all(&upload_dir).await {
            warn!("failed to remove upload directory {}: {}", upload_dir.display(), err);
        }
        prune_empty_dirs(&bucket_root.join(UPLOADS_DIR), &bucket_root).await;
        store_metadata(&file_path, &UserMetadata::new()).await;

        let modified = fs::metadata(&file_path).await?.modified()?;
        debug!(
            "completed upload {} into {}/{} ({} parts, {} bytes)",
            upload_id,
            bucket,
            key,
            parts.len(),
            total
        );
        Ok(ObjectInfo::new(key, total, modified, UserMetadata::new()))
    }

    /// Delete the session and everything staged in it. Succeeds when there
    /// is nothing to delete.
    pub async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> StorageResult<()> {
        let upload_dir = match self.upload_dir(bucket, upload_id) {
            Ok(dir) => dir,
            Err(_) => return Ok(()),
        };
        match fs::remove_dir_all(&upload_dir).await {
            Ok(()) => debug!("aborted upload {} for {}/{}", upload_id, bucket, key),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(StorageError::Io(err)),
        }

        let bucket_root = self.bucket_root(bucket);
        prune_empty_dirs(&bucket_root.join(UPLOADS_DIR), &bucket_root).await;
        Ok(())
    }

    // ----------------------------------------------------------------------
    // Paths
    // ----------------------------------------------------------------------

    /// Physical directory for a bucket. Does not check for existence.
    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    /// Resolve an existing bucket directory. Invalid names are reported as
    /// not found since no such directory can exist.
    async fn existing_bucket(&self, bucket: &str) -> StorageResult<PathBuf> {
        if ensure_bucket_name_safe(bucket).is_err() {
            return Err(StorageError::BucketNotFound(bucket.to_string()));
        }
        let root = self.bucket_root(bucket);
        if is_dir(&root).await {
            Ok(root)
        } else {
            Err(StorageError::BucketNotFound(bucket.to_string()))
        }
    }

    /// Staging directory of an upload session. Upload IDs are decimal
    /// numbers; anything else cannot name a session.
    fn upload_dir(&self, bucket: &str, upload_id: &str) -> StorageResult<PathBuf> {
        if ensure_bucket_name_safe(bucket).is_err() {
            return Err(StorageError::BucketNotFound(bucket.to_string()));
        }
        if upload_id.is_empty() || !upload_id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(StorageError::UploadNotFound(upload_id.to_string()));
        }
        Ok(self.bucket_root(bucket).join(UPLOADS_DIR).join(upload_id))
    }
}

/// Reject keys that would escape the bucket, collide with store-internal
/// files, or map two keys onto one path.
fn ensure_key_safe(key: &str) -> StorageResult<()> {
    let invalid = || Err(StorageError::InvalidObjectKey(key.to_string()));

    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN || key.starts_with('/') {
        return invalid();
    }
    if key.bytes().any(|b| b.is_ascii_control() || b == b'\\') {
        return invalid();
    }
    if key.ends_with(SIDECAR_SUFFIX) {
        return invalid();
    }
    for (idx, segment) in key.split('/').enumerate() {
        if segment.is_empty() || segment == "." || segment == ".." {
            return invalid();
        }
        if idx == 0 && segment == UPLOADS_DIR {
            return invalid();
        }
        if segment.starts_with(TMP_PREFIX) {
            return invalid();
        }
    }
    Ok(())
}

/// Validate bucket name format.
///
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - starts and ends with a letter or digit
/// - no consecutive dots or dot-hyphen pairs
/// - not shaped like an IPv4 address
fn ensure_bucket_name_safe(name: &str) -> StorageResult<()> {
    let invalid = |reason: &str| {
        Err(StorageError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };

    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return invalid("must be between 3 and 63 characters");
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return invalid("allowed characters are lowercase letters, digits, dots, and hyphens");
    }
    if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
        return invalid("must start and end with a lowercase letter or digit");
    }
    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return invalid("cannot contain consecutive dots or dot-hyphen combinations");
    }
    if is_ipv4_like(name) {
        return invalid("must not be formatted like an IP address");
    }
    Ok(())
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts
            .iter()
            .all(|segment| !segment.is_empty() && segment.len() <= 3 && segment.parse::<u8>().is_ok())
}

/// Time-ordered upload ID: nanoseconds since the epoch, bumped past the last
/// ID issued by this process.
fn next_upload_id() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let mut prev = LAST_UPLOAD_ID.load(Ordering::Relaxed);
    loop {
        let candidate = now.max(prev + 1);
        match LAST_UPLOAD_ID.compare_exchange_weak(prev, candidate, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return candidate.to_string(),
            Err(actual) => prev = actual,
        }
    }
}

/// Compute the common prefix a key rolls up into, if any: the requested
/// prefix plus the remainder up to and including the first delimiter.
fn compute_common_prefix(key: &str, prefix: &str, delimiter: &str) -> Option<String> {
    let after_prefix = key.strip_prefix(prefix)?;
    let pos = after_prefix.find(delimiter)?;
    Some(format!("{}{}", prefix, &after_prefix[..pos + delimiter.len()]))
}

/// Collect `(key, path)` for every regular object file in a bucket.
async fn walk_bucket(bucket_root: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    let mut pending = vec![(bucket_root.to_path_buf(), String::new())];

    while let Some((dir, rel)) = pending.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if dir != bucket_root => {
                debug!("skipping {} during listing: {}", dir.display(), err);
                continue;
            }
            Err(err) => return Err(err),
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    debug!("stopped reading {}: {}", dir.display(), err);
                    break;
                }
            };
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };

            if file_type.is_dir() {
                if rel.is_empty() && name == UPLOADS_DIR {
                    continue;
                }
                pending.push((entry.path(), format!("{}{}/", rel, name)));
            } else if file_type.is_file() {
                if name.ends_with(SIDECAR_SUFFIX) || name.starts_with(TMP_PREFIX) {
                    continue;
                }
                files.push((format!("{}{}", rel, name), entry.path()));
            }
        }
    }

    Ok(files)
}

/// Write a stream into `dest` by way of a temporary file in the same
/// directory, creating parent directories as needed. Returns bytes written.
async fn write_replacing<S>(dest: &Path, stream: S) -> StorageResult<u64>
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    let parent = dest.parent().map(Path::to_path_buf).ok_or_else(|| {
        StorageError::Io(io::Error::new(
            ErrorKind::Other,
            "object path missing parent directory",
        ))
    })?;
    fs::create_dir_all(&parent).await?;

    let tmp_path = parent.join(format!("{}{}", TMP_PREFIX, Uuid::new_v4()));
    let mut file = File::create(&tmp_path).await?;

    let written = match copy_stream(&mut file, stream).await {
        Ok(written) => written,
        Err(err) => {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
    };
    if let Err(err) = file.sync_all().await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(StorageError::Io(err));
    }
    drop(file);

    if let Err(err) = fs::rename(&tmp_path, dest).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(StorageError::Io(err));
    }
    Ok(written)
}

/// Drain a byte stream into `file`, returning the number of bytes written.
async fn copy_stream<S>(file: &mut File, stream: S) -> io::Result<u64>
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    let mut written: u64 = 0;
    pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

/// Write the sidecar for a non-empty metadata map, or remove a stale one.
/// Failures are logged, never returned: the object itself is already stored.
async fn store_metadata(object_path: &Path, metadata: &UserMetadata) {
    let path = sidecar_path(object_path);
    if metadata.is_empty() {
        match fs::remove_file(&path).await {
            Ok(()) => debug!("removed stale metadata {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!("failed to remove metadata {}: {}", path.display(), err),
        }
        return;
    }
    if let Err(err) = fs::write(&path, encode_sidecar(metadata)).await {
        warn!("failed to write metadata {}: {}", path.display(), err);
    }
}

/// Read an object's sidecar; a missing or unreadable sidecar means no metadata.
async fn load_metadata(object_path: &Path) -> UserMetadata {
    match fs::read_to_string(sidecar_path(object_path)).await {
        Ok(contents) => decode_sidecar(&contents),
        Err(_) => UserMetadata::new(),
    }
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}

fn object_not_found(bucket: &str, key: &str) -> StorageError {
    StorageError::ObjectNotFound {
        bucket: bucket.to_string(),
        key: key.to_string(),
    }
}

fn not_found_as_object(err: io::Error, bucket: &str, key: &str) -> StorageError {
    // A key whose leading segment names an existing file fails with
    // NotADirectory rather than NotFound.
    if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) {
        object_not_found(bucket, key)
    } else {
        StorageError::Io(err)
    }
}

/// Recursively remove empty directories from `start` up to, but not
/// including, `stop`.
///
/// Stops at the first directory that is not empty, is already gone, or
/// cannot be removed.
async fn prune_empty_dirs(start: &Path, stop: &Path) {
    let mut current = start.to_path_buf();
    while current.starts_with(stop) && current != stop {
        match fs::remove_dir(&current).await {
            Ok(_) => match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => break,
            },
            Err(err) if err.kind() == ErrorKind::NotFound => break,
            Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
            Err(err) => {
                debug!("failed to prune directory {}: {}", current.display(), err);
                break;
            }
        }
    }
}
