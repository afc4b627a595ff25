//! Vendor-facing storage clients.
//!
//! A [`BackendClient`] performs the actual calls against one storage vendor.
//! Its vocabulary is deliberately the vendor's: plain bucket/key/upload-id
//! inputs and vendor-shaped outputs. Mapping to and from gateway concepts
//! happens one layer up in the object store adapter.

pub mod local;
pub mod memory;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream::BoxStream};
use std::io;
use thiserror::Error;

pub use local::LocalFsClient;
pub use memory::MemoryClient;

/// Body type used for every upload and download.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Storage class requested from the vendor. Only standard storage is offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageClass {
    #[default]
    Standard,
}

impl StorageClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageClass::Standard => "STANDARD",
        }
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("key `{0}` does not exist")]
    NoSuchKey(String),
    #[error("upload `{0}` does not exist")]
    NoSuchUpload(String),
    #[error("invalid part {part_number}: {reason}")]
    InvalidPart { part_number: u32, reason: String },
    #[error("parts must be listed in ascending order (part {0} out of order)")]
    InvalidPartOrder(u32),
    #[error("range {start}-{end} not satisfiable for object of {size} bytes")]
    InvalidRange { start: u64, end: u64, size: u64 },
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("declared part size {declared} but received {received} bytes")]
    SizeMismatch { declared: u64, received: u64 },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type BackendResult<T> = Result<T, BackendError>;

pub struct PutObjectInput {
    pub bucket: String,
    pub key: String,
    pub body: ByteStream,
    pub storage_class: StorageClass,
}

#[derive(Debug, Clone)]
pub struct PutObjectOutput {
    pub etag: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct GetObjectInput {
    pub bucket: String,
    pub key: String,
    /// Inclusive byte range. `None` fetches the whole object.
    pub range: Option<(u64, u64)>,
}

pub struct GetObjectOutput {
    pub body: ByteStream,
    pub content_length: u64,
}

#[derive(Debug, Clone)]
pub struct DeleteObjectInput {
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Clone)]
pub struct InitiateMultipartUploadInput {
    pub bucket: String,
    pub key: String,
    pub storage_class: StorageClass,
}

#[derive(Debug, Clone)]
pub struct InitiateMultipartUploadOutput {
    pub upload_id: String,
}

pub struct UploadPartInput {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub part_number: u32,
    pub part_size: u64,
    pub body: ByteStream,
}

#[derive(Debug, Clone)]
pub struct UploadPartOutput {
    pub part_number: u32,
    pub etag: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorPart {
    pub part_number: u32,
    pub etag: String,
}

#[derive(Debug, Clone)]
pub struct CompleteMultipartUploadInput {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub parts: Vec<VendorPart>,
}

#[derive(Debug, Clone)]
pub struct CompleteMultipartUploadOutput {
    pub location: String,
    pub etag: String,
}

#[derive(Debug, Clone)]
pub struct AbortMultipartUploadInput {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
}

#[derive(Debug, Clone)]
pub struct ListPartsInput {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub max_parts: u32,
}

#[derive(Debug, Clone)]
pub struct PartSummary {
    pub part_number: u32,
    pub etag: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ListPartsOutput {
    pub upload_id: String,
    pub max_parts: u32,
    pub is_truncated: bool,
    pub parts: Vec<PartSummary>,
}

/// Authenticated access to one vendor's object storage API.
///
/// Implementations are owned outside the adapter and injected as
/// `Arc<dyn BackendClient>`. Every call is a single attempt; retries and
/// timeouts belong to the transport underneath.
#[async_trait]
pub trait BackendClient: Send + Sync + 'static {
    /// Short vendor label used in logs.
    fn vendor(&self) -> &'static str;

    async fn put_object(&self, input: PutObjectInput) -> BackendResult<PutObjectOutput>;

    async fn get_object(&self, input: GetObjectInput) -> BackendResult<GetObjectOutput>;

    /// Deleting a key that does not exist succeeds.
    async fn delete_object(&self, input: DeleteObjectInput) -> BackendResult<()>;

    async fn initiate_multipart_upload(
        &self,
        input: InitiateMultipartUploadInput,
    ) -> BackendResult<InitiateMultipartUploadOutput>;

    async fn upload_part(&self, input: UploadPartInput) -> BackendResult<UploadPartOutput>;

    /// Assemble the listed parts into the final object. Either every part
    /// lands in the object or the call fails and no object is written.
    async fn complete_multipart_upload(
        &self,
        input: CompleteMultipartUploadInput,
    ) -> BackendResult<CompleteMultipartUploadOutput>;

    async fn abort_multipart_upload(&self, input: AbortMultipartUploadInput)
    -> BackendResult<()>;

    async fn list_parts(&self, input: ListPartsInput) -> BackendResult<ListPartsOutput>;

    /// Cheap round trip proving the vendor is usable. Vendors without
    /// anything to check report healthy.
    async fn health_check(&self) -> BackendResult<()> {
        Ok(())
    }
}

/// Wrap an in-memory buffer as a single-chunk [`ByteStream`].
pub fn stream_from_bytes(data: impl Into<Bytes>) -> ByteStream {
    let data = data.into();
    futures::stream::once(async move { Ok(data) }).boxed()
}

/// Drain a [`ByteStream`] into one contiguous buffer.
pub async fn collect_stream(mut stream: ByteStream) -> io::Result<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

/// Hex MD5 of `data`, the ETag format used for single objects and parts.
pub(crate) fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Multipart ETag: MD5 over the concatenated binary part digests, suffixed
/// with the part count.
pub(crate) fn multipart_etag(part_etags: &[String]) -> BackendResult<String> {
    let mut digest = md5::Context::new();
    for (idx, etag) in part_etags.iter().enumerate() {
        let raw = decode_hex(etag).ok_or_else(|| BackendError::InvalidPart {
            part_number: idx as u32 + 1,
            reason: format!("etag `{}` is not a hex digest", etag),
        })?;
        digest.consume(&raw);
    }
    Ok(format!("{:x}-{}", digest.compute(), part_etags.len()))
}

/// Check that completion parts are strictly ascending by part number.
pub(crate) fn ensure_ascending(parts: &[VendorPart]) -> BackendResult<()> {
    for pair in parts.windows(2) {
        if pair[1].part_number <= pair[0].part_number {
            return Err(BackendError::InvalidPartOrder(pair[1].part_number));
        }
    }
    Ok(())
}

/// Strip surrounding quotes that clients commonly send back around ETags.
pub(crate) fn normalize_etag(etag: &str) -> &str {
    etag.trim().trim_matches('"')
}

fn decode_hex(value: &str) -> Option<Vec<u8>> {
    if value.len() % 2 != 0 {
        return None;
    }
    (0..value.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(value.get(i..i + 2)?, 16).ok())
        .collect()
}
