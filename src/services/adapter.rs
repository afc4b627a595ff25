//! src/services/adapter.rs
//!
//! ObjectStoreAdapter: translates gateway object operations into calls on a
//! vendor [`BackendClient`] and maps the answers back. The adapter is an
//! immutable capability: it owns a backend description and a client handle,
//! nothing else. Multipart sessions are carried by the caller.

use crate::{
    backends::{
        AbortMultipartUploadInput, BackendClient, BackendError, ByteStream,
        CompleteMultipartUploadInput, DeleteObjectInput, GetObjectInput,
        InitiateMultipartUploadInput, ListPartsInput, PutObjectInput, StorageClass,
        UploadPartInput, VendorPart,
    },
    models::{
        multipart::{
            CompletedPart, CompletedUpload, MAX_PART_NUMBER, MultipartSession, PartInfo,
            PartListing, PartResult, SessionState,
        },
        object::{ByteRange, ObjectIdentity},
    },
};
use chrono::{DateTime, Utc};
use std::{fmt, sync::Arc};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("initiating multipart upload for `{object}` failed: {source}")]
    InitiateFailed {
        object: ObjectIdentity,
        #[source]
        source: BackendError,
    },
    #[error("uploading part {part_number} of upload `{upload_id}` failed: {source}")]
    PartUploadFailed {
        upload_id: String,
        part_number: u32,
        #[source]
        source: BackendError,
    },
    #[error("completing upload `{upload_id}` failed: {reason}")]
    CompleteFailed { upload_id: String, reason: String },
    #[error("aborting upload `{upload_id}` failed: {source}")]
    AbortFailed {
        upload_id: String,
        #[source]
        source: BackendError,
    },
    #[error("listing parts of upload `{upload_id}` failed: {source}")]
    ListPartsFailed {
        upload_id: String,
        #[source]
        source: BackendError,
    },
    #[error("upload of `{object}` failed: {source}")]
    UploadFailed {
        object: ObjectIdentity,
        #[source]
        source: BackendError,
    },
    #[error("download of `{object}` failed: {reason}")]
    DownloadFailed {
        object: ObjectIdentity,
        reason: String,
    },
    #[error("delete of `{object}` failed: {source}")]
    DeleteFailed {
        object: ObjectIdentity,
        #[source]
        source: BackendError,
    },
    #[error("upload `{upload_id}` is {state}: {reason}")]
    InvalidSessionState {
        upload_id: String,
        state: String,
        reason: String,
    },
    #[error("object `{0}` not found")]
    NoSuchObject(ObjectIdentity),
    #[error("backend `{0}` is not configured")]
    NoSuchBackend(String),
    #[error("backend `{backend}` is unavailable: {source}")]
    BackendUnavailable {
        backend: String,
        #[source]
        source: BackendError,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Static description of one configured backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDetail {
    /// Gateway-side backend name.
    pub name: String,
    /// Vendor bucket every gateway object is written into.
    pub bucket: String,
}

/// Outcome of a single-shot put. `last_modified` is stamped on success.
#[derive(Debug, Clone)]
pub struct PutResult {
    pub etag: String,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
}

/// Body of a download and its length as reported by the backend.
pub struct ObjectBody {
    pub stream: ByteStream,
    pub content_length: u64,
}

impl fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectBody")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct ObjectStoreAdapter {
    detail: BackendDetail,
    client: Arc<dyn BackendClient>,
}

impl fmt::Debug for ObjectStoreAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreAdapter")
            .field("detail", &self.detail)
            .field("vendor", &self.client.vendor())
            .finish()
    }
}

impl ObjectStoreAdapter {
    pub fn new(detail: BackendDetail, client: Arc<dyn BackendClient>) -> Self {
        Self { detail, client }
    }

    pub fn name(&self) -> &str {
        &self.detail.name
    }

    /// Ask the vendor for a cheap liveness round trip.
    pub async fn health_check(&self) -> StoreResult<()> {
        self.client.health_check().await.map_err(|err| {
            error!(backend = %self.detail.name, "health check failed: {}", err);
            StoreError::BackendUnavailable {
                backend: self.detail.name.clone(),
                source: err,
            }
        })
    }

    /// Sessions stop accepting calls once completed or aborted.
    fn ensure_open(session: &MultipartSession, action: &str) -> StoreResult<()> {
        if session.upload_id().is_empty() {
            return Err(StoreError::InvalidSessionState {
                upload_id: String::new(),
                state: session.state().to_string(),
                reason: format!("cannot {} without an upload id", action),
            });
        }
        if session.state().is_terminal() {
            return Err(StoreError::InvalidSessionState {
                upload_id: session.upload_id().to_string(),
                state: session.state().to_string(),
                reason: format!("cannot {} a finished upload", action),
            });
        }
        Ok(())
    }

    /// The vendor no longer (or never did) know this upload id.
    fn unknown_upload(session: &MultipartSession) -> StoreError {
        StoreError::InvalidSessionState {
            upload_id: session.upload_id().to_string(),
            state: session.state().to_string(),
            reason: "backend does not know this upload".into(),
        }
    }

    /// Stream `body` to the backend under `"<bucket>/<key>"`.
    pub async fn put(&self, body: ByteStream, object: &ObjectIdentity) -> StoreResult<PutResult> {
        let input = PutObjectInput {
            bucket: self.detail.bucket.clone(),
            key: object.storage_key(),
            body,
            storage_class: StorageClass::Standard,
        };

        match self.client.put_object(input).await {
            Ok(out) => {
                let last_modified = Utc::now();
                info!(
                    backend = %self.detail.name,
                    object = %object,
                    etag = %out.etag,
                    "uploaded {} bytes, last modified {}",
                    out.size,
                    last_modified
                );
                Ok(PutResult {
                    etag: out.etag,
                    size_bytes: out.size,
                    last_modified,
                })
            }
            Err(err) => {
                error!(backend = %self.detail.name, object = %object, "upload failed: {}", err);
                Err(StoreError::UploadFailed {
                    object: object.clone(),
                    source: err,
                })
            }
        }
    }

    /// Download an object. [`ByteRange::FULL`] fetches everything, any
    /// other range is inclusive on both ends.
    pub async fn get(&self, object: &ObjectIdentity, range: ByteRange) -> StoreResult<ObjectBody> {
        let range = if range.is_full() {
            None
        } else if range.len().is_none() {
            return Err(StoreError::DownloadFailed {
                object: object.clone(),
                reason: format!("range start {} is after end {}", range.start, range.end),
            });
        } else {
            Some((range.start, range.end))
        };

        let input = GetObjectInput {
            bucket: self.detail.bucket.clone(),
            key: object.storage_key(),
            range,
        };
        match self.client.get_object(input).await {
            Ok(out) => {
                info!(
                    backend = %self.detail.name,
                    object = %object,
                    "download of {} bytes started",
                    out.content_length
                );
                Ok(ObjectBody {
                    stream: out.body,
                    content_length: out.content_length,
                })
            }
            Err(BackendError::NoSuchKey(_)) => {
                error!(backend = %self.detail.name, object = %object, "object missing on backend");
                Err(StoreError::NoSuchObject(object.clone()))
            }
            Err(err) => {
                error!(backend = %self.detail.name, object = %object, "download failed: {}", err);
                Err(StoreError::DownloadFailed {
                    object: object.clone(),
                    reason: err.to_string(),
                })
            }
        }
    }

    pub async fn delete(&self, object: &ObjectIdentity) -> StoreResult<()> {
        let input = DeleteObjectInput {
            bucket: self.detail.bucket.clone(),
            key: object.storage_key(),
        };
        self.client.delete_object(input).await.map_err(|err| {
            error!(backend = %self.detail.name, object = %object, "delete failed: {}", err);
            StoreError::DeleteFailed {
                object: object.clone(),
                source: err,
            }
        })?;
        info!(backend = %self.detail.name, object = %object, "deleted");
        Ok(())
    }

    pub async fn initiate_multipart_upload(
        &self,
        object: &ObjectIdentity,
    ) -> StoreResult<MultipartSession> {
        let input = InitiateMultipartUploadInput {
            bucket: self.detail.bucket.clone(),
            key: object.storage_key(),
            storage_class: StorageClass::Standard,
        };
        let out = self
            .client
            .initiate_multipart_upload(input)
            .await
            .map_err(|err| {
                error!(backend = %self.detail.name, object = %object, "initiate failed: {}", err);
                StoreError::InitiateFailed {
                    object: object.clone(),
                    source: err,
                }
            })?;

        info!(
            backend = %self.detail.name,
            object = %object,
            upload_id = %out.upload_id,
            "multipart upload initiated"
        );
        Ok(MultipartSession::initiated(out.upload_id, object.clone()))
    }

    /// Upload one part. The session is only read, so many parts of the same
    /// upload may be in flight at once.
    pub async fn upload_part(
        &self,
        session: &MultipartSession,
        part_number: u32,
        body: ByteStream,
        size_bytes: u64,
    ) -> StoreResult<PartResult> {
        Self::ensure_open(session, "upload a part to")?;
        if part_number == 0 || part_number > MAX_PART_NUMBER {
            return Err(StoreError::PartUploadFailed {
                upload_id: session.upload_id().to_string(),
                part_number,
                source: BackendError::InvalidPart {
                    part_number,
                    reason: format!("part number must be between 1 and {}", MAX_PART_NUMBER),
                },
            });
        }

        let input = UploadPartInput {
            bucket: self.detail.bucket.clone(),
            key: session.identity().storage_key(),
            upload_id: session.upload_id().to_string(),
            part_number,
            part_size: size_bytes,
            body,
        };
        let out = self.client.upload_part(input).await.map_err(|err| {
            error!(
                backend = %self.detail.name,
                upload_id = %session.upload_id(),
                part_number,
                "part upload failed: {}",
                err
            );
            match err {
                BackendError::NoSuchUpload(_) => Self::unknown_upload(session),
                other => StoreError::PartUploadFailed {
                    upload_id: session.upload_id().to_string(),
                    part_number,
                    source: other,
                },
            }
        })?;

        info!(
            backend = %self.detail.name,
            upload_id = %session.upload_id(),
            part_number = out.part_number,
            "part uploaded"
        );
        Ok(PartResult {
            part_number: out.part_number,
            etag: out.etag,
            size_bytes,
        })
    }

    /// Assemble the listed parts into the final object.
    ///
    /// `parts` must be non-empty and strictly ascending by part number; this
    /// is checked here before the backend is contacted. The session moves to
    /// `Completed` only when the backend reports success.
    pub async fn complete_multipart_upload(
        &self,
        session: &mut MultipartSession,
        parts: &[CompletedPart],
    ) -> StoreResult<CompletedUpload> {
        Self::ensure_open(session, "complete")?;
        let upload_id = session.upload_id().to_string();
        let reject = |reason: String| StoreError::CompleteFailed {
            upload_id: upload_id.clone(),
            reason,
        };

        if parts.is_empty() {
            return Err(reject("at least one part is required".into()));
        }
        if let Some(bad) = parts.iter().find(|p| p.part_number == 0) {
            return Err(reject(format!("invalid part number {}", bad.part_number)));
        }
        if let Some(pair) = parts
            .windows(2)
            .find(|pair| pair[1].part_number <= pair[0].part_number)
        {
            return Err(reject(format!(
                "parts must be in ascending order: {} follows {}",
                pair[1].part_number, pair[0].part_number
            )));
        }

        let input = CompleteMultipartUploadInput {
            bucket: self.detail.bucket.clone(),
            key: session.identity().storage_key(),
            upload_id: upload_id.clone(),
            parts: parts
                .iter()
                .map(|p| VendorPart {
                    part_number: p.part_number,
                    etag: p.etag.clone(),
                })
                .collect(),
        };
        let out = match self.client.complete_multipart_upload(input).await {
            Ok(out) => out,
            Err(err) => {
                error!(
                    backend = %self.detail.name,
                    upload_id = %upload_id,
                    "complete failed: {}",
                    err
                );
                return Err(match err {
                    BackendError::NoSuchUpload(_) => Self::unknown_upload(session),
                    other => reject(other.to_string()),
                });
            }
        };

        session.finish(SessionState::Completed);
        info!(
            backend = %self.detail.name,
            upload_id = %upload_id,
            etag = %out.etag,
            "multipart upload completed with {} parts",
            parts.len()
        );
        let object = session.identity();
        Ok(CompletedUpload {
            location: out.location,
            bucket: object.bucket.clone(),
            key: object.key.clone(),
            etag: out.etag,
        })
    }

    /// Release backend resources of an unfinished upload. A second abort
    /// fails like any other call on a finished session.
    pub async fn abort_multipart_upload(&self, session: &mut MultipartSession) -> StoreResult<()> {
        Self::ensure_open(session, "abort")?;
        let input = AbortMultipartUploadInput {
            bucket: self.detail.bucket.clone(),
            key: session.identity().storage_key(),
            upload_id: session.upload_id().to_string(),
        };
        self.client
            .abort_multipart_upload(input)
            .await
            .map_err(|err| {
                error!(
                    backend = %self.detail.name,
                    upload_id = %session.upload_id(),
                    "abort failed: {}",
                    err
                );
                StoreError::AbortFailed {
                    upload_id: session.upload_id().to_string(),
                    source: err,
                }
            })?;

        session.finish(SessionState::Aborted);
        info!(
            backend = %self.detail.name,
            upload_id = %session.upload_id(),
            "multipart upload aborted"
        );
        Ok(())
    }

    /// Parts acknowledged so far, at most `max_parts` of them.
    pub async fn list_parts(
        &self,
        session: &MultipartSession,
        max_parts: u32,
    ) -> StoreResult<PartListing> {
        Self::ensure_open(session, "list parts of")?;
        let input = ListPartsInput {
            bucket: self.detail.bucket.clone(),
            key: session.identity().storage_key(),
            upload_id: session.upload_id().to_string(),
            max_parts,
        };
        let out = self.client.list_parts(input).await.map_err(|err| {
            error!(
                backend = %self.detail.name,
                upload_id = %session.upload_id(),
                "list parts failed: {}",
                err
            );
            match err {
                BackendError::NoSuchUpload(_) => Self::unknown_upload(session),
                other => StoreError::ListPartsFailed {
                    upload_id: session.upload_id().to_string(),
                    source: other,
                },
            }
        })?;

        let object = session.identity();
        Ok(PartListing {
            bucket: object.bucket.clone(),
            key: object.key.clone(),
            upload_id: out.upload_id,
            max_parts: out.max_parts,
            is_truncated: out.is_truncated,
            parts: out
                .parts
                .into_iter()
                .map(|p| PartInfo {
                    part_number: p.part_number,
                    etag: p.etag,
                    size_bytes: p.size,
                    last_modified: p.last_modified,
                })
                .collect(),
        })
    }
}
