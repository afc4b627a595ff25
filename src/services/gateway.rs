//! src/services/gateway.rs
//!
//! Gateway: request-side orchestration shared by the HTTP handlers. It
//! resolves an object to the backend holding it, drives the adapter and
//! keeps the catalog in step with what the backend acknowledged.

use super::{
    adapter::{ObjectBody, ObjectStoreAdapter, StoreError},
    catalog::{Catalog, CatalogError, ObjectWrite},
    registry::BackendRegistry,
};
use crate::{
    backends::ByteStream,
    models::{
        bucket::Bucket,
        multipart::{
            CompletedPart, CompletedUpload, MultipartSession, PartListing, PartResult,
        },
        object::{ByteRange, Object, ObjectIdentity},
    },
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Clone)]
pub struct Gateway {
    pub catalog: Catalog,
    pub backends: Arc<BackendRegistry>,
    /// Backend used for buckets created without an explicit one.
    pub default_backend: String,
}

impl Gateway {
    pub fn new(catalog: Catalog, backends: BackendRegistry, default_backend: String) -> Self {
        Self {
            catalog,
            backends: Arc::new(backends),
            default_backend,
        }
    }

    pub async fn create_bucket(
        &self,
        name: &str,
        backend: Option<String>,
    ) -> GatewayResult<Bucket> {
        let backend = backend.unwrap_or_else(|| self.default_backend.clone());
        if !self.backends.contains(&backend) {
            return Err(StoreError::NoSuchBackend(backend).into());
        }
        Ok(self.catalog.create_bucket(name, &backend).await?)
    }

    pub async fn delete_bucket(&self, name: &str) -> GatewayResult<()> {
        Ok(self.catalog.delete_bucket(name).await?)
    }

    /// Adapter for new writes into `bucket`.
    async fn bucket_backend(&self, bucket: &str) -> GatewayResult<ObjectStoreAdapter> {
        let bucket = self.catalog.fetch_bucket(bucket).await?;
        Ok(self.backends.get(&bucket.backend)?)
    }

    /// Resolve an existing object to its catalog record and the backend
    /// holding it: the backend recorded with the object, else the bucket's.
    pub async fn resolve_object(
        &self,
        object: &ObjectIdentity,
    ) -> GatewayResult<(Object, ObjectStoreAdapter)> {
        let record = match self.catalog.fetch_object(object).await {
            Ok(record) => record,
            Err(CatalogError::ObjectNotFound(_)) => {
                warn!("No such object {}", object);
                return Err(StoreError::NoSuchObject(object.clone()).into());
            }
            Err(err) => return Err(err.into()),
        };

        let adapter = if record.backend.is_empty() {
            self.bucket_backend(&object.bucket).await?
        } else {
            self.backends.get(&record.backend)?
        };
        Ok((record, adapter))
    }

    pub async fn put_object(
        &self,
        object: &ObjectIdentity,
        content_type: Option<String>,
        body: ByteStream,
    ) -> GatewayResult<Object> {
        let adapter = self.bucket_backend(&object.bucket).await?;
        let put = adapter.put(body, object).await?;
        let record = self
            .catalog
            .upsert_object(
                object,
                ObjectWrite {
                    backend: adapter.name().to_string(),
                    content_type,
                    size_bytes: put.size_bytes,
                    etag: put.etag,
                    last_modified: put.last_modified,
                },
            )
            .await?;
        Ok(record)
    }

    pub async fn get_object(
        &self,
        object: &ObjectIdentity,
        range: ByteRange,
    ) -> GatewayResult<(Object, ObjectBody)> {
        let (record, adapter) = self.resolve_object(object).await?;
        let body = adapter.get(object, range).await?;
        Ok((record, body))
    }

    pub async fn head_object(&self, object: &ObjectIdentity) -> GatewayResult<Object> {
        let (record, _) = self.resolve_object(object).await?;
        Ok(record)
    }

    /// Remove the payload from its backend, then forget the record.
    pub async fn delete_object(&self, object: &ObjectIdentity) -> GatewayResult<()> {
        let (_, adapter) = self.resolve_object(object).await?;
        adapter.delete(object).await?;
        self.catalog.delete_object(object).await?;
        Ok(())
    }

    pub async fn initiate_upload(&self, object: &ObjectIdentity) -> GatewayResult<MultipartSession> {
        let adapter = self.bucket_backend(&object.bucket).await?;
        let session = adapter.initiate_multipart_upload(object).await?;
        self.catalog
            .insert_upload(session.upload_id(), object, adapter.name())
            .await?;
        Ok(session)
    }

    /// Load a tracked session together with the backend that issued it.
    /// Unknown upload ids are a session-state error, not a lookup miss.
    async fn open_session(
        &self,
        object: &ObjectIdentity,
        upload_id: &str,
    ) -> GatewayResult<(MultipartSession, ObjectStoreAdapter)> {
        let upload = match self.catalog.fetch_upload(upload_id, object).await {
            Ok(upload) => upload,
            Err(CatalogError::UploadNotFound(_)) => {
                return Err(StoreError::InvalidSessionState {
                    upload_id: upload_id.to_string(),
                    state: "unknown".into(),
                    reason: format!("no multipart upload was initiated for {}", object),
                }
                .into());
            }
            Err(err) => return Err(err.into()),
        };
        let adapter = self.backends.get(&upload.backend)?;
        Ok((upload.session(), adapter))
    }

    pub async fn upload_part(
        &self,
        object: &ObjectIdentity,
        upload_id: &str,
        part_number: u32,
        body: ByteStream,
        size_bytes: u64,
    ) -> GatewayResult<PartResult> {
        let (session, adapter) = self.open_session(object, upload_id).await?;
        let part = adapter
            .upload_part(&session, part_number, body, size_bytes)
            .await?;
        self.catalog
            .record_part(upload_id, part.part_number, part.size_bytes, &part.etag)
            .await?;
        Ok(part)
    }

    pub async fn complete_upload(
        &self,
        object: &ObjectIdentity,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> GatewayResult<CompletedUpload> {
        let (mut session, adapter) = self.open_session(object, upload_id).await?;
        let completed = adapter
            .complete_multipart_upload(&mut session, parts)
            .await?;
        self.catalog
            .set_upload_state(upload_id, session.state())
            .await?;

        let part_numbers: Vec<u32> = parts.iter().map(|p| p.part_number).collect();
        let size_bytes = self.catalog.parts_size(upload_id, &part_numbers).await?;
        self.catalog
            .upsert_object(
                object,
                ObjectWrite {
                    backend: adapter.name().to_string(),
                    content_type: None,
                    size_bytes,
                    etag: completed.etag.clone(),
                    last_modified: chrono::Utc::now(),
                },
            )
            .await?;
        info!(
            "Completed multipart upload {} into {} ({} bytes)",
            upload_id, object, size_bytes
        );
        Ok(completed)
    }

    pub async fn abort_upload(&self, object: &ObjectIdentity, upload_id: &str) -> GatewayResult<()> {
        let (mut session, adapter) = self.open_session(object, upload_id).await?;
        adapter.abort_multipart_upload(&mut session).await?;
        self.catalog
            .set_upload_state(upload_id, session.state())
            .await?;
        Ok(())
    }

    pub async fn list_parts(
        &self,
        object: &ObjectIdentity,
        upload_id: &str,
        max_parts: u32,
    ) -> GatewayResult<PartListing> {
        let (session, adapter) = self.open_session(object, upload_id).await?;
        Ok(adapter.list_parts(&session, max_parts).await?)
    }
}
