//! MemoryClient: an in-process vendor with the same contract as the disk
//! vendor. Nothing survives a restart.

use super::{
    AbortMultipartUploadInput, BackendClient, BackendError, BackendResult,
    CompleteMultipartUploadInput, CompleteMultipartUploadOutput, DeleteObjectInput,
    GetObjectInput, GetObjectOutput, InitiateMultipartUploadInput,
    InitiateMultipartUploadOutput, ListPartsInput, ListPartsOutput, PartSummary, PutObjectInput,
    PutObjectOutput, UploadPartInput, UploadPartOutput, collect_stream, ensure_ascending,
    md5_hex, multipart_etag, normalize_etag, stream_from_bytes,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, MutexGuard},
};
use uuid::Uuid;

struct StoredPart {
    data: Bytes,
    etag: String,
    uploaded_at: DateTime<Utc>,
}

struct PendingUpload {
    bucket: String,
    key: String,
    parts: BTreeMap<u32, StoredPart>,
}

#[derive(Default)]
struct State {
    /// Keyed by (vendor bucket, key).
    objects: HashMap<(String, String), Bytes>,
    uploads: HashMap<String, PendingUpload>,
}

#[derive(Default)]
pub struct MemoryClient {
    state: Mutex<State>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // a poisoned map is still structurally valid
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl State {
    fn upload_mut(
        &mut self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> BackendResult<&mut PendingUpload> {
        match self.uploads.get_mut(upload_id) {
            Some(upload) if upload.bucket == bucket && upload.key == key => Ok(upload),
            _ => Err(BackendError::NoSuchUpload(upload_id.to_string())),
        }
    }
}

#[async_trait]
impl BackendClient for MemoryClient {
    fn vendor(&self) -> &'static str {
        "memory"
    }

    async fn put_object(&self, input: PutObjectInput) -> BackendResult<PutObjectOutput> {
        let data = collect_stream(input.body).await?;
        let etag = md5_hex(&data);
        let size = data.len() as u64;
        self.lock().objects.insert((input.bucket, input.key), data);
        Ok(PutObjectOutput { etag, size })
    }

    async fn get_object(&self, input: GetObjectInput) -> BackendResult<GetObjectOutput> {
        let data = self
            .lock()
            .objects
            .get(&(input.bucket.clone(), input.key.clone()))
            .cloned()
            .ok_or_else(|| BackendError::NoSuchKey(input.key.clone()))?;
        let size = data.len() as u64;

        let body = match input.range {
            None => data,
            Some((start, end)) => {
                if start > end || start >= size {
                    return Err(BackendError::InvalidRange { start, end, size });
                }
                let end = end.min(size - 1);
                data.slice(start as usize..=end as usize)
            }
        };

        Ok(GetObjectOutput {
            content_length: body.len() as u64,
            body: stream_from_bytes(body),
        })
    }

    async fn delete_object(&self, input: DeleteObjectInput) -> BackendResult<()> {
        self.lock().objects.remove(&(input.bucket, input.key));
        Ok(())
    }

    async fn initiate_multipart_upload(
        &self,
        input: InitiateMultipartUploadInput,
    ) -> BackendResult<InitiateMultipartUploadOutput> {
        let upload_id = Uuid::new_v4().simple().to_string();
        self.lock().uploads.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: input.bucket.clone(),
                key: input.key.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(InitiateMultipartUploadOutput { upload_id })
    }

    async fn upload_part(&self, input: UploadPartInput) -> BackendResult<UploadPartOutput> {
        // fail fast before draining the body
        self.lock()
            .upload_mut(&input.bucket, &input.key, &input.upload_id)?;

        let data = collect_stream(input.body).await?;
        if data.len() as u64 != input.part_size {
            return Err(BackendError::SizeMismatch {
                declared: input.part_size,
                received: data.len() as u64,
            });
        }
        let etag = md5_hex(&data);

        let mut state = self.lock();
        let upload = state.upload_mut(&input.bucket, &input.key, &input.upload_id)?;
        upload.parts.insert(
            input.part_number,
            StoredPart {
                data,
                etag: etag.clone(),
                uploaded_at: Utc::now(),
            },
        );
        Ok(UploadPartOutput {
            part_number: input.part_number,
            etag,
        })
    }

    async fn complete_multipart_upload(
        &self,
        input: CompleteMultipartUploadInput,
    ) -> BackendResult<CompleteMultipartUploadOutput> {
        let mut state = self.lock();
        let upload = state.upload_mut(&input.bucket, &input.key, &input.upload_id)?;
        ensure_ascending(&input.parts)?;

        let mut buf = BytesMut::new();
        let mut etags = Vec::with_capacity(input.parts.len());
        for part in &input.parts {
            let stored = upload
                .parts
                .get(&part.part_number)
                .ok_or_else(|| BackendError::InvalidPart {
                    part_number: part.part_number,
                    reason: "part was never uploaded".into(),
                })?;
            if stored.etag != normalize_etag(&part.etag) {
                return Err(BackendError::InvalidPart {
                    part_number: part.part_number,
                    reason: "etag does not match the uploaded part".into(),
                });
            }
            buf.extend_from_slice(&stored.data);
            etags.push(stored.etag.clone());
        }
        let etag = multipart_etag(&etags)?;

        state.uploads.remove(&input.upload_id);
        state
            .objects
            .insert((input.bucket.clone(), input.key.clone()), buf.freeze());

        Ok(CompleteMultipartUploadOutput {
            location: format!("/{}/{}", input.bucket, input.key),
            etag,
        })
    }

    async fn abort_multipart_upload(
        &self,
        input: AbortMultipartUploadInput,
    ) -> BackendResult<()> {
        let mut state = self.lock();
        state.upload_mut(&input.bucket, &input.key, &input.upload_id)?;
        state.uploads.remove(&input.upload_id);
        Ok(())
    }

    async fn list_parts(&self, input: ListPartsInput) -> BackendResult<ListPartsOutput> {
        let mut state = self.lock();
        let upload = state.upload_mut(&input.bucket, &input.key, &input.upload_id)?;
        let max_parts = input.max_parts as usize;
        let parts = upload
            .parts
            .iter()
            .take(max_parts)
            .map(|(number, part)| PartSummary {
                part_number: *number,
                etag: part.etag.clone(),
                size: part.data.len() as u64,
                last_modified: part.uploaded_at,
            })
            .collect();

        Ok(ListPartsOutput {
            is_truncated: upload.parts.len() > max_parts,
            upload_id: input.upload_id,
            max_parts: input.max_parts,
            parts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{StorageClass, VendorPart};

    #[tokio::test]
    async fn complete_is_all_or_nothing() {
        let client = MemoryClient::new();
        let init = client
            .initiate_multipart_upload(InitiateMultipartUploadInput {
                bucket: "vendor".into(),
                key: "k".into(),
                storage_class: StorageClass::Standard,
            })
            .await
            .unwrap();
        let part = client
            .upload_part(UploadPartInput {
                bucket: "vendor".into(),
                key: "k".into(),
                upload_id: init.upload_id.clone(),
                part_number: 1,
                part_size: 4,
                body: stream_from_bytes(&b"AAAA"[..]),
            })
            .await
            .unwrap();

        let err = client
            .complete_multipart_upload(CompleteMultipartUploadInput {
                bucket: "vendor".into(),
                key: "k".into(),
                upload_id: init.upload_id.clone(),
                parts: vec![
                    VendorPart {
                        part_number: 1,
                        etag: part.etag.clone(),
                    },
                    VendorPart {
                        part_number: 2,
                        etag: "ffff".into(),
                    },
                ],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidPart { part_number: 2, .. }));

        let missing = client
            .get_object(GetObjectInput {
                bucket: "vendor".into(),
                key: "k".into(),
                range: None,
            })
            .await;
        assert!(matches!(missing, Err(BackendError::NoSuchKey(_))));

        // the upload is still open after a failed completion
        let listing = client
            .list_parts(ListPartsInput {
                bucket: "vendor".into(),
                key: "k".into(),
                upload_id: init.upload_id,
                max_parts: 1000,
            })
            .await
            .unwrap();
        assert_eq!(listing.parts.len(), 1);
        assert!(!listing.is_truncated);
    }

    #[tokio::test]
    async fn upload_id_is_bound_to_its_key() {
        let client = MemoryClient::new();
        let init = client
            .initiate_multipart_upload(InitiateMultipartUploadInput {
                bucket: "vendor".into(),
                key: "k".into(),
                storage_class: StorageClass::Standard,
            })
            .await
            .unwrap();
        let err = client
            .abort_multipart_upload(AbortMultipartUploadInput {
                bucket: "vendor".into(),
                key: "other".into(),
                upload_id: init.upload_id,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::NoSuchUpload(_)));
    }
}
