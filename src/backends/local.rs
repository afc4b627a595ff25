//! LocalFsClient: a disk-backed vendor.
//!
//! Objects are sharded beneath `root/{bucket}/{shard}/{shard}/{key}` where
//! the shards are the first two bytes of MD5(bucket/key). In-flight multipart
//! uploads keep their parts under `root/{bucket}/.multipart/{upload_id}/`.

use super::{
    AbortMultipartUploadInput, BackendClient, BackendError, BackendResult, ByteStream,
    CompleteMultipartUploadInput, CompleteMultipartUploadOutput, DeleteObjectInput,
    GetObjectInput, GetObjectOutput, InitiateMultipartUploadInput,
    InitiateMultipartUploadOutput, ListPartsInput, ListPartsOutput, PartSummary, PutObjectInput,
    PutObjectOutput, UploadPartInput, UploadPartOutput, VendorPart, ensure_ascending,
    multipart_etag, normalize_etag,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use md5::Context;
use serde::{Deserialize, Serialize};
use std::{
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const MULTIPART_DIR: &str = ".multipart";
const UPLOAD_DESCRIPTOR: &str = "upload.json";

/// Persisted alongside the parts of an in-flight upload.
#[derive(Debug, Serialize, Deserialize)]
struct UploadDescriptor {
    key: String,
}

#[derive(Debug, Clone)]
pub struct LocalFsClient {
    root: PathBuf,
}

impl LocalFsClient {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Rejects keys that could escape the bucket directory or that do not
    /// name a file: every `/`-separated segment must be non-empty and not
    /// `.`, so folder markers like `photos/` are refused.
    fn ensure_key_safe(key: &str) -> BackendResult<()> {
        let unsafe_key = key.is_empty()
            || key.len() > MAX_OBJECT_KEY_LEN
            || key.contains("..")
            || key.split('/').any(|segment| segment.is_empty() || segment == ".")
            || key
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
        if unsafe_key {
            return Err(BackendError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    /// Upload ids are generated here, but they come back from callers.
    fn ensure_upload_id_safe(upload_id: &str) -> BackendResult<()> {
        if upload_id.is_empty()
            || !upload_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(BackendError::NoSuchUpload(upload_id.to_string()));
        }
        Ok(())
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    fn object_shards(bucket: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket, key);
        let mut path = self.bucket_root(bucket);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    fn upload_dir(&self, bucket: &str, upload_id: &str) -> PathBuf {
        self.bucket_root(bucket).join(MULTIPART_DIR).join(upload_id)
    }

    fn part_path(upload_dir: &Path, part_number: u32) -> PathBuf {
        upload_dir.join(format!("part-{:05}", part_number))
    }

    /// Load the descriptor of an in-flight upload and check it targets `key`.
    async fn load_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> BackendResult<(PathBuf, UploadDescriptor)> {
        Self::ensure_upload_id_safe(upload_id)?;
        let dir = self.upload_dir(bucket, upload_id);
        let raw = match fs::read(dir.join(UPLOAD_DESCRIPTOR)).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(BackendError::NoSuchUpload(upload_id.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        let descriptor: UploadDescriptor = serde_json::from_slice(&raw)?;
        if descriptor.key != key {
            return Err(BackendError::NoSuchUpload(upload_id.to_string()));
        }
        Ok((dir, descriptor))
    }

    /// Hex MD5 of a part file already on disk.
    async fn file_md5(path: &Path) -> io::Result<String> {
        let mut file = File::open(path).await?;
        let mut digest = Context::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            digest.consume(&buf[..n]);
        }
        Ok(format!("{:x}", digest.compute()))
    }
}

/// Stream `body` into a fresh temp file inside `dir`, returning the temp
/// path, byte count and hex MD5. The temp file is removed on any error.
async fn write_temp(dir: &Path, body: ByteStream) -> io::Result<(PathBuf, u64, String)> {
    fs::create_dir_all(dir).await?;
    let tmp_path = dir.join(format!(".tmp-{}", Uuid::new_v4()));
    match stream_into(&tmp_path, body).await {
        Ok((size, etag)) => Ok((tmp_path, size, etag)),
        Err(err) => {
            let _ = fs::remove_file(&tmp_path).await;
            Err(err)
        }
    }
}

async fn stream_into(path: &Path, mut body: ByteStream) -> io::Result<(u64, String)> {
    let mut file = File::create(path).await?;
    let mut size: u64 = 0;
    let mut digest = Context::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        size += chunk.len() as u64;
        digest.consume(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok((size, format!("{:x}", digest.compute())))
}

/// Move a finished temp file over `dest`, replacing any previous content.
async fn commit(tmp_path: &Path, dest: &Path) -> io::Result<()> {
    if let Err(err) = fs::rename(tmp_path, dest).await {
        if err.kind() == ErrorKind::AlreadyExists {
            fs::remove_file(dest).await?;
            fs::rename(tmp_path, dest).await?;
        } else {
            let _ = fs::remove_file(tmp_path).await;
            return Err(err);
        }
    }
    Ok(())
}

#[async_trait]
impl BackendClient for LocalFsClient {
    fn vendor(&self) -> &'static str {
        "local"
    }

    async fn put_object(&self, input: PutObjectInput) -> BackendResult<PutObjectOutput> {
        Self::ensure_key_safe(&input.key)?;
        let path = self.object_path(&input.bucket, &input.key);
        let parent = path.parent().map(Path::to_path_buf).ok_or_else(|| {
            io::Error::new(ErrorKind::Other, "object path missing parent directory")
        })?;

        let (tmp_path, size, etag) = write_temp(&parent, input.body).await?;
        commit(&tmp_path, &path).await?;
        debug!(
            storage_class = input.storage_class.as_str(),
            "stored {} bytes at {}",
            size,
            path.display()
        );
        Ok(PutObjectOutput { etag, size })
    }

    async fn get_object(&self, input: GetObjectInput) -> BackendResult<GetObjectOutput> {
        Self::ensure_key_safe(&input.key)?;
        let path = self.object_path(&input.bucket, &input.key);
        let mut file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                BackendError::NoSuchKey(input.key.clone())
            } else {
                BackendError::Io(err)
            }
        })?;
        let size = file.metadata().await?.len();

        let Some((start, end)) = input.range else {
            return Ok(GetObjectOutput {
                body: ReaderStream::new(file).boxed(),
                content_length: size,
            });
        };

        if start > end || start >= size {
            return Err(BackendError::InvalidRange { start, end, size });
        }
        let end = end.min(size - 1);
        let length = end - start + 1;
        file.seek(SeekFrom::Start(start)).await?;
        Ok(GetObjectOutput {
            body: ReaderStream::new(file.take(length)).boxed(),
            content_length: length,
        })
    }

    async fn delete_object(&self, input: DeleteObjectInput) -> BackendResult<()> {
        Self::ensure_key_safe(&input.key)?;
        let path = self.object_path(&input.bucket, &input.key);
        match fs::remove_file(&path).await {
            Ok(_) => debug!("removed {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("{} already missing", path.display());
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    async fn initiate_multipart_upload(
        &self,
        input: InitiateMultipartUploadInput,
    ) -> BackendResult<InitiateMultipartUploadOutput> {
        Self::ensure_key_safe(&input.key)?;
        let upload_id = Uuid::new_v4().simple().to_string();
        let dir = self.upload_dir(&input.bucket, &upload_id);
        fs::create_dir_all(&dir).await?;

        let descriptor = UploadDescriptor {
            key: input.key.clone(),
        };
        fs::write(dir.join(UPLOAD_DESCRIPTOR), serde_json::to_vec(&descriptor)?).await?;
        debug!(
            storage_class = input.storage_class.as_str(),
            "created upload directory {}",
            dir.display()
        );

        Ok(InitiateMultipartUploadOutput { upload_id })
    }

    async fn upload_part(&self, input: UploadPartInput) -> BackendResult<UploadPartOutput> {
        let (dir, _) = self
            .load_upload(&input.bucket, &input.key, &input.upload_id)
            .await?;
        let (tmp_path, size, etag) = write_temp(&dir, input.body).await?;
        if size != input.part_size {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BackendError::SizeMismatch {
                declared: input.part_size,
                received: size,
            });
        }
        commit(&tmp_path, &Self::part_path(&dir, input.part_number)).await?;

        Ok(UploadPartOutput {
            part_number: input.part_number,
            etag,
        })
    }

    async fn complete_multipart_upload(
        &self,
        input: CompleteMultipartUploadInput,
    ) -> BackendResult<CompleteMultipartUploadOutput> {
        let (dir, _) = self
            .load_upload(&input.bucket, &input.key, &input.upload_id)
            .await?;
        ensure_ascending(&input.parts)?;

        let mut etags = Vec::with_capacity(input.parts.len());
        for part in &input.parts {
            let path = Self::part_path(&dir, part.part_number);
            let actual = match Self::file_md5(&path).await {
                Ok(etag) => etag,
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    return Err(BackendError::InvalidPart {
                        part_number: part.part_number,
                        reason: "part was never uploaded".into(),
                    });
                }
                Err(err) => return Err(err.into()),
            };
            if actual != normalize_etag(&part.etag) {
                return Err(BackendError::InvalidPart {
                    part_number: part.part_number,
                    reason: "etag does not match the uploaded part".into(),
                });
            }
            etags.push(actual);
        }
        let etag = multipart_etag(&etags)?;

        // Concatenate into a temp file first so the final key only ever
        // sees a whole object.
        let path = self.object_path(&input.bucket, &input.key);
        let parent = path.parent().map(Path::to_path_buf).ok_or_else(|| {
            io::Error::new(ErrorKind::Other, "object path missing parent directory")
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        if let Err(err) = concat_parts(&dir, &input.parts, &tmp_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }
        commit(&tmp_path, &path).await?;

        if let Err(err) = fs::remove_dir_all(&dir).await {
            debug!("failed to clean upload directory {}: {}", dir.display(), err);
        }

        Ok(CompleteMultipartUploadOutput {
            location: format!("/{}/{}", input.bucket, input.key),
            etag,
        })
    }

    async fn abort_multipart_upload(
        &self,
        input: AbortMultipartUploadInput,
    ) -> BackendResult<()> {
        let (dir, _) = self
            .load_upload(&input.bucket, &input.key, &input.upload_id)
            .await?;
        fs::remove_dir_all(&dir).await?;
        Ok(())
    }

    /// Write, read back and remove a scratch file under the root.
    async fn health_check(&self) -> BackendResult<()> {
        let scratch = self.root.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&scratch, b"readyz").await?;
        let read_back = fs::read(&scratch).await;
        let _ = fs::remove_file(&scratch).await;
        if read_back? != b"readyz" {
            return Err(BackendError::Io(io::Error::other(
                "scratch file content mismatch",
            )));
        }
        Ok(())
    }

    async fn list_parts(&self, input: ListPartsInput) -> BackendResult<ListPartsOutput> {
        let (dir, _) = self
            .load_upload(&input.bucket, &input.key, &input.upload_id)
            .await?;

        let mut parts = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(part_number) = name
                .to_str()
                .and_then(|n| n.strip_prefix("part-"))
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            let meta = entry.metadata().await?;
            let last_modified = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            parts.push(PartSummary {
                part_number,
                etag: Self::file_md5(&entry.path()).await?,
                size: meta.len(),
                last_modified,
            });
        }
        parts.sort_by_key(|p| p.part_number);

        let max_parts = input.max_parts as usize;
        let is_truncated = parts.len() > max_parts;
        parts.truncate(max_parts);

        Ok(ListPartsOutput {
            upload_id: input.upload_id,
            max_parts: input.max_parts,
            is_truncated,
            parts,
        })
    }
}

async fn concat_parts(
    dir: &Path,
    parts: &[VendorPart],
    dest: &Path,
) -> io::Result<()> {
    let mut out = File::create(dest).await?;
    for part in parts {
        let mut src = File::open(LocalFsClient::part_path(dir, part.part_number)).await?;
        tokio::io::copy(&mut src, &mut out).await?;
    }
    out.flush().await?;
    out.sync_all().await?;
    Ok(())
}
