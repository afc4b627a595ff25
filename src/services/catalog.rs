//! src/services/catalog.rs
//!
//! Catalog: the gateway's SQLite bookkeeping. It records which backend
//! holds each bucket and object, and tracks the multipart sessions the
//! gateway holds on behalf of HTTP clients (the adapter itself keeps none).

use crate::models::{
    bucket::Bucket,
    multipart::{MultipartPart, MultipartUpload, SessionState},
    object::{Object, ObjectIdentity},
};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("bucket `{0}` is not empty")]
    BucketNotEmpty(String),
    #[error("bucket `{0}` has multipart uploads in progress")]
    BucketHasOpenUploads(String),
    #[error("object `{0}` not found")]
    ObjectNotFound(ObjectIdentity),
    #[error("upload `{0}` not found")]
    UploadNotFound(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// What the catalog stores about a freshly written object.
#[derive(Debug, Clone)]
pub struct ObjectWrite {
    pub backend: String,
    pub content_type: Option<String>,
    pub size_bytes: u64,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Catalog {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl Catalog {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Create any missing tables. Safe to run on every start.
    pub async fn migrate(&self) -> CatalogResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());
        for stmt in statements {
            tracing::debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Validate bucket name format.
    ///
    /// S3-like rules: 3–63 characters of lowercase letters, digits, dots and
    /// hyphens; must start and end with a letter or digit; no `..`, `.-` or
    /// `-.`; must not look like an IPv4 address.
    fn ensure_bucket_name_safe(name: &str) -> CatalogResult<()> {
        let invalid = |reason: &str| {
            Err(CatalogError::InvalidBucketName {
                name: name.to_string(),
                reason: reason.into(),
            })
        };

        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&name.len()) {
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

    pub async fn create_bucket(&self, name: &str, backend: &str) -> CatalogResult<Bucket> {
        Self::ensure_bucket_name_safe(name)?;
        let bucket = Bucket {
            name: name.to_string(),
            backend: backend.to_string(),
            created_at: Utc::now(),
        };

        match sqlx::query("INSERT INTO buckets (name, backend, created_at) VALUES (?, ?, ?)")
            .bind(&bucket.name)
            .bind(&bucket.backend)
            .bind(bucket.created_at)
            .execute(&*self.db)
            .await
        {
            Ok(_) => Ok(bucket),
            Err(err) if is_unique_violation(&err) => {
                Err(CatalogError::BucketAlreadyExists(name.to_string()))
            }
            Err(err) => Err(CatalogError::Sqlx(err)),
        }
    }

    pub async fn fetch_bucket(&self, name: &str) -> CatalogResult<Bucket> {
        sqlx::query_as::<_, Bucket>("SELECT name, backend, created_at FROM buckets WHERE name = ?")
            .bind(name)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => CatalogError::BucketNotFound(name.to_string()),
                other => CatalogError::Sqlx(other),
            })
    }

    /// Remove a bucket that holds no objects and no unfinished uploads.
    pub async fn delete_bucket(&self, name: &str) -> CatalogResult<()> {
        self.fetch_bucket(name).await?;
        let objects: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM objects WHERE bucket = ?")
            .bind(name)
            .fetch_one(&*self.db)
            .await?;
        if objects > 0 {
            return Err(CatalogError::BucketNotEmpty(name.to_string()));
        }

        let open_uploads: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM multipart_uploads WHERE bucket = ? AND state IN (?, ?)",
        )
        .bind(name)
        .bind(SessionState::Initiated)
        .bind(SessionState::Uploading)
        .fetch_one(&*self.db)
        .await?;
        if open_uploads > 0 {
            return Err(CatalogError::BucketHasOpenUploads(name.to_string()));
        }

        sqlx::query("DELETE FROM buckets WHERE name = ?")
            .bind(name)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    pub async fn fetch_object(&self, object: &ObjectIdentity) -> CatalogResult<Object> {
        sqlx::query_as::<_, Object>(
            "SELECT id, bucket, key, backend, content_type, size_bytes, etag,
                    storage_class, last_modified
             FROM objects WHERE bucket = ? AND key = ?",
        )
        .bind(&object.bucket)
        .bind(&object.key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => CatalogError::ObjectNotFound(object.clone()),
            other => CatalogError::Sqlx(other),
        })
    }

    /// Insert or overwrite the record for `object` (S3-like overwrite).
    pub async fn upsert_object(
        &self,
        object: &ObjectIdentity,
        write: ObjectWrite,
    ) -> CatalogResult<Object> {
        let row = sqlx::query_as::<_, Object>(
            r#"
            INSERT INTO objects (
                id, bucket, key, backend, content_type, size_bytes,
                etag, storage_class, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 'STANDARD', ?)
            ON CONFLICT(bucket, key) DO UPDATE SET
                backend = excluded.backend,
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                storage_class = excluded.storage_class,
                last_modified = excluded.last_modified
            RETURNING id, bucket, key, backend, content_type, size_bytes,
                      etag, storage_class, last_modified
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&object.bucket)
        .bind(&object.key)
        .bind(&write.backend)
        .bind(write.content_type)
        .bind(write.size_bytes as i64)
        .bind(&write.etag)
        .bind(write.last_modified)
        .fetch_one(&*self.db)
        .await?;
        Ok(row)
    }

    pub async fn delete_object(&self, object: &ObjectIdentity) -> CatalogResult<()> {
        let result = sqlx::query("DELETE FROM objects WHERE bucket = ? AND key = ?")
            .bind(&object.bucket)
            .bind(&object.key)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CatalogError::ObjectNotFound(object.clone()));
        }
        Ok(())
    }

    pub async fn insert_upload(
        &self,
        upload_id: &str,
        object: &ObjectIdentity,
        backend: &str,
    ) -> CatalogResult<MultipartUpload> {
        let upload = MultipartUpload {
            upload_id: upload_id.to_string(),
            bucket: object.bucket.clone(),
            key: object.key.clone(),
            backend: backend.to_string(),
            state: SessionState::Initiated,
            initiated_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO multipart_uploads (upload_id, bucket, key, backend, state, initiated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&upload.upload_id)
        .bind(&upload.bucket)
        .bind(&upload.key)
        .bind(&upload.backend)
        .bind(upload.state)
        .bind(upload.initiated_at)
        .execute(&*self.db)
        .await?;
        Ok(upload)
    }

    /// Look up a tracked session. The object identity must match the one the
    /// upload was started for.
    pub async fn fetch_upload(
        &self,
        upload_id: &str,
        object: &ObjectIdentity,
    ) -> CatalogResult<MultipartUpload> {
        sqlx::query_as::<_, MultipartUpload>(
            "SELECT upload_id, bucket, key, backend, state, initiated_at
             FROM multipart_uploads WHERE upload_id = ? AND bucket = ? AND key = ?",
        )
        .bind(upload_id)
        .bind(&object.bucket)
        .bind(&object.key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => CatalogError::UploadNotFound(upload_id.to_string()),
            other => CatalogError::Sqlx(other),
        })
    }

    /// Remember an acknowledged part and move the session to `uploading`.
    pub async fn record_part(
        &self,
        upload_id: &str,
        part_number: u32,
        size_bytes: u64,
        etag: &str,
    ) -> CatalogResult<()> {
        let mut tx = self.db.begin().await?;
        sqlx::query(
            "INSERT INTO multipart_parts (upload_id, part_number, size_bytes, etag, uploaded_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(upload_id, part_number) DO UPDATE SET
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                uploaded_at = excluded.uploaded_at",
        )
        .bind(upload_id)
        .bind(part_number as i64)
        .bind(size_bytes as i64)
        .bind(etag)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE multipart_uploads SET state = ? WHERE upload_id = ? AND state = ?")
            .bind(SessionState::Uploading)
            .bind(upload_id)
            .bind(SessionState::Initiated)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn set_upload_state(&self, upload_id: &str, state: SessionState) -> CatalogResult<()> {
        let result = sqlx::query("UPDATE multipart_uploads SET state = ? WHERE upload_id = ?")
            .bind(state)
            .bind(upload_id)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CatalogError::UploadNotFound(upload_id.to_string()));
        }
        Ok(())
    }

    pub async fn list_recorded_parts(&self, upload_id: &str) -> CatalogResult<Vec<MultipartPart>> {
        let parts = sqlx::query_as::<_, MultipartPart>(
            "SELECT upload_id, part_number, size_bytes, etag, uploaded_at
             FROM multipart_parts WHERE upload_id = ? ORDER BY part_number ASC",
        )
        .bind(upload_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(parts)
    }

    /// Total size of the given recorded parts, used for the completed object.
    pub async fn parts_size(&self, upload_id: &str, part_numbers: &[u32]) -> CatalogResult<u64> {
        let parts = self.list_recorded_parts(upload_id).await?;
        let total = parts
            .iter()
            .filter(|p| part_numbers.contains(&(p.part_number as u32)))
            .map(|p| p.size_bytes.max(0) as u64)
            .sum();
        Ok(total)
    }

    /// Round trip used by readiness checks.
    pub async fn ping(&self) -> CatalogResult<i64> {
        let value = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(value)
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    pub(crate) async fn memory_catalog() -> Catalog {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let catalog = Catalog::new(Arc::new(pool));
        catalog.migrate().await.unwrap();
        catalog
    }

    fn write(size: u64, etag: &str) -> ObjectWrite {
        ObjectWrite {
            backend: "primary".into(),
            content_type: Some("text/plain".into()),
            size_bytes: size,
            etag: etag.into(),
            last_modified: Utc::now(),
        }
    }

    #[tokio::test]
    async fn bucket_names_follow_s3_rules() {
        let catalog = memory_catalog().await;
        for bad in ["ab", "Upper", "-lead", "trail.", "a..b", "192.168.0.1", "under_score"] {
            assert!(
                matches!(
                    catalog.create_bucket(bad, "primary").await,
                    Err(CatalogError::InvalidBucketName { .. })
                ),
                "{bad} should be rejected"
            );
        }
        catalog.create_bucket("my-bucket.2025", "primary").await.unwrap();
        assert!(matches!(
            catalog.create_bucket("my-bucket.2025", "primary").await,
            Err(CatalogError::BucketAlreadyExists(_))
        ));
        let bucket = catalog.fetch_bucket("my-bucket.2025").await.unwrap();
        assert_eq!(bucket.backend, "primary");
    }

    #[tokio::test]
    async fn object_records_overwrite_and_block_bucket_deletion() {
        let catalog = memory_catalog().await;
        catalog.create_bucket("docs", "primary").await.unwrap();
        let id = ObjectIdentity::new("docs", "a/b.txt");

        let first = catalog.upsert_object(&id, write(3, "one")).await.unwrap();
        let second = catalog.upsert_object(&id, write(5, "two")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.size_bytes, 5);
        assert_eq!(catalog.fetch_object(&id).await.unwrap().etag.as_deref(), Some("two"));

        assert!(matches!(
            catalog.delete_bucket("docs").await,
            Err(CatalogError::BucketNotEmpty(_))
        ));
        catalog.delete_object(&id).await.unwrap();
        assert!(matches!(
            catalog.fetch_object(&id).await,
            Err(CatalogError::ObjectNotFound(_))
        ));
        catalog.delete_bucket("docs").await.unwrap();
        assert!(matches!(
            catalog.fetch_bucket("docs").await,
            Err(CatalogError::BucketNotFound(_))
        ));
    }

    #[tokio::test]
    async fn sessions_track_parts_and_state() {
        let catalog = memory_catalog().await;
        let id = ObjectIdentity::new("media", "clip");
        catalog.insert_upload("u-1", &id, "primary").await.unwrap();

        catalog.record_part("u-1", 2, 4, "e2").await.unwrap();
        catalog.record_part("u-1", 1, 6, "e1").await.unwrap();
        let upload = catalog.fetch_upload("u-1", &id).await.unwrap();
        assert_eq!(upload.state, SessionState::Uploading);
        assert_eq!(upload.session().upload_id(), "u-1");

        let parts = catalog.list_recorded_parts("u-1").await.unwrap();
        assert_eq!(parts.iter().map(|p| p.part_number).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(catalog.parts_size("u-1", &[1, 2]).await.unwrap(), 10);
        assert_eq!(catalog.parts_size("u-1", &[2]).await.unwrap(), 4);

        catalog
            .set_upload_state("u-1", SessionState::Completed)
            .await
            .unwrap();
        // a late part acknowledgement must not reopen the session
        catalog.record_part("u-1", 3, 1, "e3").await.unwrap();
        let upload = catalog.fetch_upload("u-1", &id).await.unwrap();
        assert_eq!(upload.state, SessionState::Completed);

        let other = ObjectIdentity::new("media", "other");
        assert!(matches!(
            catalog.fetch_upload("u-1", &other).await,
            Err(CatalogError::UploadNotFound(_))
        ));
    }

    #[tokio::test]
    async fn open_uploads_block_bucket_deletion_until_finished() {
        let catalog = memory_catalog().await;
        catalog.create_bucket("media", "primary").await.unwrap();
        let id = ObjectIdentity::new("media", "clip");
        catalog.insert_upload("u-1", &id, "primary").await.unwrap();

        assert!(matches!(
            catalog.delete_bucket("media").await,
            Err(CatalogError::BucketHasOpenUploads(_))
        ));
        catalog.record_part("u-1", 1, 4, "e1").await.unwrap();
        assert!(matches!(
            catalog.delete_bucket("media").await,
            Err(CatalogError::BucketHasOpenUploads(_))
        ));

        catalog
            .set_upload_state("u-1", SessionState::Aborted)
            .await
            .unwrap();
        catalog.delete_bucket("media").await.unwrap();
    }
}
