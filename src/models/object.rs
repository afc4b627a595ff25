//! Represents an object (blob) and the identity used to address it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// `(bucket, key)` pair addressing one object. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectIdentity {
    pub bucket: String,
    pub key: String,
}

impl ObjectIdentity {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Vendor-side key, `"<bucket>/<key>"`. Existing stored objects depend on
    /// this exact layout.
    pub fn storage_key(&self) -> String {
        format!("{}/{}", self.bucket, self.key)
    }
}

impl fmt::Display for ObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Inclusive byte range for downloads. `(0, 0)` means the whole object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub const FULL: ByteRange = ByteRange { start: 0, end: 0 };

    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn is_full(&self) -> bool {
        self.start == 0 && self.end == 0
    }

    /// Number of bytes covered, or `None` for the full-object sentinel.
    pub fn len(&self) -> Option<u64> {
        if self.is_full() || self.end < self.start {
            None
        } else {
            Some(self.end - self.start + 1)
        }
    }
}

/// Catalog record for a stored object. Payload bytes live on the backend.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Object {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    pub bucket: String,

    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Backend the payload was written to. Empty means "use the bucket's".
    pub backend: String,

    /// Content type (MIME type).
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// ETag reported by the backend.
    pub etag: Option<String>,

    pub storage_class: String,

    /// Timestamp when object was last modified.
    pub last_modified: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_key_is_bucket_qualified() {
        let id = ObjectIdentity::new("photos", "2025/img.jpg");
        assert_eq!(id.storage_key(), "photos/2025/img.jpg");
        assert_eq!(id.to_string(), "photos/2025/img.jpg");
    }

    #[test]
    fn zero_range_means_full_object() {
        assert!(ByteRange::FULL.is_full());
        assert_eq!(ByteRange::FULL.len(), None);
        assert_eq!(ByteRange::new(2, 5).len(), Some(4));
        assert_eq!(ByteRange::new(0, 0).len(), None);
        assert_eq!(ByteRange::new(5, 2).len(), None);
    }
}
