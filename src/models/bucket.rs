//! Represents a logical bucket: a namespace bound to one storage backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A gateway bucket.
///
/// Objects written into the bucket land on `backend` unless they were
/// recorded against a different backend when they were stored.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    /// Bucket name (S3 naming rules).
    pub name: String,

    /// Name of the configured backend holding this bucket's objects.
    pub backend: String,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,
}
