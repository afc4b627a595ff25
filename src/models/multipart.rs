//! Multipart upload sessions and parts.
//!
//! The adapter keeps no session table: a [`MultipartSession`] is issued by
//! `initiate_multipart_upload` and handed back by the caller on every later
//! call. Terminal transitions need `&mut` access to the session, so a shared
//! session can serve concurrent part uploads but never two racing
//! completions.

use super::object::ObjectIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Highest part number vendors accept.
pub const MAX_PART_NUMBER: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Initiated,
    Uploading,
    Completed,
    Aborted,
}

impl SessionState {
    /// `Completed` and `Aborted` are final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Aborted)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Initiated => "initiated",
            SessionState::Uploading => "uploading",
            SessionState::Completed => "completed",
            SessionState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// One in-flight multipart upload against one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartSession {
    upload_id: String,
    identity: ObjectIdentity,
    state: SessionState,
}

impl MultipartSession {
    pub(crate) fn initiated(upload_id: String, identity: ObjectIdentity) -> Self {
        Self {
            upload_id,
            identity,
            state: SessionState::Initiated,
        }
    }

    /// Rebuild a session the caller persisted between requests.
    pub fn resume(upload_id: String, identity: ObjectIdentity, state: SessionState) -> Self {
        Self {
            upload_id,
            identity,
            state,
        }
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn identity(&self) -> &ObjectIdentity {
        &self.identity
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn finish(&mut self, state: SessionState) {
        self.state = state;
    }
}

/// Acknowledgement for one uploaded part. Callers accumulate these and pass
/// them back to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartResult {
    pub part_number: u32,
    pub etag: String,
    pub size_bytes: u64,
}

/// A part reference supplied to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPart {
    pub part_number: u32,
    #[serde(alias = "ETag", alias = "eTag")]
    pub etag: String,
}

impl From<&PartResult> for CompletedPart {
    fn from(part: &PartResult) -> Self {
        Self {
            part_number: part.part_number,
            etag: part.etag.clone(),
        }
    }
}

/// Produced once by a successful completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedUpload {
    pub location: String,
    pub bucket: String,
    pub key: String,
    pub etag: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartInfo {
    pub part_number: u32,
    pub etag: String,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
}

/// Parts currently acknowledged by the backend, capped at `max_parts`.
#[derive(Debug, Clone, Serialize)]
pub struct PartListing {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub max_parts: u32,
    pub is_truncated: bool,
    pub parts: Vec<PartInfo>,
}

/// Catalog row for a session the gateway is tracking on behalf of clients.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct MultipartUpload {
    /// Upload id issued by the backend.
    pub upload_id: String,

    pub bucket: String,

    /// Object key being uploaded.
    pub key: String,

    /// Backend that issued the upload id.
    pub backend: String,

    pub state: SessionState,

    /// Timestamp when upload was initiated.
    pub initiated_at: DateTime<Utc>,
}

impl MultipartUpload {
    pub fn session(&self) -> MultipartSession {
        MultipartSession::resume(
            self.upload_id.clone(),
            ObjectIdentity::new(&self.bucket, &self.key),
            self.state,
        )
    }
}

/// Catalog row for a part acknowledged by the backend.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct MultipartPart {
    pub upload_id: String,

    /// Part number (1-based).
    pub part_number: i64,

    /// Size in bytes.
    pub size_bytes: i64,

    /// ETag hash for this part.
    pub etag: String,

    /// Timestamp when this part was uploaded.
    pub uploaded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        let mut session =
            MultipartSession::initiated("u1".into(), ObjectIdentity::new("b", "k"));
        assert!(!session.state().is_terminal());
        assert!(!SessionState::Uploading.is_terminal());

        session.finish(SessionState::Aborted);
        assert!(session.state().is_terminal());
        assert_eq!(session.state().to_string(), "aborted");
    }

    #[test]
    fn completed_part_accepts_s3_style_json() {
        let part: CompletedPart =
            serde_json::from_str(r#"{"partNumber": 2, "ETag": "\"abc\""}"#).unwrap();
        assert_eq!(part.part_number, 2);
        assert_eq!(part.etag, "\"abc\"");
    }
}
