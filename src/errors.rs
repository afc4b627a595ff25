use crate::{
    backends::BackendError,
    services::{adapter::StoreError, catalog::CatalogError, gateway::GatewayError},
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        let status = match &err {
            StoreError::NoSuchObject(_) => StatusCode::NOT_FOUND,
            StoreError::InvalidSessionState { .. } => StatusCode::CONFLICT,
            StoreError::CompleteFailed { .. } => StatusCode::BAD_REQUEST,
            StoreError::PartUploadFailed { source, .. }
            | StoreError::UploadFailed { source, .. }
            | StoreError::InitiateFailed { source, .. }
                if is_client_mistake(source) =>
            {
                StatusCode::BAD_REQUEST
            }
            StoreError::BackendUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            StoreError::InitiateFailed { .. }
            | StoreError::PartUploadFailed { .. }
            | StoreError::AbortFailed { .. }
            | StoreError::ListPartsFailed { .. }
            | StoreError::UploadFailed { .. }
            | StoreError::DownloadFailed { .. }
            | StoreError::DeleteFailed { .. }
            | StoreError::NoSuchBackend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, err.to_string())
    }
}

/// Backend rejections caused by what the client sent rather than by the vendor.
fn is_client_mistake(err: &BackendError) -> bool {
    matches!(
        err,
        BackendError::InvalidKey(_)
            | BackendError::InvalidPart { .. }
            | BackendError::SizeMismatch { .. }
    )
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        let status = match &err {
            CatalogError::BucketNotFound(_)
            | CatalogError::ObjectNotFound(_)
            | CatalogError::UploadNotFound(_) => StatusCode::NOT_FOUND,
            CatalogError::BucketAlreadyExists(_)
            | CatalogError::BucketNotEmpty(_)
            | CatalogError::BucketHasOpenUploads(_) => StatusCode::CONFLICT,
            CatalogError::InvalidBucketName { .. } => StatusCode::BAD_REQUEST,
            CatalogError::Sqlx(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, err.to_string())
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Store(err) => err.into(),
            GatewayError::Catalog(err) => err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::object::ObjectIdentity;

    #[test]
    fn store_errors_map_to_http_statuses() {
        let missing: AppError = StoreError::NoSuchObject(ObjectIdentity::new("b", "k")).into();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);

        let stale: AppError = StoreError::InvalidSessionState {
            upload_id: "u".into(),
            state: "aborted".into(),
            reason: "done".into(),
        }
        .into();
        assert_eq!(stale.status, StatusCode::CONFLICT);

        let backend: AppError = GatewayError::from(StoreError::NoSuchBackend("x".into())).into();
        assert_eq!(backend.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(backend.message, "backend `x` is not configured");
    }

    #[test]
    fn client_side_backend_rejections_are_bad_requests() {
        let object = ObjectIdentity::new("docs", "folder/");
        let bad_key: AppError = StoreError::UploadFailed {
            object: object.clone(),
            source: BackendError::InvalidKey("docs/folder/".into()),
        }
        .into();
        assert_eq!(bad_key.status, StatusCode::BAD_REQUEST);

        let bad_number: AppError = StoreError::PartUploadFailed {
            upload_id: "u".into(),
            part_number: 0,
            source: BackendError::InvalidPart {
                part_number: 0,
                reason: "out of range".into(),
            },
        }
        .into();
        assert_eq!(bad_number.status, StatusCode::BAD_REQUEST);

        let short_body: AppError = StoreError::PartUploadFailed {
            upload_id: "u".into(),
            part_number: 1,
            source: BackendError::SizeMismatch {
                declared: 4,
                received: 2,
            },
        }
        .into();
        assert_eq!(short_body.status, StatusCode::BAD_REQUEST);

        let disk: AppError = StoreError::UploadFailed {
            object,
            source: BackendError::Io(std::io::Error::other("disk full")),
        }
        .into();
        assert_eq!(disk.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
