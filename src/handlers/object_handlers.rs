//! HTTP handlers for object and bucket operations.
//!
//! Object routes carry both single-shot and multipart operations; the query
//! string decides which one a request is (`?uploads`, `?uploadId=`,
//! `?partNumber=`), the same way S3 clients address them.

use super::{body_stream, multipart_handlers};
use crate::{
    errors::AppError,
    models::object::{ByteRange, Object, ObjectIdentity},
    services::gateway::Gateway,
};
use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

/// Query parameters recognised on object routes.
#[derive(Debug, Default, Deserialize)]
pub struct ObjectQuery {
    /// Present (usually empty) on initiate requests.
    pub uploads: Option<String>,
    #[serde(rename = "uploadId")]
    pub upload_id: Option<String>,
    #[serde(rename = "partNumber")]
    pub part_number: Option<u32>,
    #[serde(rename = "max-parts")]
    pub max_parts: Option<u32>,
}

/// Request body for `PUT /{bucket}` (create bucket).
#[derive(Debug, Default, Deserialize)]
pub struct CreateBucketReq {
    /// Backend to place the bucket on; the gateway default when absent.
    pub backend: Option<String>,
}

/// Parsed `Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    /// `bytes=start-end`, both inclusive
    StartEnd(u64, u64),
    /// `bytes=start-`
    StartOpen(u64),
    /// `bytes=-n`, the last n bytes
    Suffix(u64),
}

/// Parse a single `bytes=` range. Multi-range requests are not supported.
pub fn parse_range_header(value: &str) -> Option<RangeSpec> {
    let spec = value.trim().strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }
    let (start, end) = spec.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());
    match (start.is_empty(), end.is_empty()) {
        (true, false) => {
            let n: u64 = end.parse().ok()?;
            (n > 0).then_some(RangeSpec::Suffix(n))
        }
        (false, true) => Some(RangeSpec::StartOpen(start.parse().ok()?)),
        (false, false) => {
            let (start, end): (u64, u64) = (start.parse().ok()?, end.parse().ok()?);
            (start <= end).then_some(RangeSpec::StartEnd(start, end))
        }
        (true, true) => None,
    }
}

/// Resolve a range against the object size into an inclusive [`ByteRange`].
/// `None` means the range cannot be satisfied.
pub fn resolve_range(spec: RangeSpec, size: u64) -> Option<ByteRange> {
    if size == 0 {
        return None;
    }
    let last = size - 1;
    match spec {
        RangeSpec::StartEnd(start, end) if start <= last => {
            Some(ByteRange::new(start, end.min(last)))
        }
        RangeSpec::StartOpen(start) if start <= last => Some(ByteRange::new(start, last)),
        RangeSpec::Suffix(n) => Some(ByteRange::new(size.saturating_sub(n), last)),
        _ => None,
    }
}

/// `PUT /{bucket}/{*key}`: upload an object, or one part with
/// `?partNumber=N&uploadId=U`.
pub async fn put_object(
    State(gateway): State<Gateway>,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<ObjectQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let object = ObjectIdentity::new(bucket, key);
    match (q.upload_id, q.part_number) {
        (Some(upload_id), Some(part_number)) => {
            multipart_handlers::upload_part(&gateway, &object, &upload_id, part_number, &headers, body)
                .await
        }
        (None, None) => upload_object(&gateway, &object, &headers, body).await,
        _ => Err(AppError::bad_request(
            "partNumber and uploadId must be supplied together",
        )),
    }
}

async fn upload_object(
    gateway: &Gateway,
    object: &ObjectIdentity,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let record = gateway
        .put_object(object, content_type, body_stream(body))
        .await?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_etag(response.headers_mut(), record.etag.as_deref());
    Ok(response)
}

/// `GET /{bucket}/{*key}`: stream an object (honouring `Range`), or list
/// parts with `?uploadId=U`.
pub async fn get_object(
    State(gateway): State<Gateway>,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<ObjectQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let object = ObjectIdentity::new(bucket, key);
    if let Some(upload_id) = q.upload_id {
        return multipart_handlers::list_parts(&gateway, &object, &upload_id, q.max_parts).await;
    }

    let range_header = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    tracing::info!(
        "Received request for object get, bucket: {}, object: {}, range: {}",
        object.bucket,
        object.key,
        range_header.as_deref().unwrap_or("")
    );

    let range = match range_header {
        None => ByteRange::FULL,
        Some(raw) => {
            let spec = parse_range_header(&raw)
                .ok_or_else(|| AppError::bad_request(format!("malformed Range header `{}`", raw)))?;
            let meta = gateway.head_object(&object).await?;
            let size = meta.size_bytes.max(0) as u64;
            resolve_range(spec, size).ok_or_else(|| {
                AppError::new(
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    format!("range `{}` not satisfiable for {} bytes", raw, size),
                )
            })?
        }
    };

    let (meta, body) = gateway.get_object(&object, range).await?;
    let partial = !range.is_full();
    let mut response = Response::new(Body::from_stream(body.stream));
    set_object_headers(response.headers_mut(), &meta, body.content_length);
    if partial {
        *response.status_mut() = StatusCode::PARTIAL_CONTENT;
        let content_range = format!("bytes {}-{}/{}", range.start, range.end, meta.size_bytes);
        if let Ok(value) = HeaderValue::from_str(&content_range) {
            response.headers_mut().insert(header::CONTENT_RANGE, value);
        }
    } else {
        *response.status_mut() = StatusCode::OK;
    }
    Ok(response)
}

/// `HEAD /{bucket}/{*key}`: same headers as GET but no body.
pub async fn head_object(
    State(gateway): State<Gateway>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let object = ObjectIdentity::new(bucket, key);
    let meta = gateway.head_object(&object).await?;
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta, meta.size_bytes.max(0) as u64);
    Ok(response)
}

/// `DELETE /{bucket}/{*key}`: delete an object, or abort an upload with
/// `?uploadId=U`.
pub async fn delete_object(
    State(gateway): State<Gateway>,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<ObjectQuery>,
) -> Result<Response, AppError> {
    let object = ObjectIdentity::new(bucket, key);
    if let Some(upload_id) = q.upload_id {
        return multipart_handlers::abort_upload(&gateway, &object, &upload_id).await;
    }

    gateway.delete_object(&object).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `POST /{bucket}/{*key}`: `?uploads` initiates a multipart upload,
/// `?uploadId=U` completes one.
pub async fn post_object(
    State(gateway): State<Gateway>,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<ObjectQuery>,
    body: Bytes,
) -> Result<Response, AppError> {
    let object = ObjectIdentity::new(bucket, key);
    match (q.uploads, q.upload_id) {
        (Some(_), None) => multipart_handlers::initiate_upload(&gateway, &object).await,
        (None, Some(upload_id)) => {
            multipart_handlers::complete_upload(&gateway, &object, &upload_id, &body).await
        }
        _ => Err(AppError::bad_request(
            "POST on an object requires either ?uploads or ?uploadId",
        )),
    }
}

/// `PUT /{bucket}`: create bucket.
pub async fn create_bucket(
    State(gateway): State<Gateway>,
    Path(bucket): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let req: CreateBucketReq = if body.is_empty() {
        CreateBucketReq::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|err| AppError::bad_request(format!("invalid bucket request: {}", err)))?
    };

    let created = gateway.create_bucket(&bucket, req.backend).await?;
    Ok((StatusCode::OK, Json(created)))
}

/// `DELETE /{bucket}`: delete an empty bucket.
pub async fn delete_bucket(
    State(gateway): State<Gateway>,
    Path(bucket): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    gateway.delete_bucket(&bucket).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn set_etag(headers: &mut HeaderMap, etag: Option<&str>) {
    if let Some(etag) = etag {
        let quoted = format!("\"{}\"", etag);
        if let Ok(value) = HeaderValue::from_str(&quoted) {
            headers.insert(header::ETAG, value);
        }
    }
}

fn set_object_headers(headers: &mut HeaderMap, meta: &Object, content_length: u64) {
    let content_type = meta
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(content_length));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    set_etag(headers, meta.etag.as_deref());

    if let Ok(value) = HeaderValue::from_str(&meta.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_range_forms() {
        assert_eq!(parse_range_header("bytes=0-4"), Some(RangeSpec::StartEnd(0, 4)));
        assert_eq!(parse_range_header("bytes=5-"), Some(RangeSpec::StartOpen(5)));
        assert_eq!(parse_range_header("bytes=-3"), Some(RangeSpec::Suffix(3)));
        assert_eq!(parse_range_header("bytes=4-2"), None);
        assert_eq!(parse_range_header("bytes=0-1,4-5"), None);
        assert_eq!(parse_range_header("bytes=-0"), None);
        assert_eq!(parse_range_header("items=0-1"), None);
        assert_eq!(parse_range_header("bytes=a-b"), None);
    }

    #[test]
    fn resolves_against_object_size() {
        assert_eq!(
            resolve_range(RangeSpec::StartEnd(2, 100), 10),
            Some(ByteRange::new(2, 9))
        );
        assert_eq!(
            resolve_range(RangeSpec::StartOpen(7), 10),
            Some(ByteRange::new(7, 9))
        );
        assert_eq!(
            resolve_range(RangeSpec::Suffix(20), 10),
            Some(ByteRange::new(0, 9))
        );
        assert_eq!(resolve_range(RangeSpec::StartEnd(10, 12), 10), None);
        assert_eq!(resolve_range(RangeSpec::StartOpen(0), 0), None);
    }
}
