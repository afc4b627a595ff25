//! Multipart upload handlers. Dispatched from the object routes by query
//! string; responses use the S3 XML result documents.

use super::body_stream;
use crate::{
    errors::AppError,
    models::{
        multipart::{CompletedPart, CompletedUpload, PartListing},
        object::ObjectIdentity,
    },
    services::gateway::Gateway,
};
use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use chrono::SecondsFormat;
use quick_xml::se::to_string as to_xml;
use serde::{Deserialize, Serialize};

const S3_XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";
const DEFAULT_MAX_PARTS: u32 = 1000;

/// JSON body of a completion request.
#[derive(Debug, Deserialize)]
pub struct CompleteUploadReq {
    #[serde(alias = "Parts", alias = "Part")]
    pub parts: Vec<CompletedPart>,
}

/// S3 `<CompleteMultipartUpload>` body.
#[derive(Debug, Deserialize)]
#[serde(rename = "CompleteMultipartUpload")]
pub struct CompleteMultipartUploadXml {
    #[serde(rename = "Part", default)]
    pub parts: Vec<CompletePartXml>,
}

#[derive(Debug, Deserialize)]
pub struct CompletePartXml {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
    #[serde(rename = "ETag")]
    pub etag: String,
}

#[derive(Serialize)]
#[serde(rename = "InitiateMultipartUploadResult")]
struct InitiateMultipartUploadResult<'a> {
    #[serde(rename = "@xmlns")]
    xmlns: &'static str,
    #[serde(rename = "Bucket")]
    bucket: &'a str,
    #[serde(rename = "Key")]
    key: &'a str,
    #[serde(rename = "UploadId")]
    upload_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename = "CompleteMultipartUploadResult")]
struct CompleteMultipartUploadResult<'a> {
    #[serde(rename = "@xmlns")]
    xmlns: &'static str,
    #[serde(rename = "Location")]
    location: &'a str,
    #[serde(rename = "Bucket")]
    bucket: &'a str,
    #[serde(rename = "Key")]
    key: &'a str,
    #[serde(rename = "ETag")]
    etag: String,
}

#[derive(Serialize)]
#[serde(rename = "ListPartsResult")]
struct ListPartsResult<'a> {
    #[serde(rename = "@xmlns")]
    xmlns: &'static str,
    #[serde(rename = "Bucket")]
    bucket: &'a str,
    #[serde(rename = "Key")]
    key: &'a str,
    #[serde(rename = "UploadId")]
    upload_id: &'a str,
    #[serde(rename = "MaxParts")]
    max_parts: u32,
    #[serde(rename = "IsTruncated")]
    is_truncated: bool,
    #[serde(rename = "Part", skip_serializing_if = "Vec::is_empty")]
    parts: Vec<PartItem>,
}

#[derive(Serialize)]
struct PartItem {
    #[serde(rename = "PartNumber")]
    part_number: u32,
    #[serde(rename = "LastModified")]
    last_modified: String,
    #[serde(rename = "ETag")]
    etag: String,
    #[serde(rename = "Size")]
    size: u64,
}

pub async fn initiate_upload(
    gateway: &Gateway,
    object: &ObjectIdentity,
) -> Result<Response, AppError> {
    let session = gateway.initiate_upload(object).await?;
    let result = InitiateMultipartUploadResult {
        xmlns: S3_XMLNS,
        bucket: &object.bucket,
        key: &object.key,
        upload_id: session.upload_id(),
    };
    xml_response(&result)
}

pub async fn upload_part(
    gateway: &Gateway,
    object: &ObjectIdentity,
    upload_id: &str,
    part_number: u32,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let size_bytes = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or_else(|| {
            AppError::new(
                StatusCode::LENGTH_REQUIRED,
                "part uploads require a Content-Length header",
            )
        })?;

    let part = gateway
        .upload_part(object, upload_id, part_number, body_stream(body), size_bytes)
        .await?;

    let mut response = Response::new(Body::empty());
    if let Ok(value) = HeaderValue::from_str(&quoted(&part.etag)) {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}

/// Accepts either the S3 XML document or the JSON form.
pub async fn complete_upload(
    gateway: &Gateway,
    object: &ObjectIdentity,
    upload_id: &str,
    body: &[u8],
) -> Result<Response, AppError> {
    let parts = parse_completion(body)?;
    let completed = gateway.complete_upload(object, upload_id, &parts).await?;
    xml_response(&complete_result(&completed))
}

pub async fn abort_upload(
    gateway: &Gateway,
    object: &ObjectIdentity,
    upload_id: &str,
) -> Result<Response, AppError> {
    gateway.abort_upload(object, upload_id).await?;
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NO_CONTENT;
    Ok(response)
}

pub async fn list_parts(
    gateway: &Gateway,
    object: &ObjectIdentity,
    upload_id: &str,
    max_parts: Option<u32>,
) -> Result<Response, AppError> {
    let max_parts = max_parts
        .unwrap_or(DEFAULT_MAX_PARTS)
        .clamp(1, DEFAULT_MAX_PARTS);
    let listing = gateway.list_parts(object, upload_id, max_parts).await?;
    xml_response(&list_parts_result(&listing))
}

fn parse_completion(body: &[u8]) -> Result<Vec<CompletedPart>, AppError> {
    let is_xml = body
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'<');
    if !is_xml {
        let req: CompleteUploadReq = serde_json::from_slice(body)
            .map_err(|err| AppError::bad_request(format!("invalid completion request: {}", err)))?;
        return Ok(req.parts);
    }

    let xml = std::str::from_utf8(body)
        .map_err(|_| AppError::bad_request("completion document is not valid UTF-8"))?;
    let req: CompleteMultipartUploadXml = quick_xml::de::from_str(xml)
        .map_err(|err| AppError::bad_request(format!("malformed completion XML: {}", err)))?;
    Ok(req
        .parts
        .into_iter()
        .map(|p| CompletedPart {
            part_number: p.part_number,
            etag: p.etag,
        })
        .collect())
}

fn quoted(etag: &str) -> String {
    format!("\"{}\"", etag)
}

fn complete_result(completed: &CompletedUpload) -> CompleteMultipartUploadResult<'_> {
    CompleteMultipartUploadResult {
        xmlns: S3_XMLNS,
        location: &completed.location,
        bucket: &completed.bucket,
        key: &completed.key,
        etag: quoted(&completed.etag),
    }
}

fn list_parts_result(listing: &PartListing) -> ListPartsResult<'_> {
    ListPartsResult {
        xmlns: S3_XMLNS,
        bucket: &listing.bucket,
        key: &listing.key,
        upload_id: &listing.upload_id,
        max_parts: listing.max_parts,
        is_truncated: listing.is_truncated,
        parts: listing
            .parts
            .iter()
            .map(|part| PartItem {
                part_number: part.part_number,
                last_modified: part.last_modified.to_rfc3339_opts(SecondsFormat::Millis, true),
                etag: quoted(&part.etag),
                size: part.size_bytes,
            })
            .collect(),
    }
}

fn xml_response<T: Serialize>(result: &T) -> Result<Response, AppError> {
    let document = to_xml(result)
        .map_err(|err| AppError::internal(format!("failed to encode XML response: {}", err)))?;
    let xml = format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}", document);

    let mut response = Response::new(Body::from(xml));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/xml"),
    );
    Ok(response)
}
