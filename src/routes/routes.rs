//! Defines routes for the gateway's bucket and object operations.
//!
//! ## Structure
//! - **Bucket-level endpoints**
//!   - `PUT    /{bucket}`: create bucket (optional JSON `{"backend": ..}`)
//!   - `DELETE /{bucket}`: delete an empty bucket
//!
//! - **Object-level endpoints**
//!   - `PUT    /{bucket}/{*key}`: upload object, or a part with `?partNumber&uploadId`
//!   - `GET    /{bucket}/{*key}`: download object (Range aware), or list parts with `?uploadId`
//!   - `HEAD   /{bucket}/{*key}`: retrieve metadata only
//!   - `DELETE /{bucket}/{*key}`: delete object, or abort with `?uploadId`
//!   - `POST   /{bucket}/{*key}`: initiate with `?uploads`, complete with `?uploadId`
//!
//! The wildcard `*key` allows nested keys like `photos/2025/img.jpg`.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{
            create_bucket, delete_bucket, delete_object, get_object, head_object, post_object,
            put_object,
        },
    },
    services::gateway::Gateway,
};
use axum::{
    Router,
    routing::{get, put},
};

/// Build and return the router for all gateway routes.
pub fn routes() -> Router<Gateway> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/{bucket}/{*key}",
            put(put_object)
                .get(get_object)
                .head(head_object)
                .delete(delete_object)
                .post(post_object),
        )
        .route("/{bucket}", put(create_bucket).delete(delete_bucket))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backends::{LocalFsClient, MemoryClient},
        services::{
            adapter::{BackendDetail, ObjectStoreAdapter},
            catalog::tests::memory_catalog,
            registry::BackendRegistry,
        },
    };
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode, header},
        response::Response,
    };
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn app_with(registry: BackendRegistry, default_backend: &str) -> Router {
        let gateway = Gateway::new(memory_catalog().await, registry, default_backend.into());
        routes().with_state(gateway)
    }

    fn memory_registry() -> BackendRegistry {
        let mut registry = BackendRegistry::new();
        registry.insert(ObjectStoreAdapter::new(
            BackendDetail {
                name: "mem".into(),
                bucket: "vendor".into(),
            },
            Arc::new(MemoryClient::new()),
        ));
        registry
    }

    fn disk_registry(root: &std::path::Path) -> BackendRegistry {
        let mut registry = BackendRegistry::new();
        registry.insert(ObjectStoreAdapter::new(
            BackendDetail {
                name: "disk".into(),
                bucket: "gateway".into(),
            },
            Arc::new(LocalFsClient::new(root)),
        ));
        registry
    }

    async fn memory_app() -> Router {
        app_with(memory_registry(), "mem").await
    }

    async fn send(app: &Router, method: Method, uri: &str, body: &'static [u8]) -> Response {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .unwrap();
        app.clone().oneshot(request).await.unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn extract(xml: &str, tag: &str) -> String {
        let open = format!("<{}>", tag);
        let close = format!("</{}>", tag);
        let start = xml.find(&open).unwrap() + open.len();
        let end = xml[start..].find(&close).unwrap() + start;
        xml[start..end].to_string()
    }

    fn header_str(response: &Response, name: header::HeaderName) -> String {
        response.headers()[name].to_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_and_readiness() {
        let app = memory_app().await;
        let response = send(&app, Method::GET, "/healthz", b"").await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(&app, Method::GET, "/readyz", b"").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("\"mem\""));
    }

    #[tokio::test]
    async fn put_get_and_ranges() {
        let app = memory_app().await;
        assert_eq!(
            send(&app, Method::PUT, "/docs", b"").await.status(),
            StatusCode::OK
        );
        let response = send(&app, Method::PUT, "/docs/notes/a.txt", b"0123456789").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(header::ETAG));

        let response = send(&app, Method::GET, "/docs/notes/a.txt", b"").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_str(&response, header::CONTENT_LENGTH), "10");
        assert_eq!(body_text(response).await, "0123456789");

        let request = Request::get("/docs/notes/a.txt")
            .header(header::RANGE, "bytes=2-5")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(header_str(&response, header::CONTENT_RANGE), "bytes 2-5/10");
        assert_eq!(body_text(response).await, "2345");

        let request = Request::get("/docs/notes/a.txt")
            .header(header::RANGE, "bytes=-3")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(body_text(response).await, "789");

        let request = Request::get("/docs/notes/a.txt")
            .header(header::RANGE, "bytes=20-30")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);

        let response = send(&app, Method::HEAD, "/docs/notes/a.txt", b"").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_str(&response, header::CONTENT_LENGTH), "10");
    }

    #[tokio::test]
    async fn missing_object_bucket_and_backend() {
        let app = memory_app().await;
        let response = send(&app, Method::PUT, "/nobucket/k", b"data").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        send(&app, Method::PUT, "/docs", b"").await;
        let response = send(&app, Method::GET, "/docs/missing", b"").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(&app, Method::PUT, "/other", br#"{"backend": "nowhere"}"#).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(response).await.contains("nowhere"));
    }

    #[tokio::test]
    async fn delete_object_then_bucket() {
        let app = memory_app().await;
        send(&app, Method::PUT, "/docs", b"").await;
        send(&app, Method::PUT, "/docs/k", b"data").await;

        let response = send(&app, Method::DELETE, "/docs", b"").await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = send(&app, Method::DELETE, "/docs/k", b"").await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = send(&app, Method::GET, "/docs/k", b"").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(&app, Method::DELETE, "/docs", b"").await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn multipart_upload_over_http_on_disk_backend() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(disk_registry(dir.path()), "disk").await;
        send(&app, Method::PUT, "/media", b"").await;

        let response = send(&app, Method::POST, "/media/video.bin?uploads", b"").await;
        assert_eq!(response.status(), StatusCode::OK);
        let upload_id = extract(&body_text(response).await, "UploadId");

        let uri = |n: u32| format!("/media/video.bin?partNumber={}&uploadId={}", n, upload_id);
        let response = send(&app, Method::PUT, &uri(2), b"BBBB").await;
        assert_eq!(response.status(), StatusCode::OK);
        let etag2 = header_str(&response, header::ETAG);
        let response = send(&app, Method::PUT, &uri(1), b"AAAA").await;
        let etag1 = header_str(&response, header::ETAG);

        let list_uri = format!("/media/video.bin?uploadId={}&max-parts=1", upload_id);
        let listing = body_text(send(&app, Method::GET, &list_uri, b"").await).await;
        assert!(listing.contains("<IsTruncated>true</IsTruncated>"));
        assert_eq!(extract(&listing, "PartNumber"), "1");

        let complete_uri = format!("/media/video.bin?uploadId={}", upload_id);
        let reversed = format!(
            r#"{{"parts":[{{"partNumber":2,"etag":{:?}}},{{"partNumber":1,"etag":{:?}}}]}}"#,
            etag2, etag1
        );
        let request = Request::post(&complete_uri)
            .body(Body::from(reversed))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let ordered = format!(
            r#"{{"parts":[{{"partNumber":1,"etag":{:?}}},{{"partNumber":2,"etag":{:?}}}]}}"#,
            etag1, etag2
        );
        let request = Request::post(&complete_uri)
            .body(Body::from(ordered))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let result = body_text(response).await;
        assert_eq!(extract(&result, "Key"), "video.bin");
        assert!(extract(&result, "ETag").contains("-2"));

        let response = send(&app, Method::GET, "/media/video.bin", b"").await;
        assert_eq!(header_str(&response, header::CONTENT_LENGTH), "8");
        assert_eq!(body_text(response).await, "AAAABBBB");

        // the session is finished: abort and further parts are conflicts
        let response = send(&app, Method::DELETE, &complete_uri, b"").await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let response = send(&app, Method::PUT, &uri(3), b"CCCC").await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn aborted_upload_rejects_parts() {
        let app = memory_app().await;
        send(&app, Method::PUT, "/media", b"").await;
        let response = send(&app, Method::POST, "/media/clip?uploads", b"").await;
        let upload_id = extract(&body_text(response).await, "UploadId");

        let part_uri = |n: u32| format!("/media/clip?partNumber={}&uploadId={}", n, upload_id);
        let response = send(&app, Method::PUT, &part_uri(1), b"AAAA").await;
        assert_eq!(response.status(), StatusCode::OK);

        let abort_uri = format!("/media/clip?uploadId={}", upload_id);
        let response = send(&app, Method::DELETE, &abort_uri, b"").await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = send(&app, Method::PUT, &part_uri(2), b"BBBB").await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = send(&app, Method::PUT, "/media/clip?partNumber=1&uploadId=bogus", b"x").await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn s3_xml_completion_document_is_accepted() {
        let app = memory_app().await;
        send(&app, Method::PUT, "/media", b"").await;
        let response = send(&app, Method::POST, "/media/doc.bin?uploads", b"").await;
        let upload_id = extract(&body_text(response).await, "UploadId");

        let part_uri = |n: u32| format!("/media/doc.bin?partNumber={}&uploadId={}", n, upload_id);
        let etag1 = header_str(&send(&app, Method::PUT, &part_uri(1), b"AAAA").await, header::ETAG);
        let etag2 = header_str(&send(&app, Method::PUT, &part_uri(2), b"BBBB").await, header::ETAG);

        let document = format!(
            "<CompleteMultipartUpload>\
               <Part><PartNumber>1</PartNumber><ETag>{}</ETag></Part>\
               <Part><PartNumber>2</PartNumber><ETag>{}</ETag></Part>\
             </CompleteMultipartUpload>",
            etag1, etag2
        );
        let request = Request::post(format!("/media/doc.bin?uploadId={}", upload_id))
            .header(header::CONTENT_TYPE, "application/xml")
            .body(Body::from(document))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_str(&response, header::CONTENT_TYPE), "application/xml");

        let response = send(&app, Method::GET, "/media/doc.bin", b"").await;
        assert_eq!(body_text(response).await, "AAAABBBB");
    }

    #[tokio::test]
    async fn upload_unknown_to_a_restarted_backend_is_a_conflict() {
        let catalog = memory_catalog().await;
        let before = routes().with_state(Gateway::new(
            catalog.clone(),
            memory_registry(),
            "mem".into(),
        ));
        send(&before, Method::PUT, "/media", b"").await;
        let response = send(&before, Method::POST, "/media/clip?uploads", b"").await;
        let upload_id = extract(&body_text(response).await, "UploadId");

        // same catalog, fresh in-memory vendor that never issued the id
        let after = routes().with_state(Gateway::new(catalog, memory_registry(), "mem".into()));
        let part_uri = format!("/media/clip?partNumber=1&uploadId={}", upload_id);
        let response = send(&after, Method::PUT, &part_uri, b"AAAA").await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let list_uri = format!("/media/clip?uploadId={}", upload_id);
        let response = send(&after, Method::GET, &list_uri, b"").await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn client_mistakes_are_bad_requests() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(disk_registry(dir.path()), "disk").await;
        send(&app, Method::PUT, "/docs", b"").await;

        let response = send(&app, Method::PUT, "/docs/folder/", b"").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(&app, Method::POST, "/docs/big?uploads", b"").await;
        let upload_id = extract(&body_text(response).await, "UploadId");
        let uri = format!("/docs/big?partNumber=0&uploadId={}", upload_id);
        let response = send(&app, Method::PUT, &uri, b"AAAA").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let uri = format!("/docs/big?partNumber=10001&uploadId={}", upload_id);
        let response = send(&app, Method::PUT, &uri, b"AAAA").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn open_upload_keeps_bucket_alive() {
        let app = memory_app().await;
        send(&app, Method::PUT, "/media", b"").await;
        let response = send(&app, Method::POST, "/media/clip?uploads", b"").await;
        let upload_id = extract(&body_text(response).await, "UploadId");

        let response = send(&app, Method::DELETE, "/media", b"").await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let abort_uri = format!("/media/clip?uploadId={}", upload_id);
        send(&app, Method::DELETE, &abort_uri, b"").await;
        let response = send(&app, Method::DELETE, "/media", b"").await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn readiness_fails_when_a_disk_backend_is_unwritable() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(disk_registry(dir.path()), "disk").await;
        let response = send(&app, Method::GET, "/readyz", b"").await;
        assert_eq!(response.status(), StatusCode::OK);

        let broken = app_with(disk_registry(&dir.path().join("gone")), "disk").await;
        let response = send(&broken, Method::GET, "/readyz", b"").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(body_text(response).await.contains("backend:disk"));
    }
}
