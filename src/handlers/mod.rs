pub mod health_handlers;
pub mod multipart_handlers;
pub mod object_handlers;

use crate::backends::ByteStream;
use axum::body::Body;
use futures::StreamExt;
use std::io;

/// Adapt a request body into the backend stream type.
pub(crate) fn body_stream(body: Body) -> ByteStream {
    body.into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other))
        .boxed()
}
