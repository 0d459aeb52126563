//! Encode a cms response envelope into an axum HTTP response.

use axum::body::Body;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;

use edgekit_core::context::envelope::{response_type, ResponseEnvelope};

pub async fn encode(envelope: ResponseEnvelope) -> Response {
    let status =
        StatusCode::from_u16(envelope.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut builder = Response::builder().status(status);
    if let Some(mime) = envelope.mime() {
        builder = builder.header(header::CONTENT_TYPE, mime);
    }
    for (name, value) in envelope.headers() {
        let Ok(name) = name.parse::<HeaderName>() else { continue };
        let Ok(value) = HeaderValue::from_str(&value) else { continue };
        builder = builder.header(name, value);
    }

    let body = if envelope.response_type() == Some(response_type::STATIC_FILE) {
        let Some(path) = envelope.file_path() else {
            return plain_status(StatusCode::NOT_FOUND, "File not found");
        };
        match tokio::fs::read(path).await {
            Ok(bytes) => Body::from(bytes),
            Err(_) => return plain_status(StatusCode::NOT_FOUND, "File not found"),
        }
    } else if let Some(content) = envelope.content() {
        Body::from(content.to_string())
    } else if let Some(blob) = envelope.blob_content() {
        Body::from(blob)
    } else {
        Body::empty()
    };

    builder.body(body).unwrap_or_else(|err| {
        tracing::error!(error = %err, "failed to build http response");
        plain_status(StatusCode::INTERNAL_SERVER_ERROR, "response build failed")
    })
}

fn plain_status(status: StatusCode, reason: &'static str) -> Response {
    Response::builder()
        .status(status)
        .body(Body::from(reason))
        .expect("static response")
}
