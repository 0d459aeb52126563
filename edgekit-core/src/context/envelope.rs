//! The cms-shaped response envelope and its field names.
//!
//! Responses are JSON documents of the form
//! `{"cms": {"webserver": {"index", "headercode", "mime"}, "content" | "blob-content", "http": {...}}}`.
//! Binary bodies travel base64-encoded under `blob-content`; custom headers
//! live under `cms.http` with list values collapsed comma-separated.

use std::collections::HashMap;

use base64::Engine;
use serde_json::{json, Map, Value};

use crate::error::status;

/// Envelope field names.
pub mod keys {
    pub const CMS: &str = "cms";
    pub const REQUEST: &str = "request";
    pub const QUERY: &str = "query";
    pub const FORM: &str = "form";
    pub const COOKIE: &str = "cookie";
    pub const WEB_SERVER: &str = "webserver";
    pub const INDEX: &str = "index";
    pub const HEADER_CODE: &str = "headercode";
    pub const MIME: &str = "mime";
    pub const CONTENT: &str = "content";
    pub const BLOB_CONTENT: &str = "blob-content";
    pub const HTTP: &str = "http";
    pub const FILE_PATH: &str = "filepath";
    pub const METHOD: &str = "method";
    pub const URL: &str = "url";
    pub const RAW_URL: &str = "rawurl";
    pub const FULL_URL: &str = "full-url";
    pub const REQUEST_ID: &str = "request-id";
    pub const HOST: &str = "host";
    pub const PORT: &str = "port";
    pub const HOST_IP: &str = "hostip";
    pub const HOST_PORT: &str = "hostport";
    pub const CLIENT_IP: &str = "clientip";
    pub const BODY: &str = "body";
    pub const FILES: &str = "files";
}

/// `cms.webserver.index` response-type tags.
pub mod response_type {
    /// Inline body.
    pub const RENDERED: &str = "5";
    /// Body intended for template interpolation by the host.
    pub const RENDERABLE: &str = "4";
    /// Body is a filesystem path served by the host.
    pub const STATIC_FILE: &str = "20";
}

/// Mime types used by the default encoders.
pub mod mime {
    pub const HTML: &str = "text/html";
    pub const JSON: &str = "application/json";
    pub const TEXT: &str = "text/plain";
    pub const OCTET_STREAM: &str = "application/octet-stream";
}

/// Response body content handed to [`build`].
pub enum Content {
    Text(String),
    Blob(Vec<u8>),
    FilePath(String),
}

/// A protocol-shaped response document, ready for transmission by a
/// listener.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    pub body: Value,
}

impl ResponseEnvelope {
    pub fn cms(&self) -> Option<&Value> {
        self.body.get(keys::CMS)
    }

    fn webserver(&self) -> Option<&Value> {
        self.cms()?.get(keys::WEB_SERVER)
    }

    pub fn header_code(&self) -> &str {
        self.webserver()
            .and_then(|ws| ws.get(keys::HEADER_CODE))
            .and_then(Value::as_str)
            .unwrap_or(status::INTERNAL_SERVER_ERROR)
    }

    pub fn status(&self) -> u16 {
        status::as_u16(self.header_code())
    }

    pub fn mime(&self) -> Option<&str> {
        self.webserver()?.get(keys::MIME)?.as_str()
    }

    pub fn response_type(&self) -> Option<&str> {
        self.webserver()?.get(keys::INDEX)?.as_str()
    }

    pub fn content(&self) -> Option<&str> {
        self.cms()?.get(keys::CONTENT)?.as_str()
    }

    pub fn blob_content(&self) -> Option<Vec<u8>> {
        let encoded = self.cms()?.get(keys::BLOB_CONTENT)?.as_str()?;
        base64::engine::general_purpose::STANDARD.decode(encoded).ok()
    }

    pub fn file_path(&self) -> Option<&str> {
        self.webserver()?.get(keys::FILE_PATH)?.as_str()
    }

    /// Extra headers from `cms.http`.
    pub fn headers(&self) -> Vec<(String, String)> {
        let Some(Value::Object(http)) = self.cms().and_then(|cms| cms.get(keys::HTTP)) else {
            return Vec::new();
        };
        http.iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect()
    }

    /// Serialized form for byte-oriented transports.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.body).unwrap_or_default()
    }
}

/// Assemble a response envelope, optionally merging into the request's cms
/// object so request fields survive into the response document.
pub fn build(
    template: Option<Value>,
    response_type: &str,
    status_code: &str,
    mime_type: &str,
    content: Content,
    headers: &HashMap<String, Vec<String>>,
) -> ResponseEnvelope {
    let mut body = match template {
        Some(Value::Object(map)) => Value::Object(map),
        _ => json!({}),
    };

    if !matches!(body.get(keys::CMS), Some(Value::Object(_))) {
        body[keys::CMS] = json!({});
    }
    let cms = body
        .get_mut(keys::CMS)
        .and_then(Value::as_object_mut)
        .expect("cms object just ensured");

    let mut webserver = Map::new();
    webserver.insert(keys::INDEX.into(), json!(response_type));
    webserver.insert(keys::HEADER_CODE.into(), json!(status_code));
    webserver.insert(keys::MIME.into(), json!(mime_type));

    match content {
        Content::Text(text) => {
            cms.insert(keys::CONTENT.into(), json!(text));
        }
        Content::Blob(bytes) => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
            cms.insert(keys::BLOB_CONTENT.into(), json!(encoded));
        }
        Content::FilePath(path) => {
            webserver.insert(keys::FILE_PATH.into(), json!(path));
        }
    }
    cms.insert(keys::WEB_SERVER.into(), Value::Object(webserver));

    if !headers.is_empty() {
        let http_entry = cms.entry(keys::HTTP).or_insert_with(|| json!({}));
        if !http_entry.is_object() {
            *http_entry = json!({});
        }
        let http = http_entry.as_object_mut().expect("cms.http just ensured");
        for (name, values) in headers {
            let joined = match http.get(name).and_then(Value::as_str) {
                Some(existing) => format!("{existing},{}", values.join(",")),
                None => values.join(","),
            };
            http.insert(name.clone(), json!(joined));
        }
    }

    ResponseEnvelope { body }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_text_response() {
        let envelope = build(
            None,
            response_type::RENDERED,
            status::OK,
            mime::JSON,
            Content::Text("{\"ok\":true}".into()),
            &HashMap::new(),
        );
        assert_eq!(envelope.header_code(), "200 Ok");
        assert_eq!(envelope.status(), 200);
        assert_eq!(envelope.mime(), Some(mime::JSON));
        assert_eq!(envelope.content(), Some("{\"ok\":true}"));
        assert!(envelope.blob_content().is_none());
    }

    #[test]
    fn blob_round_trips_through_base64() {
        let payload = vec![0u8, 159, 146, 150];
        let envelope = build(
            None,
            response_type::RENDERED,
            status::OK,
            mime::OCTET_STREAM,
            Content::Blob(payload.clone()),
            &HashMap::new(),
        );
        assert_eq!(envelope.blob_content(), Some(payload));
        assert!(envelope.content().is_none());
    }

    #[test]
    fn custom_headers_collapse_comma_separated() {
        let mut headers = HashMap::new();
        headers.insert("Set-Cookie".to_string(), vec!["a=1".to_string(), "b=2".to_string()]);
        let envelope = build(
            None,
            response_type::RENDERED,
            status::OK,
            mime::HTML,
            Content::Text("ok".into()),
            &headers,
        );
        let pairs = envelope.headers();
        assert_eq!(pairs, vec![("Set-Cookie".to_string(), "a=1,b=2".to_string())]);
    }

    #[test]
    fn template_request_fields_survive() {
        let template = serde_json::json!({"cms": {"request": {"url": "api/users/42"}}});
        let envelope = build(
            Some(template),
            response_type::RENDERED,
            status::OK,
            mime::JSON,
            Content::Text("{}".into()),
            &HashMap::new(),
        );
        assert_eq!(
            envelope.body["cms"]["request"]["url"],
            serde_json::json!("api/users/42")
        );
    }
}
