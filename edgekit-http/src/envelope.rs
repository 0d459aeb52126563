//! Canonical request envelope: one axum request becomes a
//! `{"cms": {...}}` document with `request`, `query`, `form`, `cookie`,
//! and `cms` (timestamps, request id) sections. Multipart bodies land in
//! `form` plus a top-level `files` list.

use axum::body::Body;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::request::Parts;
use base64::Engine;
use serde_json::{json, Map, Value};

use edgekit_core::context::envelope::keys;

/// Merge a value into `cms[section][name]`; repeated names accumulate into
/// arrays.
fn add_value(cms: &mut Map<String, Value>, section: &str, name: &str, value: Value) {
    let section = cms
        .entry(section.to_string())
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .expect("envelope sections are objects");
    match section.get_mut(name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = json!([first, value]);
        }
        None => {
            section.insert(name.to_string(), value);
        }
    }
}

fn add_str(cms: &mut Map<String, Value>, section: &str, name: &str, value: impl Into<String>) {
    add_value(cms, section, name, Value::String(value.into()));
}

/// Build the envelope sections that only need the request head. Used as-is
/// for WebSocket upgrades; ad-hoc requests add the body afterwards.
pub fn document_from_parts(parts: &Parts, client_ip: Option<String>, request_id: u64) -> Value {
    let mut cms = Map::new();

    let method = parts.method.as_str().to_ascii_lowercase();
    add_str(&mut cms, keys::REQUEST, keys::METHOD, method);

    let path = parts.uri.path().trim_start_matches('/').to_string();
    let raw_url = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("")
        .trim_start_matches('/')
        .to_string();
    add_str(&mut cms, keys::REQUEST, keys::URL, path);
    add_str(&mut cms, keys::REQUEST, keys::RAW_URL, raw_url.clone());

    if let Some(query) = parts.uri.query() {
        for (name, value) in form_urlencoded::parse(query.as_bytes()) {
            add_str(&mut cms, keys::QUERY, &name, value.to_string());
        }
    }

    let mut host_value = None;
    for (name, value) in &parts.headers {
        let name = name.as_str().to_ascii_lowercase();
        let Ok(value) = value.to_str() else { continue };
        match name.as_str() {
            "cookie" => {
                for item in value.split(';') {
                    if let Some((cookie_name, cookie_value)) = item.split_once('=') {
                        add_str(
                            &mut cms,
                            keys::COOKIE,
                            cookie_name.trim(),
                            cookie_value.trim(),
                        );
                    }
                }
            }
            "host" => {
                host_value = Some(value.to_string());
                let (host, port) = match value.split_once(':') {
                    Some((host, port)) => (host, Some(port)),
                    None => (value, None),
                };
                add_str(&mut cms, keys::REQUEST, keys::HOST, host);
                add_str(&mut cms, keys::REQUEST, keys::HOST_IP, host);
                if let Some(port) = port {
                    add_str(&mut cms, keys::REQUEST, keys::PORT, port);
                    add_str(&mut cms, keys::REQUEST, keys::HOST_PORT, port);
                } else {
                    add_str(&mut cms, keys::REQUEST, keys::HOST_PORT, "80");
                }
            }
            other => add_str(&mut cms, keys::REQUEST, other, value.trim()),
        }
    }

    let full_url = match &host_value {
        Some(host) => format!("{host}/{raw_url}"),
        None => raw_url,
    };
    add_str(&mut cms, keys::REQUEST, keys::FULL_URL, full_url);
    add_str(
        &mut cms,
        keys::REQUEST,
        keys::CLIENT_IP,
        client_ip.unwrap_or_else(|| "unknown".to_string()),
    );
    add_str(&mut cms, keys::REQUEST, keys::REQUEST_ID, request_id.to_string());

    let now = chrono::Local::now();
    add_str(&mut cms, keys::CMS, "date", now.format("%d/%m/%Y").to_string());
    add_str(&mut cms, keys::CMS, "time", now.format("%H:%M").to_string());
    add_str(&mut cms, keys::CMS, "date2", now.format("%Y%m%d").to_string());
    add_str(&mut cms, keys::CMS, "time2", now.format("%H%M%S").to_string());
    add_str(&mut cms, keys::CMS, "date3", now.format("%Y.%m.%d").to_string());

    json!({ keys::CMS: Value::Object(cms) })
}

/// Build the full envelope, consuming the request body.
pub async fn document_from_request(req: Request, client_ip: Option<String>, request_id: u64) -> Value {
    let content_type = req
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    if content_type.starts_with("multipart/") {
        let (parts, body) = req.into_parts();
        let mut document = document_from_parts(&parts, client_ip, request_id);
        let req = Request::from_parts(parts, body);
        read_multipart(req, &mut document).await;
        return document;
    }

    let (parts, body) = req.into_parts();
    let mut document = document_from_parts(&parts, client_ip, request_id);
    let cms = document
        .get_mut(keys::CMS)
        .and_then(Value::as_object_mut)
        .expect("document has a cms object");

    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(error = %err, "failed to read request body");
            return document;
        }
    };
    if bytes.is_empty() {
        add_str(cms, keys::REQUEST, keys::BODY, "");
        return document;
    }

    match String::from_utf8(bytes.to_vec()) {
        Ok(text) => {
            if content_type.starts_with("application/x-www-form-urlencoded") {
                for (name, value) in form_urlencoded::parse(text.as_bytes()) {
                    add_str(cms, keys::FORM, &name, value.to_string());
                }
            }
            add_str(cms, keys::REQUEST, keys::BODY, text);
        }
        Err(_) => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
            add_str(cms, keys::REQUEST, keys::BODY, encoded);
        }
    }
    document
}

async fn read_multipart(req: Request<Body>, document: &mut Value) {
    let cms = document
        .get_mut(keys::CMS)
        .and_then(Value::as_object_mut)
        .expect("document has a cms object");

    let mut multipart = match Multipart::from_request(req, &()).await {
        Ok(multipart) => multipart,
        Err(err) => {
            tracing::warn!(error = %err, "failed to parse multipart body");
            return;
        }
    };

    let mut files = Vec::new();
    let mut part_count = 0usize;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read multipart field");
                break;
            }
        };
        part_count += 1;
        let field_name = field
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("part_{part_count}"));
        let file_name = field.file_name().map(str::to_string);
        let field_content_type = field.content_type().map(str::to_string);

        match file_name {
            Some(file_name) => {
                let Ok(data) = field.bytes().await else { continue };
                files.push(json!({
                    "field": field_name,
                    "name": file_name,
                    "size": data.len(),
                    "content_type": field_content_type.unwrap_or_default(),
                    "content": base64::engine::general_purpose::STANDARD.encode(&data),
                }));
            }
            None => {
                let Ok(text) = field.text().await else { continue };
                add_str(cms, keys::FORM, &field_name, text);
            }
        }
    }

    let file_count = files.len();
    if !files.is_empty() {
        cms.insert(keys::FILES.to_string(), Value::Array(files));
    }
    add_str(
        cms,
        keys::REQUEST,
        keys::BODY,
        format!("[multipart parts={part_count} files={file_count}]"),
    );
}
