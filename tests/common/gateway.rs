//! In-process storage gateway built on wiremock
//!
//! Serves the upload envelope API and ranged downloads for a single object, and
//! keeps every uploaded part so tests can compare what arrived.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use cloud_transfer::{Config, EndpointConfig};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

/// Upload ID handed out by the init call
pub const UPLOAD_ID: &str = "gw-upload-1";

/// Bearer token the gateway accepts
pub const TOKEN: &str = "integration-token";

/// Running gateway plus the parts it received
pub struct Gateway {
    pub server: MockServer,
    pub parts: Arc<Mutex<BTreeMap<u32, Vec<u8>>>>,
}

impl Gateway {
    /// Start a gateway serving `object` for downloads
    pub async fn start(object: Vec<u8>) -> Self {
        Self::start_with(object, true).await
    }

    /// Start a gateway that answers ranged requests with the whole object
    pub async fn start_ignoring_ranges(object: Vec<u8>) -> Self {
        Self::start_with(object, false).await
    }

    async fn start_with(object: Vec<u8>, honor_ranges: bool) -> Self {
        let server = MockServer::start().await;
        let parts = Arc::new(Mutex::new(BTreeMap::new()));

        Mock::given(method("POST"))
            .and(path("/fu/upload/multipart/init"))
            .and(header("authorization", format!("Bearer {TOKEN}").as_str()))
            .respond_with(envelope(serde_json::json!(UPLOAD_ID)))
            .mount(&server)
            .await;

        let received = parts.clone();
        Mock::given(method("POST"))
            .and(path("/fu/upload/multipart/part"))
            .respond_with(move |request: &Request| {
                let Some(part) = query(request, "partNumber").and_then(|p| p.parse::<u32>().ok()) else {
                    return ResponseTemplate::new(400);
                };
                if query(request, "uploadId").as_deref() != Some(UPLOAD_ID) {
                    return ResponseTemplate::new(404);
                }
                received.lock().unwrap().insert(part, request.body.clone());
                envelope(serde_json::Value::Null)
            })
            .mount(&server)
            .await;

        let assembled = parts.clone();
        Mock::given(method("POST"))
            .and(path("/fu/upload/multipart/complete"))
            .respond_with(move |_: &Request| {
                if assembled.lock().unwrap().is_empty() {
                    return ResponseTemplate::new(200).set_body_json(serde_json::json!({
                        "code": 404,
                        "msg": "no parts found for upload",
                        "data": null,
                    }));
                }
                envelope(serde_json::json!("file assembled"))
            })
            .mount(&server)
            .await;

        let ranged = object.clone();
        Mock::given(method("GET"))
            .and(path("/fd/download/multipart_download"))
            .respond_with(move |request: &Request| {
                if !honor_ranges {
                    return ResponseTemplate::new(200).set_body_bytes(ranged.clone());
                }
                let range = request
                    .headers
                    .get("range")
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_range);
                match range {
                    Some((start, end)) if end < ranged.len() && start <= end => {
                        ResponseTemplate::new(206).set_body_bytes(ranged[start..=end].to_vec())
                    }
                    _ => ResponseTemplate::new(416),
                }
            })
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/fd/download/file"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(object))
            .mount(&server)
            .await;

        Self { server, parts }
    }

    /// Configuration pointing at this gateway with fast retries
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.endpoint = EndpointConfig {
            base_url: self.server.uri(),
            ..EndpointConfig::default()
        };
        config.retry.initial_delay = std::time::Duration::from_millis(1);
        config.retry.max_delay = std::time::Duration::from_millis(5);
        config.retry.jitter = false;
        config
    }

    /// Parts received so far, concatenated in part-number order
    pub fn assembled(&self) -> Vec<u8> {
        self.parts.lock().unwrap().values().flatten().copied().collect()
    }
}

/// Successful JSON envelope around `data`
pub fn envelope(data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "code": 200,
        "msg": "success",
        "data": data,
        "timestamp": 1_700_000_000_000u64,
    }))
}

/// Deterministic payload of `len` bytes
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn query(request: &Request, key: &str) -> Option<String> {
    request
        .url
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// Parse `bytes=start-end` (inclusive)
fn parse_range(value: &str) -> Option<(usize, usize)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}
