//! HTTP implementation of [`TransferTransport`] against the storage gateway.
//!
//! Upload calls go to `{base}{upload_prefix}/upload/multipart/*` and answer with the
//! JSON envelope `{code, msg, data, timestamp}`. Download calls go to
//! `{base}{download_prefix}/download/*` and answer with raw bytes.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, RANGE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{ProgressCallback, TransferTransport};
use crate::config::EndpointConfig;
use crate::credentials::CredentialProvider;
use crate::error::{Error, Result};
use crate::planner::ChunkDescriptor;
use crate::types::UploadSession;

/// Granularity of upload progress reports
const UPLOAD_SLICE_BYTES: usize = 64 * 1024;

/// Envelope code for success
const ENVELOPE_OK: i64 = 200;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    msg: Option<String>,
    data: Option<T>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitRequest<'a> {
    bucket_name: &'a str,
    object_name: &'a str,
    content_type: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteRequest<'a> {
    bucket_name: &'a str,
    object_name: &'a str,
    upload_id: &'a str,
    content_type: &'a str,
}

/// [`TransferTransport`] over HTTP using `reqwest`
///
/// Cloning shares the underlying connection pool.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    upload_base: String,
    download_base: String,
    range_requests: bool,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpTransport {
    /// Create a transport for `endpoint` with a default HTTP client
    ///
    /// # Errors
    /// Returns an error if the base URL is malformed or the client cannot be built
    pub fn new(endpoint: &EndpointConfig, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("cloud-transfer/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Self::with_client(client, endpoint, credentials)
    }

    /// Create a transport reusing an existing HTTP client
    pub fn with_client(
        client: reqwest::Client,
        endpoint: &EndpointConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        url::Url::parse(&endpoint.base_url)?;
        let base = endpoint.base_url.trim_end_matches('/');

        Ok(Self {
            client,
            upload_base: format!("{}{}", base, endpoint.upload_prefix.trim_end_matches('/')),
            download_base: format!("{}{}", base, endpoint.download_prefix.trim_end_matches('/')),
            range_requests: endpoint.range_requests,
            credentials,
        })
    }

    fn upload_url(&self, path: &str) -> String {
        format!("{}/upload/multipart/{}", self.upload_base, path)
    }

    fn download_url(&self, path: &str) -> String {
        format!("{}/download/{}", self.download_base, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let request = match self.credentials.bearer_token().await {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await?;
        self.check_status(response).await
    }

    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            let refreshable = self.credentials.invalidate().await;
            return Err(Error::Unauthorized {
                message: format!("{} rejected the bearer token", response.url().path()),
                refreshable,
            });
        }
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<Envelope<serde_json::Value>>(&body) {
            Ok(Envelope { msg: Some(msg), .. }) => msg,
            _ if body.is_empty() => status.to_string(),
            _ => body,
        };
        Err(Error::Transport {
            status: Some(status.as_u16()),
            message,
        })
    }

    /// Decode a JSON envelope; a non-200 code is a rejection carrying `msg`
    async fn read_envelope<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<Envelope<T>> {
        let envelope: Envelope<T> = response.json().await?;
        if envelope.code == ENVELOPE_OK {
            return Ok(envelope);
        }

        let message = envelope
            .msg
            .unwrap_or_else(|| format!("backend returned code {}", envelope.code));
        if envelope.code == i64::from(StatusCode::UNAUTHORIZED.as_u16()) {
            let refreshable = self.credentials.invalidate().await;
            return Err(Error::Unauthorized { message, refreshable });
        }
        Err(Error::Transport {
            status: u16::try_from(envelope.code).ok(),
            message,
        })
    }
}

/// Read a response body incrementally, reporting the bytes received so far
async fn read_body(response: reqwest::Response, capacity: usize, progress: &ProgressCallback) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(capacity);
    let mut stream = response.bytes_stream();
    while let Some(piece) = stream.next().await {
        let piece = piece?;
        buf.extend_from_slice(&piece);
        progress(buf.len() as u64);
    }
    Ok(buf.freeze())
}

/// Request body that reports progress as slices are handed to the connection
fn progress_body(data: Bytes, progress: ProgressCallback) -> reqwest::Body {
    if data.is_empty() {
        return reqwest::Body::from(data);
    }

    let slices: Vec<Bytes> = (0..data.len())
        .step_by(UPLOAD_SLICE_BYTES)
        .map(|start| data.slice(start..(start + UPLOAD_SLICE_BYTES).min(data.len())))
        .collect();

    let mut sent = 0u64;
    let stream = futures::stream::iter(slices.into_iter().map(Ok::<Bytes, std::io::Error>)).inspect(
        move |slice| {
            if let Ok(slice) = slice {
                sent += slice.len() as u64;
                progress(sent);
            }
        },
    );
    reqwest::Body::wrap_stream(stream)
}

#[async_trait]
impl TransferTransport for HttpTransport {
    async fn init_multipart_upload(
        &self,
        bucket_name: &str,
        object_name: &str,
        content_type: &str,
    ) -> Result<UploadSession> {
        let request = self.client.post(self.upload_url("init")).json(&InitRequest {
            bucket_name,
            object_name,
            content_type,
        });
        let response = self.send(request).await?;
        let envelope: Envelope<String> = self.read_envelope(response).await?;

        let upload_id = envelope
            .data
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::Transport {
                status: None,
                message: "init response carried no upload id".to_string(),
            })?;

        tracing::debug!(bucket = bucket_name, object = object_name, upload_id = %upload_id, "upload session opened");

        Ok(UploadSession {
            upload_id,
            bucket_name: bucket_name.to_string(),
            object_name: object_name.to_string(),
            content_type: content_type.to_string(),
        })
    }

    async fn upload_part(
        &self,
        session: &UploadSession,
        part_number: u32,
        data: Bytes,
        progress: ProgressCallback,
    ) -> Result<()> {
        let part = part_number.to_string();
        let length = data.len();
        let request = self
            .client
            .post(self.upload_url("part"))
            .query(&[
                ("bucketName", session.bucket_name.as_str()),
                ("objectName", session.object_name.as_str()),
                ("uploadId", session.upload_id.as_str()),
                ("partNumber", part.as_str()),
            ])
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, length)
            .body(progress_body(data, progress));

        let response = self.send(request).await?;
        self.read_envelope::<serde_json::Value>(response).await?;
        Ok(())
    }

    async fn upload_complete(&self, session: &UploadSession) -> Result<Option<String>> {
        let request = self.client.post(self.upload_url("complete")).json(&CompleteRequest {
            bucket_name: &session.bucket_name,
            object_name: &session.object_name,
            upload_id: &session.upload_id,
            content_type: &session.content_type,
        });
        let response = self.send(request).await?;
        let envelope: Envelope<serde_json::Value> = self.read_envelope(response).await?;

        // The confirmation text arrives in `data` on success
        Ok(match envelope.data {
            Some(serde_json::Value::String(message)) => Some(message),
            _ => envelope.msg,
        })
    }

    async fn download_part(
        &self,
        bucket_name: &str,
        object_name: &str,
        chunk: &ChunkDescriptor,
        progress: ProgressCallback,
    ) -> Result<Bytes> {
        if chunk.is_empty() {
            return Ok(Bytes::new());
        }

        let request = self
            .client
            .get(self.download_url("multipart_download"))
            .query(&[("bucket", bucket_name), ("object", object_name)])
            .header(RANGE, chunk.range_header());
        let response = self.send(request).await?;

        // A 200 carries the whole object; only a lone chunk starting at 0 may accept it
        if response.status() != StatusCode::PARTIAL_CONTENT
            && !(chunk.start_offset == 0 && response.content_length() == Some(chunk.size_bytes))
        {
            return Err(Error::RangeNotHonored {
                index: chunk.index,
                status: response.status().as_u16(),
            });
        }

        let body = read_body(response, chunk.size_bytes as usize, &progress).await?;
        if body.len() as u64 != chunk.size_bytes {
            return Err(Error::LengthMismatch {
                index: chunk.index,
                expected: chunk.size_bytes,
                actual: body.len() as u64,
            });
        }
        Ok(body)
    }

    async fn download_file(
        &self,
        bucket_name: &str,
        object_name: &str,
        progress: ProgressCallback,
    ) -> Result<Bytes> {
        let request = self
            .client
            .get(self.download_url("file"))
            .query(&[("bucket", bucket_name), ("object", object_name)]);
        let response = self.send(request).await?;
        let capacity = response.content_length().unwrap_or(0) as usize;
        read_body(response, capacity, &progress).await
    }

    fn supports_range_requests(&self) -> bool {
        self.range_requests
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("upload_base", &self.upload_base)
            .field("download_base", &self.download_base)
            .field("range_requests", &self.range_requests)
            .finish_non_exhaustive()
    }
}
