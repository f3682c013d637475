//! Recognition/persistence API client.
//!
//! Every endpoint answers with a `{success, message, ...}` envelope. The backend
//! also uses non-2xx statuses for business failures, so an envelope that parses
//! is returned to the caller whatever the status; only an unreadable body on a
//! non-2xx status is a transport failure.

use crate::types::{
    AttendanceEnvelope, AttendanceRequest, Envelope, HealthStatus, RecordsEnvelope,
    RegisterRequest, StudentsEnvelope,
};
use attend_hw::CapturedFrame;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Default API root used by the original deployment.
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
    /// The server answered `success: false`.
    #[error("{0}")]
    Rejected(String),
}

/// Calls the workflow and report engine make against the backend.
#[allow(async_fn_in_trait)]
pub trait RecognitionApi {
    async fn health(&self) -> Result<HealthStatus, ApiError>;
    async fn register(&self, request: &RegisterRequest) -> Result<Envelope, ApiError>;
    async fn mark_attendance(
        &self,
        request: &AttendanceRequest,
    ) -> Result<AttendanceEnvelope, ApiError>;
    async fn reports(&self) -> Result<RecordsEnvelope, ApiError>;
    async fn students(&self) -> Result<StudentsEnvelope, ApiError>;
}

/// `reqwest`-backed [`RecognitionApi`].
#[derive(Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpApi {
    /// Create a client with a 30 second request timeout.
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    /// Create a client with a custom per-request timeout.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.endpoint(path);
        tracing::debug!(%url, "GET");
        let resp = self.client.get(&url).send().await?;
        read_envelope(resp).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = self.endpoint(path);
        tracing::debug!(%url, "POST");
        let resp = self.client.post(&url).json(body).send().await?;
        read_envelope(resp).await
    }
}

impl RecognitionApi for HttpApi {
    async fn health(&self) -> Result<HealthStatus, ApiError> {
        self.get("health").await
    }

    async fn register(&self, request: &RegisterRequest) -> Result<Envelope, ApiError> {
        self.post("register", request).await
    }

    async fn mark_attendance(
        &self,
        request: &AttendanceRequest,
    ) -> Result<AttendanceEnvelope, ApiError> {
        self.post("attendance", request).await
    }

    async fn reports(&self) -> Result<RecordsEnvelope, ApiError> {
        self.get("reports").await
    }

    async fn students(&self) -> Result<StudentsEnvelope, ApiError> {
        self.get("students").await
    }
}

async fn read_envelope<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ApiError> {
    let status = resp.status().as_u16();
    let body = resp.bytes().await?;
    parse_envelope(status, &body)
}

/// Decode a response body, keeping server envelopes on error statuses.
pub fn parse_envelope<T: DeserializeOwned>(status: u16, body: &[u8]) -> Result<T, ApiError> {
    let success = (200..300).contains(&status);
    match serde_json::from_slice::<T>(body) {
        Ok(value) => {
            if !success {
                tracing::debug!(status, "server envelope on error status");
            }
            Ok(value)
        }
        Err(e) if success => Err(ApiError::Decode(e)),
        Err(_) => Err(ApiError::Status {
            status,
            body: String::from_utf8_lossy(body).chars().take(200).collect(),
        }),
    }
}

/// Encode a captured frame as a `data:image/jpeg;base64,` URL.
pub fn frame_data_url(frame: &CapturedFrame) -> String {
    jpeg_data_url(frame.jpeg())
}

fn jpeg_data_url(jpeg: &[u8]) -> String {
    format!(
        "data:image/jpeg;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(jpeg)
    )
}
