//! REST client for the sync API.
//!
//! [`HttpTransport`] implements [`Transport`] over the sync HTTP
//! endpoints using [`reqwest`]. Every request carries the bearer
//! credential supplied by a [`CredentialSource`]; 401/403 responses map to
//! [`TransportError::Unauthorized`] so the session layer can react.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use jobtrail_core::types::{JobId, Seq};
use jobtrail_core::SyncJobSnapshot;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::transport::{ByteStream, LogBatch, Transport, TransportError};

/// Supplies the bearer credential attached to every request.
///
/// Token refresh is the host application's concern; the transport reads
/// the current token before each call.
pub trait CredentialSource: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// A fixed bearer token.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl CredentialSource for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Connection settings for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Base HTTP URL, e.g. `http://localhost:8000/api`.
    pub api_url: String,
    /// Bearer token, if the API needs one.
    pub token: Option<String>,
    /// Whether the server exposes `GET /sync/{jobId}/events`.
    pub stream: bool,
}

impl HttpTransportConfig {
    /// Load settings from environment variables.
    ///
    /// | Env Var           | Default                  |
    /// |-------------------|--------------------------|
    /// | `SYNC_API_URL`    | `http://localhost:8000`  |
    /// | `SYNC_API_TOKEN`  | unset                    |
    /// | `SYNC_API_STREAM` | `false`                  |
    pub fn from_env() -> Self {
        let api_url = std::env::var("SYNC_API_URL")
            .unwrap_or_else(|_| "http://localhost:8000".into())
            .trim_end_matches('/')
            .to_string();

        let token = std::env::var("SYNC_API_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());

        let stream = std::env::var("SYNC_API_STREAM")
            .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "yes"))
            .unwrap_or(false);

        Self {
            api_url,
            token,
            stream,
        }
    }
}

/// Response returned by `POST /sync`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartResponse {
    job_id: JobId,
}

/// HTTP transport for one sync API base URL.
pub struct HttpTransport {
    client: reqwest::Client,
    api_url: String,
    credentials: Option<Arc<dyn CredentialSource>>,
    stream: bool,
}

impl HttpTransport {
    /// Create a transport with its own [`reqwest::Client`].
    pub fn new(config: HttpTransportConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    /// Create a transport reusing an existing [`reqwest::Client`]
    /// (useful for connection pooling with the rest of the host app).
    pub fn with_client(client: reqwest::Client, config: HttpTransportConfig) -> Self {
        let credentials = config
            .token
            .map(|t| Arc::new(StaticToken(t)) as Arc<dyn CredentialSource>);

        Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            credentials,
            stream: config.stream,
        }
    }

    /// Replace the credential source, e.g. with one backed by a session
    /// store that refreshes tokens.
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialSource>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    // ---- private helpers ----

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.credentials.as_ref().and_then(|c| c.bearer_token()) {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or the matching [`TransportError`]
    /// on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(TransportError::Unauthorized {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, TransportError> {
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn start_job(&self) -> Result<JobId, TransportError> {
        let response = self
            .authorize(self.client.post(self.url("/sync")))
            .send()
            .await?;

        let started: StartResponse = Self::parse_response(response).await?;
        Ok(started.job_id)
    }

    async fn get_snapshot(&self, job_id: &str) -> Result<SyncJobSnapshot, TransportError> {
        let response = self
            .authorize(self.client.get(self.url(&format!("/sync/{job_id}/progress"))))
            .send()
            .await?;

        let snapshot: SyncJobSnapshot = Self::parse_response(response).await?;
        Ok(snapshot.normalized())
    }

    async fn get_logs(&self, job_id: &str, after_seq: Seq) -> Result<LogBatch, TransportError> {
        let response = self
            .authorize(self.client.get(self.url(&format!("/sync/{job_id}/logs"))))
            .query(&[("since", after_seq)])
            .send()
            .await?;

        Self::parse_response(response).await
    }

    fn supports_streaming(&self) -> bool {
        self.stream
    }

    async fn open_stream(&self, job_id: &str) -> Result<ByteStream, TransportError> {
        if !self.stream {
            return Err(TransportError::StreamUnsupported);
        }

        let response = self
            .authorize(self.client.get(self.url(&format!("/sync/{job_id}/events"))))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.bytes_stream().map_err(TransportError::from).boxed())
    }

    async fn cancel_job(&self, job_id: &str) -> Result<(), TransportError> {
        let response = self
            .authorize(self.client.post(self.url(&format!("/sync/{job_id}/cancel"))))
            .send()
            .await?;

        Self::ensure_success(response).await?;
        Ok(())
    }
}
