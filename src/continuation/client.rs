//! HTTP client used to follow nextUri and resubmit failed queries.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// A buffered engine response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("client setup failed: {0}")]
    Build(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Transport(e.to_string())
        }
    }
}

/// Outbound calls the continuation poller makes.
#[async_trait]
pub trait QueryEngineClient: Send + Sync {
    /// GET a continuation URI, presenting `host` as the Host header when set.
    async fn get(&self, uri: &str, host: &str) -> Result<EngineResponse, ClientError>;

    /// POST a statement with the given headers.
    async fn submit(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &str,
    ) -> Result<EngineResponse, ClientError>;
}

/// Headers never replayed on a resubmission.
const SKIPPED_HEADERS: [&str; 5] = ["host", "content-length", "transfer-encoding", "connection", "accept-encoding"];

/// reqwest-backed client with per-request timeouts.
#[derive(Clone)]
pub struct HttpQueryEngineClient {
    client: reqwest::Client,
}

impl HttpQueryEngineClient {
    pub fn new(timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ClientError::Build(e.to_string()))?;
        Ok(Self { client })
    }

    async fn buffer(response: reqwest::Response) -> Result<EngineResponse, ClientError> {
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.text().await?;
        Ok(EngineResponse { status, headers, body })
    }
}

#[async_trait]
impl QueryEngineClient for HttpQueryEngineClient {
    async fn get(&self, uri: &str, host: &str) -> Result<EngineResponse, ClientError> {
        let mut request = self.client.get(uri);
        if !host.is_empty() {
            request = request.header(reqwest::header::HOST, host);
        }
        Self::buffer(request.send().await?).await
    }

    async fn submit(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &str,
    ) -> Result<EngineResponse, ClientError> {
        let mut request = self.client.post(url).body(body.to_string());
        for (name, value) in headers {
            if SKIPPED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                continue;
            }
            request = request.header(name.as_str(), value.as_str());
        }
        Self::buffer(request.send().await?).await
    }
}
