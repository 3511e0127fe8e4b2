//! The single HTTP seam of the client.
//!
//! Everything above this trait (limiting, classification, retries) is
//! transport-agnostic so tests can script responses without a network.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;

/// A method call against the API, before credentials are attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: &'static str,
    pub params: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(method: &'static str) -> Self {
        Self {
            method,
            params: Vec::new(),
        }
    }

    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.params.push((key.to_string(), value.to_string()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(
        &self,
        request: &ApiRequest,
        credential: &str,
    ) -> Result<RawResponse, TransportError>;
}

/// reqwest-backed transport: `GET {base_url}/method/{method}?{params}&v={version}`.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_version: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, api_version: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_version: api_version.into(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(
        &self,
        request: &ApiRequest,
        credential: &str,
    ) -> Result<RawResponse, TransportError> {
        let url = format!("{}/method/{}", self.base_url, request.method);
        let resp = self
            .client
            .get(&url)
            .query(&request.params)
            .query(&[("v", self.api_version.as_str())])
            .bearer_auth(credential)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(map_reqwest_error)?;
        Ok(RawResponse { status, body })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() || err.is_request() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}
