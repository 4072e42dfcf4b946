//! The shared signed request path.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::credentials::CredentialsProvider;
use crate::error::PlatformError;
use crate::sigv4::{self, SigningParams};

/// Base URL of the AgentCore data plane.
pub fn agentcore_endpoint(region: &str) -> String {
    format!("https://bedrock-agentcore.{region}.amazonaws.com")
}

/// Base URL of the Bedrock model runtime.
pub fn bedrock_runtime_endpoint(region: &str) -> String {
    format!("https://bedrock-runtime.{region}.amazonaws.com")
}

/// A `reqwest` client that signs every request for one service and region.
#[derive(Clone)]
pub struct SignedClient {
    http: reqwest::Client,
    credentials: Arc<dyn CredentialsProvider>,
    region: String,
    service: String,
}

impl SignedClient {
    pub fn new(
        region: impl Into<String>,
        service: impl Into<String>,
        credentials: Arc<dyn CredentialsProvider>,
        timeout: Duration,
    ) -> Result<Self, PlatformError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PlatformError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            credentials,
            region: region.into(),
            service: service.into(),
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Sign a request without sending it. Used for websocket upgrades.
    pub async fn sign(
        &self,
        method: &str,
        url: &Url,
        headers: &[(String, String)],
        payload: &[u8],
    ) -> Result<Vec<(String, String)>, PlatformError> {
        let credentials = self.credentials.credentials().await?;
        sigv4::sign(
            method,
            url,
            headers,
            payload,
            &credentials,
            &SigningParams {
                region: &self.region,
                service: &self.service,
                time: Utc::now(),
            },
        )
    }

    /// Sign and send a request with a raw body. The status is not checked.
    pub async fn execute(
        &self,
        method: Method,
        url: &str,
        body: Option<Vec<u8>>,
        headers: &[(&str, String)],
    ) -> Result<reqwest::Response, PlatformError> {
        let url = Url::parse(url).map_err(|e| PlatformError::InvalidUrl(format!("{url}: {e}")))?;
        let headers: Vec<(String, String)> = headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let payload = body.unwrap_or_default();
        let auth = self.sign(method.as_str(), &url, &headers, &payload).await?;

        debug!(method = %method, url = %url, service = %self.service, "Sending signed request");

        let mut request = self.http.request(method, url);
        for (name, value) in headers.iter().chain(auth.iter()) {
            request = request.header(name.as_str(), value.as_str());
        }
        if !payload.is_empty() {
            request = request.body(payload);
        }
        request.send().await.map_err(PlatformError::from_reqwest)
    }

    /// Send a signed request and return the response if the status is 2xx.
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
        extra_headers: &[(&str, String)],
    ) -> Result<reqwest::Response, PlatformError> {
        let payload = body
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| PlatformError::Decode(format!("failed to encode body: {e}")))?;
        let mut headers = extra_headers.to_vec();
        if payload.is_some() {
            headers.push(("content-type", "application/json".to_string()));
        }

        let response = self.execute(method, url, payload, &headers).await?;
        error_for_status(response).await
    }

    /// Send a signed request and decode the JSON response.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
        extra_headers: &[(&str, String)],
    ) -> Result<T, PlatformError> {
        let response = self.send(method, url, body, extra_headers).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| PlatformError::Decode(e.to_string()))
    }
}

/// Map a non-2xx response into [`PlatformError`], keeping the body.
pub async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, PlatformError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PlatformError::from_status(status.as_u16(), body))
}

impl std::fmt::Debug for SignedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedClient")
            .field("region", &self.region)
            .field("service", &self.service)
            .finish()
    }
}
