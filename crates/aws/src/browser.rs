//! AgentCore Browser data plane.
//!
//! A browser session exposes a Chrome DevTools automation websocket. The
//! upgrade request must be SigV4-signed like any other call, so this client
//! hands back the URL together with the headers to attach.

use reqwest::{Method, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::client::{SignedClient, agentcore_endpoint};
use crate::error::PlatformError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserSessionInfo {
    pub session_id: String,
    /// Automation stream URL reported by the service, when present.
    pub automation_endpoint: Option<String>,
}

/// A signed websocket target.
#[derive(Debug, Clone)]
pub struct AutomationEndpoint {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartSessionResponse {
    session_id: String,
    #[serde(default)]
    streams: Option<Streams>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Streams {
    automation_stream: Option<StreamInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamInfo {
    stream_endpoint: String,
}

#[derive(Debug, Clone)]
pub struct BrowserClient {
    client: SignedClient,
    endpoint: String,
}

impl BrowserClient {
    pub fn new(client: SignedClient) -> Self {
        let endpoint = agentcore_endpoint(client.region());
        Self { client, endpoint }
    }

    fn base(&self, identifier: &str) -> String {
        format!("{}/browsers/{}", self.endpoint, urlencoding::encode(identifier))
    }

    pub async fn start_session(
        &self,
        identifier: &str,
        timeout_secs: u64,
    ) -> Result<BrowserSessionInfo, PlatformError> {
        let body = json!({ "sessionTimeoutSeconds": timeout_secs });
        let response: StartSessionResponse = self
            .client
            .send_json(
                Method::PUT,
                &format!("{}/sessions/start", self.base(identifier)),
                Some(&body),
                &[],
            )
            .await?;
        info!(browser = identifier, session_id = %response.session_id, "Browser session started");
        Ok(BrowserSessionInfo {
            session_id: response.session_id,
            automation_endpoint: response
                .streams
                .and_then(|s| s.automation_stream)
                .map(|s| s.stream_endpoint),
        })
    }

    /// Build the signed automation websocket target for a session.
    pub async fn automation_endpoint(
        &self,
        identifier: &str,
        session: &BrowserSessionInfo,
    ) -> Result<AutomationEndpoint, PlatformError> {
        let ws_url = match &session.automation_endpoint {
            Some(url) => url.clone(),
            None => format!(
                "{}/browser-streams/{}/sessions/{}/automation",
                self.endpoint.replacen("https://", "wss://", 1),
                urlencoding::encode(identifier),
                urlencoding::encode(&session.session_id)
            ),
        };
        // The signature covers the https form of the same request.
        let signing_url = Url::parse(&ws_url.replacen("wss://", "https://", 1))
            .map_err(|e| PlatformError::InvalidUrl(format!("{ws_url}: {e}")))?;
        let headers = self.client.sign("GET", &signing_url, &[], b"").await?;
        Ok(AutomationEndpoint {
            url: ws_url,
            headers,
        })
    }

    pub async fn stop_session(&self, identifier: &str, session_id: &str) -> Result<(), PlatformError> {
        self.client
            .send(
                Method::PUT,
                &format!(
                    "{}/sessions/stop?sessionId={}",
                    self.base(identifier),
                    urlencoding::encode(session_id)
                ),
                None,
                &[],
            )
            .await?;
        info!(browser = identifier, session_id, "Browser session stopped");
        Ok(())
    }
}
