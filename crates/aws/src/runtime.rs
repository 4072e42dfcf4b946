//! Invoking a deployed agent runtime.

use reqwest::Method;
use serde_json::Value;
use tracing::info;

use crate::client::{SignedClient, agentcore_endpoint};
use crate::error::PlatformError;

const SESSION_HEADER: &str = "X-Amzn-Bedrock-AgentCore-Runtime-Session-Id";

/// Runtime session ids must be at least 33 characters.
pub const MIN_RUNTIME_SESSION_ID_LEN: usize = 33;

/// A fresh id long enough for the runtime: `session-` plus a simple uuid.
pub fn new_runtime_session_id() -> String {
    format!("session-{}", uuid::Uuid::new_v4().simple())
}

#[derive(Debug, Clone)]
pub struct RuntimeClient {
    client: SignedClient,
    endpoint: String,
}

impl RuntimeClient {
    pub fn new(client: SignedClient) -> Self {
        let endpoint = agentcore_endpoint(client.region());
        Self { client, endpoint }
    }

    /// POST a payload to a runtime and return the response body as text.
    pub async fn invoke(
        &self,
        runtime_arn: &str,
        session_id: &str,
        qualifier: &str,
        payload: &Value,
    ) -> Result<String, PlatformError> {
        if session_id.len() < MIN_RUNTIME_SESSION_ID_LEN {
            return Err(PlatformError::InvalidRequest(format!(
                "runtime session id must be at least {MIN_RUNTIME_SESSION_ID_LEN} characters"
            )));
        }
        let url = format!(
            "{}/runtimes/{}/invocations?qualifier={}",
            self.endpoint,
            urlencoding::encode(runtime_arn),
            urlencoding::encode(qualifier)
        );
        info!(runtime_arn, session_id, qualifier, "Invoking agent runtime");
        let response = self
            .client
            .send(
                Method::POST,
                &url,
                Some(payload),
                &[(SESSION_HEADER, session_id.to_string())],
            )
            .await?;
        response.text().await.map_err(PlatformError::from_reqwest)
    }
}
