//! AgentCore Code Interpreter data plane.

use std::pin::Pin;

use futures::{Stream, StreamExt};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::client::{SignedClient, agentcore_endpoint};
use crate::error::PlatformError;
use crate::eventstream;

const SESSION_HEADER: &str = "x-amzn-code-interpreter-session-id";

/// One event emitted while a tool invocation runs.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpreterEvent {
    /// The `:event-type` header, usually `result`.
    pub event_type: String,
    pub payload: Value,
}

pub type InterpreterEventStream =
    Pin<Box<dyn Stream<Item = Result<InterpreterEvent, PlatformError>> + Send>>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartSessionResponse {
    session_id: String,
}

#[derive(Debug, Clone)]
pub struct CodeInterpreterClient {
    client: SignedClient,
    endpoint: String,
}

impl CodeInterpreterClient {
    pub fn new(client: SignedClient) -> Self {
        let endpoint = agentcore_endpoint(client.region());
        Self { client, endpoint }
    }

    fn base(&self, identifier: &str) -> String {
        format!(
            "{}/code-interpreters/{}",
            self.endpoint,
            urlencoding::encode(identifier)
        )
    }

    /// Start a sandbox session and return its id.
    pub async fn start_session(
        &self,
        identifier: &str,
        timeout_secs: u64,
    ) -> Result<String, PlatformError> {
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
        info!(interpreter = identifier, session_id = %response.session_id, "Code interpreter session started");
        Ok(response.session_id)
    }

    /// Invoke a sandbox tool (for example `executeCode`) and stream its events.
    pub async fn invoke(
        &self,
        identifier: &str,
        session_id: &str,
        name: &str,
        arguments: Value,
    ) -> Result<InterpreterEventStream, PlatformError> {
        let body = json!({ "name": name, "arguments": arguments });
        let response = self
            .client
            .send(
                Method::POST,
                &format!("{}/tools/invoke", self.base(identifier)),
                Some(&body),
                &[(SESSION_HEADER, session_id.to_string())],
            )
            .await?;
        debug!(interpreter = identifier, session_id, tool = name, "Streaming interpreter events");

        let events = eventstream::frames(response).map(
            |frame| -> Result<InterpreterEvent, PlatformError> {
                let frame = frame?.into_result()?;
                let event_type = frame.event_type().unwrap_or("result").to_string();
                let payload = if frame.payload.is_empty() {
                    Value::Null
                } else {
                    serde_json::from_slice(&frame.payload)
                        .map_err(|e| PlatformError::Decode(format!("{event_type} event: {e}")))?
                };
                Ok(InterpreterEvent {
                    event_type,
                    payload,
                })
            },
        );
        Ok(events.boxed())
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
                &[(SESSION_HEADER, session_id.to_string())],
            )
            .await?;
        info!(interpreter = identifier, session_id, "Code interpreter session stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{Credentials, StaticCredentials};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn urls_are_scoped_to_the_interpreter() {
        let client = SignedClient::new(
            "us-east-1",
            "bedrock-agentcore",
            Arc::new(StaticCredentials(Credentials::new("a", "b", None))),
            Duration::from_secs(1),
        )
        .unwrap();
        let ci = CodeInterpreterClient::new(client);
        assert_eq!(
            ci.base("aws.codeinterpreter.v1"),
            "https://bedrock-agentcore.us-east-1.amazonaws.com/code-interpreters/aws.codeinterpreter.v1"
        );
    }
}
