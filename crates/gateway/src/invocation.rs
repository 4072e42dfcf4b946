//! The invocation contract: request shapes, response envelope, and the
//! handler logic shared by HTTP and the in-process entrypoint.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info};
use uuid::Uuid;

use crate::GatewayState;

/// Accepts `{input: {prompt, actor_id?}, session_id?}` as well as the
/// flattened `{prompt, session_id?, actor_id?}`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct InvocationRequest {
    #[serde(default)]
    pub input: Option<InvocationInput>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub actor_id: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct InvocationInput {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub actor_id: Option<String>,
    /// Anything else the caller put in `input`; accepted and ignored.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InvocationRequest {
    /// The prompt, `""` when absent.
    pub fn prompt(&self) -> &str {
        self.input
            .as_ref()
            .and_then(|i| i.prompt.as_deref())
            .or(self.prompt.as_deref())
            .unwrap_or_default()
    }

    pub fn actor_id(&self) -> Option<&str> {
        self.input
            .as_ref()
            .and_then(|i| i.actor_id.as_deref())
            .or(self.actor_id.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResponse {
    pub output: InvocationOutput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationOutput {
    pub response: String,
    /// Present only when the invocation failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub kind: String,
    pub message: String,
}

/// Run one invocation. Never fails: errors become the in-band envelope.
pub async fn invoke(state: &GatewayState, request: InvocationRequest) -> InvocationResponse {
    let prompt = request.prompt();
    info!(
        prompt_len = prompt.len(),
        session_id = request.session_id.as_deref().unwrap_or("none"),
        "Invocation received"
    );

    let timeout = state.invocation_timeout;
    let outcome = tokio::time::timeout(timeout, run(state, &request, prompt))
        .await
        .unwrap_or_else(|_| {
            Err(handson_core::Error::Timeout {
                operation: "invocation".into(),
                timeout_secs: timeout.as_secs(),
            })
        });

    let output = match outcome {
        Ok(response) => InvocationOutput {
            response,
            error: None,
        },
        Err(e) => {
            error!(error = ?e, "Invocation failed");
            InvocationOutput {
                response: format!("An error occurred: {e}"),
                error: Some(ErrorDescriptor {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                }),
            }
        }
    };

    InvocationResponse {
        output,
        session_id: request.session_id,
    }
}

async fn run(
    state: &GatewayState,
    request: &InvocationRequest,
    prompt: &str,
) -> handson_core::Result<String> {
    let factory = &state.factory;
    let key = if factory.memory_enabled() {
        // A missing session id gets a throwaway one; it is not echoed back.
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let actor_id = request.actor_id().unwrap_or(&state.default_actor_id);
        factory.session_key(&session_id, actor_id)?
    } else {
        None
    };
    factory.invoke(prompt, key.as_ref()).await
}
