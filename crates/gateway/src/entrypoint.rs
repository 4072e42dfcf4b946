//! In-process entrypoint for hosts that hand over a JSON payload directly.

use serde_json::{Value, json};
use tracing::warn;

use crate::GatewayState;
use crate::invocation::{InvocationRequest, invoke};

/// Same payload shapes as `POST /invocations`; returns `{"response": ...}`.
pub async fn entrypoint(state: &GatewayState, payload: Value) -> Value {
    let request: InvocationRequest = match serde_json::from_value(payload) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Malformed entrypoint payload");
            return json!({ "response": format!("An error occurred: invalid payload: {e}") });
        }
    };
    let response = invoke(state, request).await;
    json!({ "response": response.output.response })
}
