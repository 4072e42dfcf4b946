//! Provider trait: the abstraction over the model backend.
//!
//! A Provider sends a conversation (plus the tool definitions the agent may
//! call) to a generative model and returns the model's next message, which is
//! either final text or a batch of tool calls.

use crate::error::ProviderError;
use crate::message::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "global.anthropic.claude-haiku-4-5-20251001-v1:0")
    pub model: String,

    /// The conversation messages; system messages are lifted out by providers
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

fn default_temperature() -> f32 {
    0.7
}

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,

    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated message (text and/or tool calls)
    pub message: Message,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded
    pub model: String,

    /// Why generation stopped ("end_turn", "tool_use", ...), when reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

/// Token usage information.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The core Provider trait.
///
/// Every model backend (Bedrock Converse, the local echo backend, test
/// doubles) implements this trait. The agent loop calls `complete()` without
/// knowing which backend is in use.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "bedrock", "echo").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_request_defaults() {
        let req: ProviderRequest =
            serde_json::from_value(serde_json::json!({"model": "m", "messages": []})).unwrap();
        assert!((req.temperature - 0.7).abs() < f32::EPSILON);
        assert!(req.max_tokens.is_none());
        assert!(req.tools.is_empty());
    }

    #[test]
    fn tool_definition_serialization() {
        let tool = ToolDefinition {
            name: "execute_python".into(),
            description: "Run Python in a sandbox".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "code": { "type": "string" }
                },
                "required": ["code"]
            }),
        };
        let json = serde_json::to_string(&tool).unwrap();
        assert!(json.contains("execute_python"));
        assert!(json.contains("code"));
    }
}
