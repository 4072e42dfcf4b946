//! Amazon Bedrock provider using the Converse API.
//!
//! Features:
//! - SigV4-signed requests against `bedrock-runtime.{region}.amazonaws.com`
//! - System prompt as a top-level list of text blocks
//! - Native tool use with `toolUse` / `toolResult` content blocks
//! - Consecutive same-role turns merged, since Converse requires alternation

use async_trait::async_trait;
use handson_aws::{PlatformError, SignedClient, bedrock_runtime_endpoint};
use handson_core::error::ProviderError;
use handson_core::message::{Message, MessageToolCall, Role};
use handson_core::provider::*;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Bedrock Converse provider.
pub struct BedrockProvider {
    client: SignedClient,
    endpoint: String,
}

impl BedrockProvider {
    /// Create a provider from a client signed for the `bedrock` service.
    pub fn new(client: SignedClient) -> Self {
        let endpoint = bedrock_runtime_endpoint(client.region());
        Self { client, endpoint }
    }

    fn converse_url(&self, model: &str) -> String {
        format!(
            "{}/model/{}/converse",
            self.endpoint,
            urlencoding::encode(model)
        )
    }

    /// Lift system messages out of the conversation.
    fn extract_system(messages: &[Message]) -> (Vec<SystemBlock>, Vec<&Message>) {
        let mut system = Vec::new();
        let mut rest = Vec::new();
        for msg in messages {
            match msg.role {
                Role::System => system.push(SystemBlock {
                    text: msg.content.clone(),
                }),
                _ => rest.push(msg),
            }
        }
        (system, rest)
    }

    /// Convert messages to Converse turns.
    ///
    /// Tool results become `toolResult` blocks in a user turn. Adjacent turns
    /// with the same role are merged and leading assistant turns dropped.
    fn to_api_messages(messages: &[&Message]) -> Vec<ConverseMessage> {
        let mut result: Vec<ConverseMessage> = Vec::new();

        for msg in messages {
            let (role, blocks) = match msg.role {
                Role::User => ("user", text_block(&msg.content)),
                Role::Assistant => {
                    let mut blocks = text_block(&msg.content);
                    for tc in &msg.tool_calls {
                        let input: Value = serde_json::from_str(&tc.arguments)
                            .unwrap_or_else(|_| json!({}));
                        blocks.push(ContentBlock::ToolUse(ToolUseBlock {
                            tool_use_id: tc.id.clone(),
                            name: tc.name.clone(),
                            input,
                        }));
                    }
                    ("assistant", blocks)
                }
                Role::Tool => (
                    "user",
                    vec![ContentBlock::ToolResult(ToolResultBlock {
                        tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                        content: vec![ToolResultContent {
                            text: msg.content.clone(),
                        }],
                        status: if msg.is_error { "error" } else { "success" }.into(),
                    })],
                ),
                Role::System => continue,
            };

            if blocks.is_empty() {
                continue;
            }
            if result.is_empty() && role == "assistant" {
                continue;
            }
            match result.last_mut() {
                Some(last) if last.role == role => last.content.extend(blocks),
                _ => result.push(ConverseMessage {
                    role: role.into(),
                    content: blocks,
                }),
            }
        }

        result
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Value {
        let specs: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "toolSpec": {
                        "name": t.name,
                        "description": t.description,
                        "inputSchema": { "json": t.parameters },
                    }
                })
            })
            .collect();
        json!({ "tools": specs })
    }

    fn build_body(request: &ProviderRequest) -> Value {
        let (system, messages) = Self::extract_system(&request.messages);
        let mut body = json!({
            "messages": Self::to_api_messages(&messages),
            "inferenceConfig": {
                "maxTokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
                "temperature": request.temperature,
            },
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }
        if !request.tools.is_empty() {
            body["toolConfig"] = Self::to_api_tools(&request.tools);
        }
        body
    }

    /// Convert a Converse response to our ProviderResponse.
    fn response_to_provider_response(
        resp: ConverseResponse,
        model: &str,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let content = resp
            .output
            .message
            .ok_or_else(|| ProviderError::InvalidResponse("response has no output message".into()))?
            .content;

        let mut text_content = String::new();
        let mut tool_calls = Vec::new();

        for block in &content {
            if let Some(text) = block.get("text").and_then(Value::as_str) {
                if !text_content.is_empty() {
                    text_content.push('\n');
                }
                text_content.push_str(text);
            } else if let Some(tool_use) = block.get("toolUse") {
                let id = tool_use.get("toolUseId").and_then(Value::as_str);
                let name = tool_use.get("name").and_then(Value::as_str);
                let (Some(id), Some(name)) = (id, name) else {
                    return Err(ProviderError::InvalidResponse(
                        "toolUse block missing toolUseId or name".into(),
                    ));
                };
                let input = tool_use.get("input").cloned().unwrap_or_else(|| json!({}));
                tool_calls.push(MessageToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments: input.to_string(),
                });
            } else {
                debug!(block = %block, "Skipping unsupported Converse content block");
            }
        }

        let mut message = Message::assistant(text_content);
        message.tool_calls = tool_calls;

        Ok(ProviderResponse {
            message,
            usage: resp.usage.map(|u| Usage {
                prompt_tokens: u.input_tokens,
                completion_tokens: u.output_tokens,
                total_tokens: u.total_tokens,
            }),
            model: model.to_string(),
            stop_reason: resp.stop_reason,
        })
    }
}

fn text_block(text: &str) -> Vec<ContentBlock> {
    if text.is_empty() {
        Vec::new()
    } else {
        vec![ContentBlock::Text(text.to_string())]
    }
}

fn map_platform_error(err: PlatformError, model: &str) -> ProviderError {
    match err {
        PlatformError::Throttled(_) => ProviderError::RateLimited {
            retry_after_secs: 5,
        },
        PlatformError::AccessDenied { body, .. } => ProviderError::AuthenticationFailed(body),
        PlatformError::MissingCredentials(msg) => ProviderError::AuthenticationFailed(msg),
        PlatformError::Http { status: 404, .. } => ProviderError::ModelNotFound(model.to_string()),
        PlatformError::Http { status, body } => ProviderError::ApiError {
            status_code: status,
            message: body,
        },
        PlatformError::Timeout(msg) => ProviderError::Timeout(msg),
        PlatformError::Network(msg) => ProviderError::Network(msg),
        PlatformError::Decode(msg) => ProviderError::InvalidResponse(msg),
        other => ProviderError::NotConfigured(other.to_string()),
    }
}

#[async_trait]
impl handson_core::Provider for BedrockProvider {
    fn name(&self) -> &str {
        "bedrock"
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let body = Self::build_body(&request);
        debug!(provider = "bedrock", model = %request.model, tools = request.tools.len(), "Sending converse request");

        let resp: ConverseResponse = self
            .client
            .send_json(Method::POST, &self.converse_url(&request.model), Some(&body), &[])
            .await
            .map_err(|e| {
                warn!(model = %request.model, error = %e, "Bedrock converse failed");
                map_platform_error(e, &request.model)
            })?;

        Self::response_to_provider_response(resp, &request.model)
    }
}

// --- Converse API types ---

#[derive(Debug, Serialize)]
struct SystemBlock {
    text: String,
}

#[derive(Debug, Serialize)]
struct ConverseMessage {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum ContentBlock {
    Text(String),
    ToolUse(ToolUseBlock),
    ToolResult(ToolResultBlock),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolUseBlock {
    tool_use_id: String,
    name: String,
    input: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolResultBlock {
    tool_use_id: String,
    content: Vec<ToolResultContent>,
    status: String,
}

#[derive(Debug, Serialize)]
struct ToolResultContent {
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConverseResponse {
    output: ConverseOutput,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<ConverseUsage>,
}

#[derive(Debug, Deserialize)]
struct ConverseOutput {
    #[serde(default)]
    message: Option<ConverseOutputMessage>,
}

#[derive(Debug, Deserialize)]
struct ConverseOutputMessage {
    #[serde(default)]
    content: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConverseUsage {
    input_tokens: u32,
    output_tokens: u32,
    total_tokens: u32,
}
