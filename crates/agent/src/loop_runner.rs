//! The agent reasoning loop implementation.

use std::sync::Arc;

use handson_core::message::{Conversation, Message, Role};
use handson_core::provider::{Provider, ProviderRequest};
use handson_core::tool::{ToolCall, ToolRegistry};
use tracing::{debug, info, warn};

/// Returned when the model keeps calling tools past the iteration limit.
pub const MAX_ITERATIONS_MESSAGE: &str =
    "I've reached the maximum number of tool call iterations. Please provide further guidance.";

/// The agent loop that orchestrates model calls and tool execution.
pub struct AgentLoop {
    /// The model backend
    provider: Arc<dyn Provider>,

    /// The model to use
    model: String,

    /// Temperature setting
    temperature: f32,

    /// Max tokens per response
    max_tokens: Option<u32>,

    /// Tools the model may call
    tools: Arc<ToolRegistry>,

    /// System instruction, if any
    system_prompt: Option<String>,

    /// Maximum tool call iterations per turn
    max_iterations: u32,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        temperature: f32,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature,
            max_tokens: None,
            tools,
            system_prompt: None,
            max_iterations: 25,
        }
    }

    /// Set the maximum number of tool call iterations.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Set the max tokens per model response.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run the conversation until the model answers with text.
    ///
    /// Tool calls are executed sequentially in the order the model emitted
    /// them. A failed or unknown tool becomes an error tool message so the
    /// model can recover; only provider failures abort the loop.
    pub async fn process(
        &self,
        conversation: &mut Conversation,
    ) -> Result<String, handson_core::Error> {
        info!(
            conversation_id = %conversation.id,
            messages = conversation.messages.len(),
            tools = self.tools.len(),
            "Processing conversation"
        );

        if let Some(prompt) = &self.system_prompt {
            if conversation.messages.first().map(|m| m.role) != Some(Role::System) {
                conversation.messages.insert(0, Message::system(prompt));
            }
        }

        let tool_definitions = self.tools.definitions();

        for iteration in 1..=self.max_iterations {
            debug!(conversation_id = %conversation.id, iteration, "Agent loop iteration");

            let request = ProviderRequest {
                model: self.model.clone(),
                messages: conversation.messages.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                tools: tool_definitions.clone(),
            };

            let response = self.provider.complete(request).await?;

            if let Some(usage) = &response.usage {
                debug!(
                    model = %response.model,
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    "Model usage"
                );
            }

            if response.message.tool_calls.is_empty() {
                let text = response.message.content.clone();
                conversation.push(response.message);
                return Ok(text);
            }

            debug!(tool_count = response.message.tool_calls.len(), "Executing tool calls");

            let tool_calls = response.message.tool_calls.clone();
            conversation.push(response.message);

            for tc in &tool_calls {
                let arguments = serde_json::from_str(&tc.arguments).unwrap_or_else(|e| {
                    warn!(tool = %tc.name, error = %e, "Tool arguments are not valid JSON");
                    serde_json::Value::Object(Default::default())
                });
                let call = ToolCall {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    arguments,
                };

                let start = std::time::Instant::now();
                let result = self.tools.execute(&call).await;
                let duration_ms = start.elapsed().as_millis() as u64;

                match result {
                    Ok(tool_result) if tool_result.success => {
                        debug!(tool = %tc.name, duration_ms, "Tool succeeded");
                        conversation.push(Message::tool_result(&tc.id, tool_result.output));
                    }
                    Ok(tool_result) => {
                        warn!(tool = %tc.name, duration_ms, "Tool reported failure");
                        conversation.push(Message::tool_error(&tc.id, tool_result.output));
                    }
                    Err(e) => {
                        warn!(tool = %tc.name, error = %e, "Tool execution failed");
                        // Report error to the model so it can recover
                        conversation.push(Message::tool_error(&tc.id, format!("Error: {e}")));
                    }
                }
            }
        }

        warn!(
            conversation_id = %conversation.id,
            max_iterations = self.max_iterations,
            "Max tool iterations reached"
        );
        Ok(MAX_ITERATIONS_MESSAGE.into())
    }
}
