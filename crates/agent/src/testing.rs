//! Scripted providers for tests and offline demos.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use handson_core::error::ProviderError;
use handson_core::message::{Message, MessageToolCall};
use handson_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};

/// A provider that replays a fixed script of responses and records every
/// request it receives.
///
/// Once the script runs out every further call fails with
/// `ProviderError::InvalidResponse`.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// One plain text reply.
    pub fn single_text(text: &str) -> Self {
        Self::new(vec![Ok(text_response(text))])
    }

    /// A batch of tool calls, then a final answer.
    pub fn tool_then_answer(tool_calls: Vec<MessageToolCall>, answer: &str) -> Self {
        Self::new(vec![
            Ok(tool_call_response(tool_calls)),
            Ok(text_response(answer)),
        ])
    }

    /// Every request seen so far, in order.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::InvalidResponse("script exhausted".into())))
    }
}

/// A text-only response.
pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "scripted-model".into(),
        stop_reason: Some("end_turn".into()),
    }
}

/// A response asking for tool calls.
pub fn tool_call_response(tool_calls: Vec<MessageToolCall>) -> ProviderResponse {
    let mut message = Message::assistant("");
    message.tool_calls = tool_calls;
    ProviderResponse {
        message,
        usage: None,
        model: "scripted-model".into(),
        stop_reason: Some("tool_use".into()),
    }
}

/// A tool call with id `call_<name>`.
pub fn tool_call(name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: args.to_string(),
    }
}
