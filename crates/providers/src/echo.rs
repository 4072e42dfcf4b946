//! Local echo provider.
//!
//! Deterministic and offline: replies with the latest user message. Useful
//! for smoke tests of the HTTP surface without model credentials.

use async_trait::async_trait;
use handson_core::error::ProviderError;
use handson_core::message::{Message, Role};
use handson_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};

#[derive(Debug, Default, Clone, Copy)]
pub struct EchoProvider;

impl EchoProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Provider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let prompt = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let reply = format!("Echo: {prompt}");
        let words = |s: &str| s.split_whitespace().count() as u32;
        let usage = Usage {
            prompt_tokens: words(prompt),
            completion_tokens: words(&reply),
            total_tokens: words(prompt) + words(&reply),
        };

        Ok(ProviderResponse {
            message: Message::assistant(reply),
            usage: Some(usage),
            model: request.model,
            stop_reason: Some("end_turn".into()),
        })
    }
}
