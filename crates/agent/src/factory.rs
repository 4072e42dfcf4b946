//! Per-invocation agent construction.
//!
//! The factory holds everything that is shared and read-only between
//! invocations (provider, tool registry, optional session store) and builds
//! a fresh [`AgentLoop`] and [`Conversation`] for every call.

use std::sync::Arc;

use handson_config::AppConfig;
use handson_core::error::MemoryError;
use handson_core::message::{Conversation, Message};
use handson_core::provider::Provider;
use handson_core::session::{SessionKey, SessionStore};
use handson_core::tool::ToolRegistry;
use tracing::{debug, info};

use crate::loop_runner::AgentLoop;

pub struct AgentFactory {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    system_prompt: Option<String>,
    max_iterations: u32,
    tools: Arc<ToolRegistry>,
    store: Option<(Arc<dyn SessionStore>, String)>,
    history_turns: usize,
}

impl AgentFactory {
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>, config: &AppConfig) -> Self {
        Self {
            provider,
            model: config.model.model_id.clone(),
            temperature: config.model.temperature,
            max_tokens: config.model.max_tokens,
            system_prompt: config.model.system_prompt.clone(),
            max_iterations: config.agent.max_tool_iterations,
            tools,
            store: None,
            history_turns: config.memory.max_turns,
        }
    }

    /// Attach a session store for the given memory resource.
    pub fn with_store(mut self, store: Arc<dyn SessionStore>, memory_id: impl Into<String>) -> Self {
        self.store = Some((store, memory_id.into()));
        self
    }

    pub fn memory_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Build the session key for this factory's memory, if one is attached.
    pub fn session_key(
        &self,
        session_id: &str,
        actor_id: &str,
    ) -> Result<Option<SessionKey>, MemoryError> {
        match &self.store {
            Some((_, memory_id)) => SessionKey::new(memory_id, session_id, actor_id).map(Some),
            None => Ok(None),
        }
    }

    /// A fresh agent loop sharing this factory's provider and tools.
    pub fn build(&self) -> AgentLoop {
        let agent = AgentLoop::new(
            self.provider.clone(),
            self.model.clone(),
            self.temperature,
            self.tools.clone(),
        )
        .with_max_tokens(self.max_tokens)
        .with_max_iterations(self.max_iterations);
        match &self.system_prompt {
            Some(prompt) => agent.with_system_prompt(prompt),
            None => agent,
        }
    }

    /// Run one prompt through a fresh agent.
    ///
    /// With a store and a session key, prior turns are loaded first and the
    /// new user/assistant pair is appended afterwards. Store failures
    /// propagate; nothing is retried.
    pub async fn invoke(
        &self,
        prompt: &str,
        session: Option<&SessionKey>,
    ) -> handson_core::Result<String> {
        let store = self
            .store
            .as_ref()
            .map(|(store, _)| store)
            .zip(session);

        let mut conversation = match store {
            Some((store, key)) => {
                let history = store.load(key, self.history_turns).await?;
                debug!(session = %key, turns = history.len(), "Rehydrated session history");
                Conversation::with_history(history)
            }
            None => Conversation::new(),
        };
        conversation.push(Message::user(prompt));

        let text = self.build().process(&mut conversation).await?;

        if let Some((store, key)) = store {
            store
                .append(key, &[Message::user(prompt), Message::assistant(&text)])
                .await?;
            info!(session = %key, "Session turn recorded");
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;
    use async_trait::async_trait;
    use handson_core::message::Role;
    use handson_memory::InMemorySessionStore;

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.model.model_id = "test-model".into();
        config.model.system_prompt = Some("You are a test agent.".into());
        config.memory.max_turns = 4;
        config
    }

    #[tokio::test]
    async fn stateless_invoke() {
        let provider = Arc::new(ScriptedProvider::single_text("hi there"));
        let factory = AgentFactory::new(provider.clone(), Arc::new(ToolRegistry::new()), &config());

        assert!(!factory.memory_enabled());
        assert!(factory.session_key("s", "a").unwrap().is_none());
        assert_eq!(factory.invoke("hello", None).await.unwrap(), "hi there");

        let request = &provider.requests()[0];
        assert_eq!(request.model, "test-model");
        assert_eq!(request.max_tokens, Some(4096));
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[1].content, "hello");
    }

    #[tokio::test]
    async fn history_is_loaded_and_turns_appended() {
        let store = Arc::new(InMemorySessionStore::new());
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(crate::testing::text_response("first answer")),
            Ok(crate::testing::text_response("second answer")),
        ]));
        let factory = AgentFactory::new(provider.clone(), Arc::new(ToolRegistry::new()), &config())
            .with_store(store.clone(), "mem-1");

        let key = factory.session_key("sess-1", "user-1").unwrap().unwrap();
        factory.invoke("first question", Some(&key)).await.unwrap();
        factory.invoke("second question", Some(&key)).await.unwrap();

        assert_eq!(store.len(&key).await, 4);
        let second = &provider.requests()[1];
        let texts: Vec<&str> = second.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            texts,
            ["You are a test agent.", "first question", "first answer", "second question"]
        );
    }

    struct BrokenStore;

    #[async_trait]
    impl SessionStore for BrokenStore {
        fn name(&self) -> &str {
            "broken"
        }
        async fn load(&self, _: &SessionKey, _: usize) -> Result<Vec<Message>, MemoryError> {
            Err(MemoryError::QueryFailed("unreachable".into()))
        }
        async fn append(&self, _: &SessionKey, _: &[Message]) -> Result<(), MemoryError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn store_errors_propagate_without_calling_the_model() {
        let provider = Arc::new(ScriptedProvider::single_text("unused"));
        let factory = AgentFactory::new(provider.clone(), Arc::new(ToolRegistry::new()), &config())
            .with_store(Arc::new(BrokenStore), "mem-1");
        let key = factory.session_key("s", "a").unwrap().unwrap();

        let err = factory.invoke("q", Some(&key)).await.unwrap_err();
        assert_eq!(err.kind(), "memory");
        assert_eq!(provider.call_count(), 0);
    }
}
