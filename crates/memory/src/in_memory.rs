//! In-memory session store: useful for tests and local runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use handson_core::error::MemoryError;
use handson_core::message::Message;
use handson_core::session::{SessionKey, SessionStore};
use tokio::sync::RwLock;

/// Keeps every session's turns in a map. Nothing survives the process.
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<SessionKey, Vec<Message>>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of turns stored for a session.
    pub async fn len(&self, key: &SessionKey) -> usize {
        self.sessions.read().await.get(key).map_or(0, Vec::len)
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn load(&self, key: &SessionKey, limit: usize) -> Result<Vec<Message>, MemoryError> {
        let sessions = self.sessions.read().await;
        let turns = sessions.get(key).map(Vec::as_slice).unwrap_or_default();
        let start = turns.len().saturating_sub(limit);
        Ok(turns[start..].to_vec())
    }

    async fn append(&self, key: &SessionKey, turns: &[Message]) -> Result<(), MemoryError> {
        self.sessions
            .write()
            .await
            .entry(key.clone())
            .or_default()
            .extend_from_slice(turns);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(session: &str) -> SessionKey {
        SessionKey::new("mem", session, "user-1").unwrap()
    }

    #[tokio::test]
    async fn append_and_load() {
        let store = InMemorySessionStore::new();
        store
            .append(&key("s1"), &[Message::user("hi"), Message::assistant("hello")])
            .await
            .unwrap();

        let history = store.load(&key("s1"), 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "hello");
    }

    #[tokio::test]
    async fn load_respects_limit() {
        let store = InMemorySessionStore::new();
        for i in 0..5 {
            store.append(&key("s1"), &[Message::user(format!("m{i}"))]).await.unwrap();
        }
        let history = store.load(&key("s1"), 2).await.unwrap();
        let texts: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, ["m3", "m4"]);
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let store = InMemorySessionStore::new();
        store.append(&key("a"), &[Message::user("only in a")]).await.unwrap();
        assert!(store.load(&key("b"), 10).await.unwrap().is_empty());
        assert_eq!(store.len(&key("a")).await, 1);
    }
}
