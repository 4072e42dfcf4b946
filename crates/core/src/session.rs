//! Session store trait: conversational turns kept by a remote memory service.
//!
//! This process never owns session state. It forwards a [`SessionKey`] on
//! every call so the remote store can attribute turns to the right
//! conversation, loads prior turns before an invocation, and appends the new
//! turn afterwards.

use crate::error::MemoryError;
use crate::message::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Identity of one conversation in a memory store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub memory_id: String,
    pub session_id: String,
    pub actor_id: String,
}

impl SessionKey {
    /// Build a key, rejecting empty components.
    pub fn new(
        memory_id: impl Into<String>,
        session_id: impl Into<String>,
        actor_id: impl Into<String>,
    ) -> Result<Self, MemoryError> {
        let key = Self {
            memory_id: memory_id.into(),
            session_id: session_id.into(),
            actor_id: actor_id.into(),
        };
        for (field, value) in [
            ("memory_id", &key.memory_id),
            ("session_id", &key.session_id),
            ("actor_id", &key.actor_id),
        ] {
            if value.trim().is_empty() {
                return Err(MemoryError::InvalidSession(format!("{field} is empty")));
            }
        }
        Ok(key)
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.memory_id, self.actor_id, self.session_id)
    }
}

/// The core SessionStore trait.
///
/// Implementations: AgentCore Memory (remote), in-memory (tests and local runs).
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The backend name (e.g., "agentcore", "in_memory").
    fn name(&self) -> &str;

    /// Load at most `limit` most recent turns, oldest first.
    async fn load(&self, key: &SessionKey, limit: usize) -> Result<Vec<Message>, MemoryError>;

    /// Append turns to the session, in order.
    async fn append(&self, key: &SessionKey, turns: &[Message]) -> Result<(), MemoryError>;
}
