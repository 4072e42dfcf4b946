//! AgentCore Memory backed session store.
//!
//! Each user or assistant turn is recorded as its own conversational event.
//! Loading lists the session's events, flattens their payloads in timestamp
//! order and keeps the most recent `limit` turns.

use async_trait::async_trait;
use chrono::Utc;
use handson_aws::{ConversationalTurn, MemoryClient, MemoryEvent};
use handson_core::error::MemoryError;
use handson_core::message::{Message, Role};
use handson_core::session::{SessionKey, SessionStore};
use tracing::{debug, warn};

pub struct AgentCoreSessionStore {
    client: MemoryClient,
}

impl AgentCoreSessionStore {
    pub fn new(client: MemoryClient) -> Self {
        Self { client }
    }
}

/// Map a stored turn back to a message; unknown roles are skipped.
fn turn_to_message(turn: &ConversationalTurn) -> Option<Message> {
    match turn.role.as_str() {
        "USER" => Some(Message::user(&turn.text)),
        "ASSISTANT" => Some(Message::assistant(&turn.text)),
        other => {
            debug!(role = other, "Skipping memory turn with unsupported role");
            None
        }
    }
}

fn message_to_turn(message: &Message) -> Option<ConversationalTurn> {
    let role = match message.role {
        Role::User => "USER",
        Role::Assistant => "ASSISTANT",
        _ => return None,
    };
    if message.content.is_empty() {
        return None;
    }
    Some(ConversationalTurn {
        role: role.into(),
        text: message.content.clone(),
    })
}

/// Flatten events (already oldest first) and keep the last `limit` turns.
fn events_to_history(events: &[MemoryEvent], limit: usize) -> Vec<Message> {
    let mut history: Vec<Message> = events
        .iter()
        .flat_map(|e| e.turns.iter())
        .filter_map(turn_to_message)
        .collect();
    if history.len() > limit {
        history.drain(..history.len() - limit);
    }
    history
}

#[async_trait]
impl SessionStore for AgentCoreSessionStore {
    fn name(&self) -> &str {
        "agentcore"
    }

    async fn load(&self, key: &SessionKey, limit: usize) -> Result<Vec<Message>, MemoryError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let events = self
            .client
            .list_events(&key.memory_id, &key.actor_id, &key.session_id, limit)
            .await
            .map_err(|e| {
                warn!(session = %key, error = %e, "Failed to load session history");
                MemoryError::QueryFailed(e.to_string())
            })?;
        let history = events_to_history(&events, limit);
        debug!(session = %key, events = events.len(), turns = history.len(), "Session history loaded");
        Ok(history)
    }

    async fn append(&self, key: &SessionKey, turns: &[Message]) -> Result<(), MemoryError> {
        for turn in turns.iter().filter_map(message_to_turn) {
            self.client
                .create_event(
                    &key.memory_id,
                    &key.actor_id,
                    &key.session_id,
                    Utc::now(),
                    std::slice::from_ref(&turn),
                )
                .await
                .map_err(|e| {
                    warn!(session = %key, error = %e, "Failed to record session turn");
                    MemoryError::Storage(e.to_string())
                })?;
        }
        Ok(())
    }
}
