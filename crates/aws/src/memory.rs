//! AgentCore Memory short-term events.

use chrono::{DateTime, TimeZone, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::client::{SignedClient, agentcore_endpoint};
use crate::error::PlatformError;

/// A single conversational payload: role is `USER` or `ASSISTANT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationalTurn {
    pub role: String,
    pub text: String,
}

/// An event read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub turns: Vec<ConversationalTurn>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListEventsResponse {
    #[serde(default)]
    events: Vec<RawEvent>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    #[serde(default)]
    event_id: String,
    #[serde(default)]
    event_timestamp: Value,
    #[serde(default)]
    payload: Vec<Value>,
}

impl RawEvent {
    fn into_event(self) -> MemoryEvent {
        let turns = self
            .payload
            .iter()
            .filter_map(|item| {
                let conv = item.get("conversational")?;
                Some(ConversationalTurn {
                    role: conv.get("role")?.as_str()?.to_string(),
                    text: conv.get("content")?.get("text")?.as_str()?.to_string(),
                })
            })
            .collect();
        MemoryEvent {
            event_id: self.event_id,
            timestamp: parse_timestamp(&self.event_timestamp),
            turns,
        }
    }
}

/// Timestamps arrive as epoch seconds or RFC 3339 depending on the path.
fn parse_timestamp(value: &Value) -> DateTime<Utc> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .and_then(|secs| {
                Utc.timestamp_opt(secs.trunc() as i64, (secs.fract() * 1e9) as u32)
                    .single()
            })
            .unwrap_or_default(),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_default(),
        _ => DateTime::<Utc>::default(),
    }
}

#[derive(Debug, Clone)]
pub struct MemoryClient {
    client: SignedClient,
    endpoint: String,
}

impl MemoryClient {
    pub fn new(client: SignedClient) -> Self {
        let endpoint = agentcore_endpoint(client.region());
        Self { client, endpoint }
    }

    /// Record turns as one event.
    pub async fn create_event(
        &self,
        memory_id: &str,
        actor_id: &str,
        session_id: &str,
        timestamp: DateTime<Utc>,
        turns: &[ConversationalTurn],
    ) -> Result<(), PlatformError> {
        let payload: Vec<Value> = turns
            .iter()
            .map(|t| json!({ "conversational": { "content": { "text": t.text }, "role": t.role } }))
            .collect();
        let body = json!({
            "actorId": actor_id,
            "sessionId": session_id,
            "eventTimestamp": timestamp.timestamp_millis() as f64 / 1000.0,
            "payload": payload,
        });
        self.client
            .send(
                Method::POST,
                &format!("{}/memories/{}/events", self.endpoint, urlencoding::encode(memory_id)),
                Some(&body),
                &[],
            )
            .await?;
        debug!(memory_id, actor_id, session_id, turns = turns.len(), "Memory event created");
        Ok(())
    }

    /// List up to `max_results` events for a session, oldest first.
    pub async fn list_events(
        &self,
        memory_id: &str,
        actor_id: &str,
        session_id: &str,
        max_results: usize,
    ) -> Result<Vec<MemoryEvent>, PlatformError> {
        let url = format!(
            "{}/memories/{}/actor/{}/sessions/{}",
            self.endpoint,
            urlencoding::encode(memory_id),
            urlencoding::encode(actor_id),
            urlencoding::encode(session_id)
        );
        let mut events = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut body = json!({ "includePayloads": true, "maxResults": max_results.clamp(1, 100) });
            if let Some(token) = &next_token {
                body["nextToken"] = json!(token);
            }
            let page: ListEventsResponse = self
                .client
                .send_json(Method::POST, &url, Some(&body), &[])
                .await?;
            events.extend(page.events.into_iter().map(RawEvent::into_event));
            match page.next_token {
                Some(token) if events.len() < max_results => next_token = Some(token),
                _ => break,
            }
        }
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_event_extracts_conversational_payloads() {
        let raw: RawEvent = serde_json::from_value(json!({
            "eventId": "e-1",
            "eventTimestamp": 1_700_000_000.5,
            "payload": [
                { "conversational": { "content": { "text": "hi" }, "role": "USER" } },
                { "blob": "ignored" },
                { "conversational": { "content": { "text": "hello" }, "role": "ASSISTANT" } }
            ]
        }))
        .unwrap();
        let event = raw.into_event();
        assert_eq!(event.event_id, "e-1");
        assert_eq!(event.timestamp.timestamp(), 1_700_000_000);
        assert_eq!(
            event.turns,
            vec![
                ConversationalTurn { role: "USER".into(), text: "hi".into() },
                ConversationalTurn { role: "ASSISTANT".into(), text: "hello".into() },
            ]
        );
    }

    #[test]
    fn rfc3339_timestamps_parse() {
        let t = parse_timestamp(&json!("2025-01-02T03:04:05Z"));
        assert_eq!(t.to_rfc3339(), "2025-01-02T03:04:05+00:00");
        assert_eq!(parse_timestamp(&Value::Null).timestamp(), 0);
    }
}
