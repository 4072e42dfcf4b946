//! Minimal Chrome DevTools Protocol driver over the signed automation websocket.
//!
//! Only what page reading needs: open a blank target, attach in flattened
//! mode, navigate, evaluate two expressions, close the target.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use handson_aws::AutomationEndpoint;
use handson_core::error::ToolError;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use crate::browser::{PageDriver, PageSession};

const SERVICE: &str = "cdp";
const DOM_CONTENT_LOADED: &str = "Page.domContentEventFired";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn cdp_error(message: impl std::fmt::Display) -> ToolError {
    ToolError::remote(SERVICE, message)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CdpDriver;

#[async_trait]
impl PageDriver for CdpDriver {
    async fn connect(&self, endpoint: &AutomationEndpoint) -> Result<Box<dyn PageSession>, ToolError> {
        let mut request = endpoint
            .url
            .as_str()
            .into_client_request()
            .map_err(cdp_error)?;
        for (name, value) in &endpoint.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(cdp_error)?;
            let value = HeaderValue::from_str(value).map_err(cdp_error)?;
            request.headers_mut().insert(name, value);
        }

        let (socket, _) = connect_async(request).await.map_err(cdp_error)?;
        debug!(url = %endpoint.url, "Automation websocket connected");

        let mut page = CdpPage {
            socket,
            next_id: 0,
            target_id: None,
            session_id: None,
            events: VecDeque::new(),
            closed: false,
        };
        page.attach().await?;
        Ok(Box::new(page))
    }
}

struct CdpPage {
    socket: Socket,
    next_id: u64,
    target_id: Option<String>,
    /// Flattened session for the page target.
    session_id: Option<String>,
    /// Events read while waiting for a command reply.
    events: VecDeque<Value>,
    closed: bool,
}

impl CdpPage {
    async fn attach(&mut self) -> Result<(), ToolError> {
        let created = self
            .browser_call("Target.createTarget", json!({ "url": "about:blank" }))
            .await?;
        let target_id = required_str(&created, "targetId")?;
        self.target_id = Some(target_id.clone());

        let attached = self
            .browser_call(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        self.session_id = Some(required_str(&attached, "sessionId")?);

        self.page_call("Page.enable", json!({})).await?;
        Ok(())
    }

    async fn browser_call(&mut self, method: &str, params: Value) -> Result<Value, ToolError> {
        self.call(method, params, None).await
    }

    async fn page_call(&mut self, method: &str, params: Value) -> Result<Value, ToolError> {
        let session_id = self.session_id.clone();
        self.call(method, params, session_id).await
    }

    async fn call(
        &mut self,
        method: &str,
        params: Value,
        session_id: Option<String>,
    ) -> Result<Value, ToolError> {
        self.next_id += 1;
        let id = self.next_id;
        let mut command = json!({ "id": id, "method": method, "params": params });
        if let Some(session_id) = session_id {
            command["sessionId"] = json!(session_id);
        }
        self.socket
            .send(Message::Text(command.to_string().into()))
            .await
            .map_err(cdp_error)?;

        loop {
            let message = self.read().await?;
            if message.get("id").and_then(Value::as_u64) == Some(id) {
                if let Some(error) = message.get("error") {
                    let text = error["message"].as_str().unwrap_or("unknown error");
                    return Err(cdp_error(format!("{method}: {text}")));
                }
                return Ok(message.get("result").cloned().unwrap_or(Value::Null));
            }
            if message.get("method").is_some() {
                self.events.push_back(message);
            }
        }
    }

    async fn wait_for_event(&mut self, name: &str) -> Result<Value, ToolError> {
        if let Some(pos) = self.events.iter().position(|e| e["method"] == name) {
            return Ok(self.events.remove(pos).unwrap_or(Value::Null));
        }
        loop {
            let message = self.read().await?;
            if message["method"] == name {
                return Ok(message);
            }
        }
    }

    /// Next JSON text frame; control frames are skipped.
    async fn read(&mut self) -> Result<Value, ToolError> {
        loop {
            match self.socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(text.as_str()).map_err(cdp_error);
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(cdp_error("automation connection closed"));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(cdp_error(e)),
            }
        }
    }

    async fn evaluate(&mut self, expression: &str) -> Result<String, ToolError> {
        let reply = self
            .page_call(
                "Runtime.evaluate",
                json!({ "expression": expression, "returnByValue": true }),
            )
            .await?;
        if let Some(details) = reply.get("exceptionDetails") {
            return Err(cdp_error(format!(
                "evaluation failed: {}",
                details["text"].as_str().unwrap_or("exception")
            )));
        }
        Ok(reply["result"]["value"].as_str().unwrap_or_default().to_string())
    }
}

fn required_str(value: &Value, field: &str) -> Result<String, ToolError> {
    value[field]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| cdp_error(format!("reply is missing '{field}'")))
}

#[async_trait]
impl PageSession for CdpPage {
    async fn navigate(&mut self, url: &str) -> Result<(), ToolError> {
        self.events.clear();
        let reply = self.page_call("Page.navigate", json!({ "url": url })).await?;
        if let Some(error_text) = reply["errorText"].as_str().filter(|t| !t.is_empty()) {
            return Err(cdp_error(format!("navigation to {url} failed: {error_text}")));
        }
        self.wait_for_event(DOM_CONTENT_LOADED).await?;
        Ok(())
    }

    async fn title(&mut self) -> Result<String, ToolError> {
        self.evaluate("document.title").await
    }

    async fn body_text(&mut self) -> Result<String, ToolError> {
        self.evaluate("document.body ? document.body.innerText : ''").await
    }

    async fn close(&mut self) -> Result<(), ToolError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(target_id) = self.target_id.take() {
            if let Err(e) = self
                .browser_call("Target.closeTarget", json!({ "targetId": target_id }))
                .await
            {
                warn!(error = %e, "Target close failed");
            }
        }
        self.socket.close(None).await.map_err(cdp_error)
    }
}
