//! MCP client for the tool-discovery gateway.
//!
//! The protocol runs on `rmcp`'s streamable-HTTP client transport. The
//! gateway only accepts SigV4-signed requests, so the HTTP leg is
//! [`SignedMcpClient`], which signs every POST, GET and DELETE. It also
//! remembers the session id the gateway hands out, so the session is
//! terminated exactly once however the client ends: explicit close,
//! failed handshake, or an abandoned connect.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use handson_aws::{PlatformError, SignedClient, error_for_status};
use handson_core::error::ToolError;
use reqwest::{Method, StatusCode};
use rmcp::ServiceExt;
use rmcp::model::{
    CallToolRequestParam, ClientCapabilities, ClientInfo, ClientJsonRpcMessage, Implementation,
    ServerJsonRpcMessage,
};
use rmcp::service::{RoleClient, RunningService, ServiceError};
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::transport::streamable_http_client::{
    StreamableHttpClient, StreamableHttpClientTransportConfig, StreamableHttpError,
    StreamableHttpPostResponse,
};
use serde::Deserialize;
use serde_json::Value;
use sse_stream::{Error as SseError, Sse, SseStream};
use tracing::{debug, info, warn};

use crate::scope::{Release, Scoped};

const SERVICE: &str = "gateway";
const SESSION_HEADER: &str = "mcp-session-id";
const LAST_EVENT_HEADER: &str = "last-event-id";
const EVENT_STREAM: &str = "text/event-stream";
const JSON: &str = "application/json";
const ACCEPT: &str = "application/json, text/event-stream";

/// A tool advertised by the gateway.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCallReply {
    #[serde(default)]
    content: Vec<ContentItem>,
    #[serde(default)]
    is_error: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

/// Opens sessions against a tool gateway.
#[async_trait]
pub trait ToolGateway: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn GatewaySession>, ToolError>;
}

/// One initialized gateway session.
#[async_trait]
pub trait GatewaySession: Send + Sync {
    /// Every tool, following pagination to the end.
    async fn list_tools(&self) -> Result<Vec<RemoteTool>, ToolError>;

    /// Call a tool and return its text content.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, ToolError>;

    async fn close(&self) -> Result<(), ToolError>;
}

fn gateway_error(message: impl std::fmt::Display) -> ToolError {
    ToolError::remote(SERVICE, message)
}

fn service_error(err: ServiceError) -> ToolError {
    match err {
        ServiceError::McpError(e) => gateway_error(format!("[{}] {}", e.code.0, e.message)),
        other => gateway_error(other),
    }
}

// ── Signed transport ────────────────────────────────────────────────────

/// Streamable-HTTP leg of the MCP transport, signed with SigV4.
#[derive(Clone)]
pub struct SignedMcpClient {
    client: SignedClient,
    /// The session the gateway has opened and nobody has terminated yet.
    open_session: Arc<Mutex<Option<Arc<str>>>>,
}

type TransportError = StreamableHttpError<PlatformError>;

impl SignedMcpClient {
    pub fn new(client: SignedClient) -> Self {
        Self {
            client,
            open_session: Arc::default(),
        }
    }

    /// The session still awaiting termination, if any.
    pub fn open_session(&self) -> Option<Arc<str>> {
        self.open_session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn record(&self, session_id: &str) {
        let mut open = self.open_session.lock().unwrap_or_else(|e| e.into_inner());
        if open.as_deref() != Some(session_id) {
            *open = Some(Arc::from(session_id));
        }
    }

    /// Claim the right to terminate `session_id`; false if already claimed.
    fn claim(&self, session_id: &str) -> bool {
        let mut open = self.open_session.lock().unwrap_or_else(|e| e.into_inner());
        if open.as_deref() == Some(session_id) {
            *open = None;
            true
        } else {
            false
        }
    }

    /// Send the `DELETE` for `session_id` unless it was already sent.
    pub async fn terminate(&self, uri: &str, session_id: &str) -> Result<(), PlatformError> {
        if !self.claim(session_id) {
            return Ok(());
        }
        let response = self
            .client
            .execute(Method::DELETE, uri, None, &[(SESSION_HEADER, session_id.to_string())])
            .await?;
        if response.status() == StatusCode::METHOD_NOT_ALLOWED {
            debug!(session_id, "Gateway does not support session termination");
            return Ok(());
        }
        error_for_status(response).await?;
        debug!(session_id, "Gateway session terminated");
        Ok(())
    }
}

fn content_type(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

impl StreamableHttpClient for SignedMcpClient {
    type Error = PlatformError;

    fn post_message(
        &self,
        uri: Arc<str>,
        message: ClientJsonRpcMessage,
        session_id: Option<Arc<str>>,
        _auth_header: Option<String>,
    ) -> impl Future<Output = Result<StreamableHttpPostResponse, TransportError>> + Send + '_ {
        async move {
            let body = serde_json::to_vec(&message).map_err(StreamableHttpError::Deserialize)?;
            let mut headers = vec![
                ("accept", ACCEPT.to_string()),
                ("content-type", JSON.to_string()),
            ];
            if let Some(id) = &session_id {
                headers.push((SESSION_HEADER, id.to_string()));
            }

            let response = self
                .client
                .execute(Method::POST, &uri, Some(body), &headers)
                .await
                .map_err(StreamableHttpError::Client)?;
            if response.status() == StatusCode::ACCEPTED {
                return Ok(StreamableHttpPostResponse::Accepted);
            }
            let response = error_for_status(response)
                .await
                .map_err(StreamableHttpError::Client)?;

            let session_id = response
                .headers()
                .get(SESSION_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            if let Some(id) = &session_id {
                self.record(id);
            }

            match content_type(&response) {
                Some(ct) if ct.starts_with(EVENT_STREAM) => {
                    let events = SseStream::from_byte_stream(response.bytes_stream()).boxed();
                    Ok(StreamableHttpPostResponse::Sse(events, session_id))
                }
                Some(ct) if ct.starts_with(JSON) => {
                    let bytes = response
                        .bytes()
                        .await
                        .map_err(|e| StreamableHttpError::Client(PlatformError::from_reqwest(e)))?;
                    let reply: ServerJsonRpcMessage =
                        serde_json::from_slice(&bytes).map_err(StreamableHttpError::Deserialize)?;
                    Ok(StreamableHttpPostResponse::Json(reply, session_id))
                }
                other => Err(StreamableHttpError::UnexpectedContentType(other)),
            }
        }
    }

    fn delete_session(
        &self,
        uri: Arc<str>,
        session_id: Arc<str>,
        _auth_header: Option<String>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send + '_ {
        async move {
            self.terminate(&uri, &session_id)
                .await
                .map_err(StreamableHttpError::Client)
        }
    }

    fn get_stream(
        &self,
        uri: Arc<str>,
        session_id: Arc<str>,
        last_event_id: Option<String>,
        _auth_header: Option<String>,
    ) -> impl Future<Output = Result<BoxStream<'static, Result<Sse, SseError>>, TransportError>>
    + Send
    + '_ {
        async move {
            let mut headers = vec![
                ("accept", EVENT_STREAM.to_string()),
                (SESSION_HEADER, session_id.to_string()),
            ];
            if let Some(last) = last_event_id {
                headers.push((LAST_EVENT_HEADER, last));
            }
            let response = self
                .client
                .execute(Method::GET, &uri, None, &headers)
                .await
                .map_err(StreamableHttpError::Client)?;
            if response.status() == StatusCode::METHOD_NOT_ALLOWED {
                return Err(StreamableHttpError::ServerDoesNotSupportSse);
            }
            let response = error_for_status(response)
                .await
                .map_err(StreamableHttpError::Client)?;
            match content_type(&response) {
                Some(ct) if ct.starts_with(EVENT_STREAM) => {
                    Ok(SseStream::from_byte_stream(response.bytes_stream()).boxed())
                }
                other => Err(StreamableHttpError::UnexpectedContentType(other)),
            }
        }
    }
}

/// Terminates whatever session the transport recorded.
#[derive(Clone)]
struct OpenSession {
    client: SignedMcpClient,
    uri: Arc<str>,
}

#[async_trait]
impl Release for OpenSession {
    fn label(&self) -> String {
        match self.client.open_session() {
            Some(id) => format!("{SERVICE} session {id}"),
            None => format!("{SERVICE} session"),
        }
    }

    async fn release(self) -> Result<(), ToolError> {
        match self.client.open_session() {
            Some(id) => self.client.terminate(&self.uri, &id).await.map_err(gateway_error),
            None => Ok(()),
        }
    }
}

// ── Gateway ─────────────────────────────────────────────────────────────

pub struct McpGateway {
    client: SignedClient,
    url: Arc<str>,
    gateway_id: String,
    call_timeout: Duration,
}

impl McpGateway {
    pub fn new(
        client: SignedClient,
        url: impl Into<String>,
        gateway_id: impl Into<String>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            client,
            url: Arc::from(url.into()),
            gateway_id: gateway_id.into(),
            call_timeout,
        }
    }

    fn client_info() -> ClientInfo {
        ClientInfo {
            protocol_version: Default::default(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                website_url: None,
                icons: None,
            },
        }
    }
}

#[async_trait]
impl ToolGateway for McpGateway {
    async fn connect(&self) -> Result<Arc<dyn GatewaySession>, ToolError> {
        let client = SignedMcpClient::new(self.client.clone());
        let transport = StreamableHttpClientTransport::with_client(
            client.clone(),
            StreamableHttpClientTransportConfig::with_uri(self.url.clone()),
        );

        // Covers a handshake that fails or is abandoned after the gateway
        // already opened a session.
        let pending = Scoped::new(OpenSession {
            client: client.clone(),
            uri: self.url.clone(),
        });
        let handshake = Self::client_info().serve(transport);
        let running = match tokio::time::timeout(self.call_timeout, handshake).await {
            Ok(Ok(running)) => running,
            Ok(Err(e)) => {
                pending.release().await;
                return Err(gateway_error(format!("initialize failed: {e}")));
            }
            Err(_) => {
                pending.release().await;
                return Err(ToolError::Timeout {
                    tool_name: SERVICE.into(),
                    timeout_secs: self.call_timeout.as_secs(),
                });
            }
        };
        let cleanup = pending.disarm();

        let server = running
            .peer_info()
            .map(|info| info.server_info.name.clone())
            .unwrap_or_default();
        let session_id = cleanup.client.open_session();
        info!(
            gateway = %self.gateway_id,
            %server,
            session_id = ?session_id,
            "Gateway session initialized"
        );
        Ok(Arc::new(McpSession {
            running: tokio::sync::Mutex::new(Some(running)),
            cleanup,
            call_timeout: self.call_timeout,
        }))
    }
}

struct McpSession {
    running: tokio::sync::Mutex<Option<RunningService<RoleClient, ClientInfo>>>,
    cleanup: OpenSession,
    call_timeout: Duration,
}

impl McpSession {
    fn timed_out(&self) -> ToolError {
        ToolError::Timeout {
            tool_name: SERVICE.into(),
            timeout_secs: self.call_timeout.as_secs(),
        }
    }
}

#[async_trait]
impl GatewaySession for McpSession {
    async fn list_tools(&self) -> Result<Vec<RemoteTool>, ToolError> {
        let running = self.running.lock().await;
        let service = running
            .as_ref()
            .ok_or_else(|| gateway_error("session is closed"))?;
        let tools = tokio::time::timeout(self.call_timeout, service.list_all_tools())
            .await
            .map_err(|_| self.timed_out())?
            .map_err(service_error)?;

        let tools = tools
            .into_iter()
            .map(|tool| {
                serde_json::to_value(tool)
                    .and_then(serde_json::from_value::<RemoteTool>)
                    .map_err(|e| gateway_error(format!("malformed tool definition: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        debug!(count = tools.len(), "Listed gateway tools");
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, ToolError> {
        let arguments = match arguments {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                return Err(ToolError::InvalidArguments(format!(
                    "gateway tool arguments must be an object, got {other}"
                )));
            }
        };
        let running = self.running.lock().await;
        let service = running
            .as_ref()
            .ok_or_else(|| gateway_error("session is closed"))?;
        let request = CallToolRequestParam {
            name: name.to_string().into(),
            arguments,
        };
        let result = tokio::time::timeout(self.call_timeout, service.call_tool(request))
            .await
            .map_err(|_| self.timed_out())?
            .map_err(service_error)?;

        let reply: ToolCallReply = serde_json::to_value(result)
            .and_then(serde_json::from_value)
            .map_err(|e| gateway_error(format!("malformed tools/call result: {e}")))?;
        let text = reply
            .content
            .into_iter()
            .filter(|item| item.kind == "text")
            .filter_map(|item| item.text)
            .collect::<Vec<_>>()
            .join("\n");
        if reply.is_error.unwrap_or(false) {
            return Err(ToolError::ExecutionFailed {
                tool_name: name.to_string(),
                reason: text,
            });
        }
        Ok(text)
    }

    async fn close(&self) -> Result<(), ToolError> {
        if let Some(running) = self.running.lock().await.take() {
            if let Err(e) = running.cancel().await {
                warn!(error = %e, "Gateway client task ended abnormally");
            }
        }
        // The transport normally terminates on shutdown; this only sends the
        // DELETE if it did not.
        self.cleanup.clone().release().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::{HeaderMap, header};
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};
    use handson_aws::{Credentials, StaticCredentials};
    use serde_json::json;

    type Log = Arc<Mutex<Vec<String>>>;

    #[derive(Clone)]
    struct Fake {
        log: Log,
        session: &'static str,
        /// Every request after `initialize` fails with 500.
        broken_after_initialize: bool,
    }

    fn seen_session(headers: &HeaderMap) -> String {
        headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string()
    }

    fn tool(name: &str, description: &str) -> Value {
        json!({ "name": name, "description": description, "inputSchema": { "type": "object", "properties": {} } })
    }

    async fn rpc(State(fake): State<Fake>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
        let method = body["method"].as_str().unwrap_or_default().to_string();
        fake.log.lock().unwrap().push(format!("{method}@{}", seen_session(&headers)));
        assert!(headers.contains_key("authorization"));
        let id = body["id"].clone();

        if method == "initialize" {
            return (
                [(SESSION_HEADER, fake.session)],
                Json(json!({ "jsonrpc": "2.0", "id": id, "result": {
                    "protocolVersion": body["params"]["protocolVersion"],
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": "fake-gateway", "version": "1.0.0" }
                }})),
            )
                .into_response();
        }
        if fake.broken_after_initialize {
            return (StatusCode::INTERNAL_SERVER_ERROR, "gateway exploded").into_response();
        }

        match method.as_str() {
            "notifications/initialized" => StatusCode::ACCEPTED.into_response(),
            "tools/list" => {
                let page = if body["params"]["cursor"].is_null() {
                    json!({ "tools": [tool("search___tavily", "Search the web")], "nextCursor": "p2" })
                } else {
                    json!({ "tools": [tool("x_amz_bedrock_agentcore_search", "Built-in search")] })
                };
                Json(json!({ "jsonrpc": "2.0", "id": id, "result": page })).into_response()
            }
            "tools/call" if body["params"]["name"] == "missing" => Json(json!({
                "jsonrpc": "2.0", "id": id, "error": { "code": -32602, "message": "Unknown tool: missing" }
            }))
            .into_response(),
            "tools/call" => {
                let is_error = body["params"]["name"] == "broken";
                let reply = json!({ "jsonrpc": "2.0", "id": id, "result": {
                    "content": [{ "type": "text", "text": "line one" }, { "type": "text", "text": "line two" }],
                    "isError": is_error
                }});
                (
                    [(header::CONTENT_TYPE, EVENT_STREAM)],
                    format!("event: message\ndata: {reply}\n\n"),
                )
                    .into_response()
            }
            _ => StatusCode::ACCEPTED.into_response(),
        }
    }

    async fn terminate(State(fake): State<Fake>, headers: HeaderMap) -> StatusCode {
        fake.log.lock().unwrap().push(format!("DELETE@{}", seen_session(&headers)));
        StatusCode::METHOD_NOT_ALLOWED
    }

    async fn no_stream() -> StatusCode {
        StatusCode::METHOD_NOT_ALLOWED
    }

    fn signed_client(timeout: Duration) -> SignedClient {
        SignedClient::new(
            "us-east-1",
            "bedrock-agentcore",
            Arc::new(StaticCredentials(Credentials::new("AKID", "secret", None))),
            timeout,
        )
        .unwrap()
    }

    async fn serve_fake(session: &'static str, broken_after_initialize: bool) -> (McpGateway, Log) {
        let log: Log = Arc::default();
        let fake = Fake {
            log: log.clone(),
            session,
            broken_after_initialize,
        };
        let app = Router::new()
            .route("/mcp", post(rpc).delete(terminate).get(no_stream))
            .with_state(fake);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let gateway = McpGateway::new(
            signed_client(Duration::from_secs(5)),
            format!("http://{addr}/mcp"),
            "gw-1",
            Duration::from_secs(5),
        );
        (gateway, log)
    }

    /// Wait until the fake has seen `entry` (termination may run on the
    /// transport's own task).
    async fn wait_for(log: &Log, entry: &str) -> Vec<String> {
        for _ in 0..100 {
            let seen = log.lock().unwrap().clone();
            if seen.iter().any(|e| e == entry) {
                return seen;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        log.lock().unwrap().clone()
    }

    fn count(log: &[String], prefix: &str) -> usize {
        log.iter().filter(|e| e.starts_with(prefix)).count()
    }

    #[tokio::test]
    async fn full_session_lifecycle() {
        let (gateway, log) = serve_fake("mcp-42", false).await;
        let session = gateway.connect().await.unwrap();

        let tools = session.list_tools().await.unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["search___tavily", "x_amz_bedrock_agentcore_search"]);
        assert_eq!(tools[0].description.as_deref(), Some("Search the web"));
        assert_eq!(tools[0].input_schema.as_ref().unwrap()["type"], "object");

        let text = session.call_tool("search___tavily", json!({ "query": "rust" })).await.unwrap();
        assert_eq!(text, "line one\nline two");

        session.close().await.unwrap();
        let seen = wait_for(&log, "DELETE@mcp-42").await;

        assert_eq!(
            seen.iter().filter(|e| !e.starts_with("DELETE")).cloned().collect::<Vec<_>>(),
            [
                "initialize@-",
                "notifications/initialized@mcp-42",
                "tools/list@mcp-42",
                "tools/list@mcp-42",
                "tools/call@mcp-42",
            ]
        );
        assert_eq!(count(&seen, "DELETE@mcp-42"), 1);

        // A second close sends nothing.
        session.close().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count(&log.lock().unwrap(), "DELETE"), 1);
    }

    #[tokio::test]
    async fn tool_level_errors_and_rpc_errors_surface() {
        let (gateway, _) = serve_fake("mcp-7", false).await;
        let session = gateway.connect().await.unwrap();

        let err = session.call_tool("broken", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { ref tool_name, .. } if tool_name == "broken"));

        let err = session.call_tool("missing", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("[-32602] Unknown tool: missing"));

        let err = session.call_tool("search___tavily", json!("text")).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn failed_handshake_still_terminates_the_session() {
        let (gateway, log) = serve_fake("mcp-leak", true).await;

        assert!(gateway.connect().await.is_err());

        let seen = wait_for(&log, "DELETE@mcp-leak").await;
        assert_eq!(seen[0], "initialize@-");
        assert!(seen.contains(&"notifications/initialized@mcp-leak".to_string()));
        assert_eq!(count(&seen, "DELETE@mcp-leak"), 1);
    }

    #[tokio::test]
    async fn unreachable_gateway_fails_to_connect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let gateway = McpGateway::new(
            signed_client(Duration::from_secs(2)),
            format!("http://{addr}/mcp"),
            "gw-1",
            Duration::from_secs(2),
        );
        assert!(gateway.connect().await.is_err());
    }

    #[tokio::test]
    async fn terminate_is_sent_once_per_session() {
        let (gateway, log) = serve_fake("unused", false).await;
        let client = SignedMcpClient::new(signed_client(Duration::from_secs(5)));
        client.record("s-1");
        assert_eq!(client.open_session().as_deref(), Some("s-1"));

        client.terminate(&gateway.url, "s-1").await.unwrap();
        client.terminate(&gateway.url, "s-1").await.unwrap();
        assert!(client.open_session().is_none());
        // A session this client never saw opened is not its to end.
        client.terminate(&gateway.url, "other").await.unwrap();

        assert_eq!(*log.lock().unwrap(), ["DELETE@s-1"]);
    }
}
