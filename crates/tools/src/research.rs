//! Web research through gateway-hosted search tools.
//!
//! Each call opens a gateway session, wraps the discovered tools for a
//! throwaway sub-agent that does the actual searching, and closes the
//! session before returning.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use handson_agent::AgentLoop;
use handson_config::AppConfig;
use handson_core::error::ToolError;
use handson_core::message::{Conversation, Message};
use handson_core::provider::Provider;
use handson_core::tool::{Tool, ToolRegistry, ToolResult};
use serde_json::{Value, json};
use tracing::{debug, error, info};

use crate::mcp::{GatewaySession, RemoteTool, ToolGateway};
use crate::scope::{Release, Scoped};
use crate::{CONFIGURATION_ERROR, error_json};

pub const TOOL_NAME: &str = "web_search";
const ERROR_CATEGORY: &str = "Web search failed";

pub const RESEARCH_SYSTEM_PROMPT: &str = "You are a web research specialist. Use the search \
tools available to you to find current, accurate information about the user's query. Cite the \
sources you relied on and summarise the findings concisely. If the searches turn up nothing \
useful, say so plainly instead of guessing.";

/// A gateway tool exposed to the research sub-agent.
struct GatewayTool {
    session: Arc<dyn GatewaySession>,
    name: String,
    description: String,
    schema: Value,
}

impl GatewayTool {
    fn new(session: Arc<dyn GatewaySession>, remote: RemoteTool) -> Self {
        Self {
            session,
            description: remote.description.unwrap_or_else(|| remote.name.clone()),
            schema: remote
                .input_schema
                .unwrap_or_else(|| json!({ "type": "object", "properties": {} })),
            name: remote.name,
        }
    }
}

#[async_trait]
impl Tool for GatewayTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        match self.session.call_tool(&self.name, arguments).await {
            Ok(text) => Ok(ToolResult::ok(text)),
            Err(e) => Ok(ToolResult::failure(e.to_string())),
        }
    }
}

#[derive(Clone)]
struct GatewayHandle(Arc<dyn GatewaySession>);

#[async_trait]
impl Release for GatewayHandle {
    fn label(&self) -> String {
        "gateway session".into()
    }

    async fn release(self) -> Result<(), ToolError> {
        self.0.close().await
    }
}

pub struct ResearchTool {
    gateway: Option<Arc<dyn ToolGateway>>,
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_iterations: u32,
    tool_prefix: Option<String>,
    call_timeout: Duration,
}

impl ResearchTool {
    /// `gateway` is `None` when the gateway URL or id is not configured.
    pub fn new(
        gateway: Option<Arc<dyn ToolGateway>>,
        provider: Arc<dyn Provider>,
        config: &AppConfig,
    ) -> Self {
        Self {
            gateway,
            provider,
            model: config.model.model_id.clone(),
            temperature: config.model.temperature,
            max_tokens: config.model.max_tokens,
            max_iterations: config.agent.max_tool_iterations,
            tool_prefix: config.gateway.tool_prefix.clone().filter(|p| !p.is_empty()),
            call_timeout: Duration::from_secs(config.timeouts.remote_call_secs),
        }
    }

    async fn research(
        &self,
        gateway: &dyn ToolGateway,
        query: &str,
        search_depth: &str,
    ) -> Result<String, ToolError> {
        let session = tokio::time::timeout(self.call_timeout, gateway.connect())
            .await
            .map_err(|_| self.timed_out())??;
        let session = Scoped::new(GatewayHandle(session));

        let outcome = self.ask_sub_agent(&session.0, query, search_depth).await;
        session.release().await;
        outcome
    }

    async fn ask_sub_agent(
        &self,
        session: &Arc<dyn GatewaySession>,
        query: &str,
        search_depth: &str,
    ) -> Result<String, ToolError> {
        let listed = tokio::time::timeout(self.call_timeout, session.list_tools())
            .await
            .map_err(|_| self.timed_out())??;
        let tools = select_tools(listed, self.tool_prefix.as_deref());
        if tools.is_empty() {
            return Err(ToolError::NotFound(match &self.tool_prefix {
                Some(prefix) => format!("no gateway tools match prefix '{prefix}'"),
                None => "gateway exposes no tools".into(),
            }));
        }
        info!(tools = tools.len(), query, search_depth, "Starting research sub-agent");

        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(Box::new(GatewayTool::new(session.clone(), tool)));
        }
        let agent = AgentLoop::new(
            self.provider.clone(),
            self.model.clone(),
            self.temperature,
            Arc::new(registry),
        )
        .with_max_iterations(self.max_iterations)
        .with_max_tokens(self.max_tokens)
        .with_system_prompt(RESEARCH_SYSTEM_PROMPT);

        let mut conversation = Conversation::new();
        conversation.push(Message::user(format!(
            "Research the following query with {search_depth} search depth: {query}"
        )));
        agent
            .process(&mut conversation)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: TOOL_NAME.into(),
                reason: e.to_string(),
            })
    }

    fn timed_out(&self) -> ToolError {
        ToolError::Timeout {
            tool_name: TOOL_NAME.into(),
            timeout_secs: self.call_timeout.as_secs(),
        }
    }
}

fn select_tools(tools: Vec<RemoteTool>, prefix: Option<&str>) -> Vec<RemoteTool> {
    match prefix {
        Some(prefix) => tools
            .into_iter()
            .filter(|t| t.name.starts_with(prefix))
            .collect(),
        None => tools,
    }
}

#[async_trait]
impl Tool for ResearchTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Research a topic on the web using the search tools behind the tool gateway. Returns \
         the query, the search depth used and a summary of what was found."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to research"
                },
                "search_depth": {
                    "type": "string",
                    "description": "How thorough the search should be",
                    "enum": ["basic", "advanced"],
                    "default": "basic"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        let Some(gateway) = &self.gateway else {
            let e = ToolError::NotConfigured("gateway.url and gateway.id must both be set".into());
            error!(tool = TOOL_NAME, error = ?e, "Web search is not configured");
            return Ok(ToolResult::failure(error_json(CONFIGURATION_ERROR, &e)));
        };

        let query = arguments["query"].as_str().unwrap_or_default();
        let search_depth = arguments["search_depth"].as_str().unwrap_or("basic");
        if !matches!(search_depth, "basic" | "advanced") {
            debug!(search_depth, "Passing through non-standard search depth");
        }

        match self.research(gateway.as_ref(), query, search_depth).await {
            Ok(results) => Ok(ToolResult::ok(
                json!({ "query": query, "search_depth": search_depth, "results": results })
                    .to_string(),
            )),
            Err(e) => {
                error!(tool = TOOL_NAME, error = ?e, "Web search failed");
                Ok(ToolResult::failure(error_json(ERROR_CATEGORY, &e)))
            }
        }
    }
}
