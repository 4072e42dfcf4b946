//! Tool adapters for the hands-on agent runtime.
//!
//! Each adapter wraps one remote AgentCore capability behind the
//! [`Tool`](handson_core::tool::Tool) contract:
//!
//! - `execute_python`: code interpreter sandbox
//! - `browse_web`: headless browser driven over DevTools
//! - `web_search`: research sub-agent over MCP gateway tools
//!
//! Adapters never fail past their own boundary. Remote errors are logged and
//! handed to the model as `{"error": "<category>: <message>"}`.

pub mod browser;
pub mod cdp;
pub mod code_interpreter;
pub mod mcp;
pub mod research;
pub mod scope;

use std::sync::Arc;
use std::time::Duration;

use handson_aws::{
    BrowserClient, CodeInterpreterClient, CredentialsProvider, PlatformError, SignedClient,
};
use handson_config::AppConfig;
use handson_core::provider::Provider;
use handson_core::tool::ToolRegistry;
use tracing::info;

pub use browser::{BrowserService, BrowserTool, PageDriver, PageSession};
pub use cdp::CdpDriver;
pub use code_interpreter::{CodeInterpreterTool, EventReducer, ExecutionEvent, SandboxService};
pub use mcp::{GatewaySession, McpGateway, RemoteTool, ToolGateway};
pub use research::ResearchTool;

/// SigV4 service name for AgentCore data-plane calls.
pub const AGENTCORE_SERVICE: &str = "bedrock-agentcore";

/// Error category for missing configuration.
pub const CONFIGURATION_ERROR: &str = "Configuration error";

/// The in-band error string handed back to the model.
pub fn error_json(category: &str, err: &dyn std::fmt::Display) -> String {
    serde_json::json!({ "error": format!("{category}: {err}") }).to_string()
}

/// Remote backends the adapters talk to.
#[derive(Clone)]
pub struct ToolServices {
    pub sandbox: Arc<dyn SandboxService>,
    pub browser: Arc<dyn BrowserService>,
    pub driver: Arc<dyn PageDriver>,
    /// `None` unless both `gateway.url` and `gateway.id` are set.
    pub gateway: Option<Arc<dyn ToolGateway>>,
}

impl ToolServices {
    /// AgentCore-backed services signed with `credentials`.
    pub fn from_config(
        config: &AppConfig,
        credentials: Arc<dyn CredentialsProvider>,
    ) -> Result<Self, PlatformError> {
        let call_timeout = Duration::from_secs(config.timeouts.remote_call_secs);
        let client = SignedClient::new(
            config.aws.region.clone(),
            AGENTCORE_SERVICE,
            credentials,
            call_timeout,
        )?;

        let gateway: Option<Arc<dyn ToolGateway>> =
            match (&config.gateway.url, &config.gateway.id) {
                (Some(url), Some(id)) => Some(Arc::new(McpGateway::new(
                    client.clone(),
                    url.as_str(),
                    id.as_str(),
                    call_timeout,
                ))),
                _ => None,
            };

        Ok(Self {
            sandbox: Arc::new(CodeInterpreterClient::new(client.clone())),
            browser: Arc::new(BrowserClient::new(client)),
            driver: Arc::new(CdpDriver),
            gateway,
        })
    }
}

/// Register the adapters enabled by `config`.
///
/// `execute_python` and `browse_web` need their resource ids; `web_search`
/// is always offered and reports a configuration error when the gateway is
/// missing.
pub fn build_registry(
    config: &AppConfig,
    services: &ToolServices,
    provider: Arc<dyn Provider>,
) -> ToolRegistry {
    let call_timeout = Duration::from_secs(config.timeouts.remote_call_secs);
    let mut registry = ToolRegistry::new();

    if let Some(id) = &config.code_interpreter.id {
        registry.register(Box::new(CodeInterpreterTool::new(
            services.sandbox.clone(),
            id,
            config.code_interpreter.session_timeout_secs,
            call_timeout,
        )));
    }

    if let Some(id) = &config.browser.id {
        registry.register(Box::new(BrowserTool::new(
            services.browser.clone(),
            services.driver.clone(),
            id,
            config.browser.session_timeout_secs,
            call_timeout,
            Duration::from_secs(config.timeouts.navigation_secs),
        )));
    }

    registry.register(Box::new(ResearchTool::new(
        services.gateway.clone(),
        provider,
        config,
    )));

    info!(tools = ?registry.names(), "Tool registry ready");
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use handson_agent::testing::ScriptedProvider;
    use handson_aws::{Credentials, StaticCredentials};

    fn services(config: &AppConfig) -> ToolServices {
        ToolServices::from_config(config, Arc::new(StaticCredentials(Credentials::new("AKID", "secret", None)))).unwrap()
    }

    #[test]
    fn error_json_shape() {
        let err = handson_core::error::ToolError::NotConfigured("gateway.url".into());
        let out: serde_json::Value =
            serde_json::from_str(&error_json(CONFIGURATION_ERROR, &err)).unwrap();
        assert_eq!(out["error"], "Configuration error: Missing configuration: gateway.url");
    }

    #[test]
    fn only_research_without_resource_ids() {
        let config = AppConfig::default();
        let registry = build_registry(
            &config,
            &services(&config),
            Arc::new(ScriptedProvider::default()),
        );
        assert_eq!(registry.names(), ["web_search"]);
    }

    #[test]
    fn resource_ids_enable_sandbox_and_browser() {
        let mut config = AppConfig::default();
        config.code_interpreter.id = Some("aws.codeinterpreter.v1".into());
        config.browser.id = Some("aws.browser.v1".into());
        let registry = build_registry(
            &config,
            &services(&config),
            Arc::new(ScriptedProvider::default()),
        );
        assert_eq!(registry.names(), ["browse_web", "execute_python", "web_search"]);
    }

    #[test]
    fn gateway_needs_url_and_id() {
        let mut config = AppConfig::default();
        config.gateway.url = Some("https://gw.example/mcp".into());
        assert!(services(&config).gateway.is_none());
        config.gateway.id = Some("gw-1".into());
        assert!(services(&config).gateway.is_some());
    }
}
