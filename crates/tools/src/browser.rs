//! Web page reading through the remote headless browser.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use handson_aws::{AutomationEndpoint, BrowserClient, BrowserSessionInfo, PlatformError};
use handson_core::error::ToolError;
use handson_core::tool::{Tool, ToolResult};
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::error_json;
use crate::scope::{Release, Scoped};

pub const TOOL_NAME: &str = "browse_web";
const ERROR_CATEGORY: &str = "Browser action failed";
const SERVICE: &str = "browser";

/// Session control for the remote browser.
#[async_trait]
pub trait BrowserService: Send + Sync {
    async fn start_session(
        &self,
        browser_id: &str,
        timeout_secs: u64,
    ) -> Result<BrowserSessionInfo, PlatformError>;

    async fn automation_endpoint(
        &self,
        browser_id: &str,
        session: &BrowserSessionInfo,
    ) -> Result<AutomationEndpoint, PlatformError>;

    async fn stop_session(&self, browser_id: &str, session_id: &str) -> Result<(), PlatformError>;
}

#[async_trait]
impl BrowserService for BrowserClient {
    async fn start_session(
        &self,
        browser_id: &str,
        timeout_secs: u64,
    ) -> Result<BrowserSessionInfo, PlatformError> {
        BrowserClient::start_session(self, browser_id, timeout_secs).await
    }

    async fn automation_endpoint(
        &self,
        browser_id: &str,
        session: &BrowserSessionInfo,
    ) -> Result<AutomationEndpoint, PlatformError> {
        BrowserClient::automation_endpoint(self, browser_id, session).await
    }

    async fn stop_session(&self, browser_id: &str, session_id: &str) -> Result<(), PlatformError> {
        BrowserClient::stop_session(self, browser_id, session_id).await
    }
}

/// Attaches to a running browser over its automation endpoint.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn connect(&self, endpoint: &AutomationEndpoint) -> Result<Box<dyn PageSession>, ToolError>;
}

/// One attached page.
#[async_trait]
pub trait PageSession: Send {
    /// Navigate and wait for DOMContentLoaded.
    async fn navigate(&mut self, url: &str) -> Result<(), ToolError>;

    async fn title(&mut self) -> Result<String, ToolError>;

    /// Visible text of `document.body`.
    async fn body_text(&mut self) -> Result<String, ToolError>;

    async fn close(&mut self) -> Result<(), ToolError>;
}

#[derive(Clone)]
struct BrowserSession {
    service: Arc<dyn BrowserService>,
    browser_id: String,
    session_id: String,
}

#[async_trait]
impl Release for BrowserSession {
    fn label(&self) -> String {
        format!("{SERVICE} session {}", self.session_id)
    }

    async fn release(self) -> Result<(), ToolError> {
        self.service
            .stop_session(&self.browser_id, &self.session_id)
            .await
            .map_err(|e| ToolError::remote(SERVICE, e))
    }
}

pub struct BrowserTool {
    service: Arc<dyn BrowserService>,
    driver: Arc<dyn PageDriver>,
    browser_id: String,
    session_timeout_secs: u64,
    call_timeout: Duration,
    navigation_timeout: Duration,
}

impl BrowserTool {
    pub fn new(
        service: Arc<dyn BrowserService>,
        driver: Arc<dyn PageDriver>,
        browser_id: impl Into<String>,
        session_timeout_secs: u64,
        call_timeout: Duration,
        navigation_timeout: Duration,
    ) -> Self {
        Self {
            service,
            driver,
            browser_id: browser_id.into(),
            session_timeout_secs,
            call_timeout,
            navigation_timeout,
        }
    }

    /// A start that outlives the call timeout returns no session id to
    /// stop; whatever the service opened expires after `session_timeout_secs`.
    async fn run(&self, url: &str) -> Result<Value, ToolError> {
        let info = tokio::time::timeout(
            self.call_timeout,
            self.service
                .start_session(&self.browser_id, self.session_timeout_secs),
        )
        .await
        .map_err(|_| {
            warn!(
                browser = %self.browser_id,
                expires_after_secs = self.session_timeout_secs,
                "Browser start timed out; any session it opened expires on its own"
            );
            timed_out(self.call_timeout)
        })?
        .map_err(|e| ToolError::remote(SERVICE, e))?;

        let session = Scoped::new(BrowserSession {
            service: self.service.clone(),
            browser_id: self.browser_id.clone(),
            session_id: info.session_id.clone(),
        });

        // The page is closed inside `visit`, so it always precedes the stop.
        let outcome = self.visit(&info, url).await;
        session.release().await;
        outcome
    }

    async fn visit(&self, info: &BrowserSessionInfo, url: &str) -> Result<Value, ToolError> {
        let endpoint = self
            .service
            .automation_endpoint(&self.browser_id, info)
            .await
            .map_err(|e| ToolError::remote(SERVICE, e))?;
        let mut page = tokio::time::timeout(self.call_timeout, self.driver.connect(&endpoint))
            .await
            .map_err(|_| timed_out(self.call_timeout))??;

        let outcome = self.read_page(page.as_mut(), url).await;
        if let Err(e) = page.close().await {
            warn!(session_id = %info.session_id, error = %e, "Failed to close browser driver");
        }
        outcome
    }

    async fn read_page(&self, page: &mut dyn PageSession, url: &str) -> Result<Value, ToolError> {
        tokio::time::timeout(self.navigation_timeout, page.navigate(url))
            .await
            .map_err(|_| timed_out(self.navigation_timeout))??;
        info!(url, "Page loaded");

        let (title, content) = tokio::time::timeout(self.call_timeout, async {
            let title = page.title().await?;
            let content = page.body_text().await?;
            Ok::<_, ToolError>((title, content))
        })
        .await
        .map_err(|_| timed_out(self.call_timeout))??;

        Ok(json!({ "url": url, "title": title, "content": content }))
    }
}

fn timed_out(after: Duration) -> ToolError {
    ToolError::Timeout {
        tool_name: TOOL_NAME.into(),
        timeout_secs: after.as_secs(),
    }
}

fn validate_url(url: &str) -> Result<(), ToolError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ToolError::InvalidArguments(
            "URL must start with http:// or https://".into(),
        ))
    }
}

#[async_trait]
impl Tool for BrowserTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Navigate to a URL in a remote headless browser and extract the page title and \
         visible text. Use it to read web pages or pull information from sites."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to navigate to (http or https)"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        let outcome = match arguments["url"].as_str() {
            Some(url) => match validate_url(url) {
                Ok(()) => self.run(url).await,
                Err(e) => Err(e),
            },
            None => Err(ToolError::InvalidArguments("missing 'url' argument".into())),
        };

        match outcome {
            Ok(page) => Ok(ToolResult::ok(page.to_string())),
            Err(e) => {
                error!(tool = TOOL_NAME, error = ?e, "Browser action failed");
                Ok(ToolResult::failure(error_json(ERROR_CATEGORY, &e)))
            }
        }
    }
}
