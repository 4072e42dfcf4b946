//! Code execution tool over the remote code interpreter.
//!
//! One call = one sandbox session: start, submit the snippet as
//! `executeCode`, drain the event stream through an [`EventReducer`], stop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use handson_aws::code_interpreter::InterpreterEventStream;
use handson_aws::{CodeInterpreterClient, InterpreterEvent, PlatformError};
use handson_core::error::ToolError;
use handson_core::tool::{Tool, ToolResult};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::error_json;
use crate::scope::{Release, Scoped};

pub const TOOL_NAME: &str = "execute_python";
const ERROR_CATEGORY: &str = "Code execution failed";
const SERVICE: &str = "code-interpreter";

/// Returned when the stream carried nothing the reducer keeps.
pub const NO_OUTPUT: &str = "Execution complete (no output)";

/// The remote sandbox, as the tool sees it.
#[async_trait]
pub trait SandboxService: Send + Sync {
    async fn start_session(
        &self,
        interpreter_id: &str,
        timeout_secs: u64,
    ) -> Result<String, PlatformError>;

    /// Run `executeCode` with the given arguments and stream its events.
    async fn execute_code(
        &self,
        interpreter_id: &str,
        session_id: &str,
        arguments: Value,
    ) -> Result<InterpreterEventStream, PlatformError>;

    async fn stop_session(&self, interpreter_id: &str, session_id: &str)
    -> Result<(), PlatformError>;
}

#[async_trait]
impl SandboxService for CodeInterpreterClient {
    async fn start_session(
        &self,
        interpreter_id: &str,
        timeout_secs: u64,
    ) -> Result<String, PlatformError> {
        CodeInterpreterClient::start_session(self, interpreter_id, timeout_secs).await
    }

    async fn execute_code(
        &self,
        interpreter_id: &str,
        session_id: &str,
        arguments: Value,
    ) -> Result<InterpreterEventStream, PlatformError> {
        self.invoke(interpreter_id, session_id, "executeCode", arguments)
            .await
    }

    async fn stop_session(
        &self,
        interpreter_id: &str,
        session_id: &str,
    ) -> Result<(), PlatformError> {
        CodeInterpreterClient::stop_session(self, interpreter_id, session_id).await
    }
}

/// One decoded sandbox stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    Result(Value),
    Stdout(String),
    StructuredContent(Value),
    Other(String),
}

impl From<InterpreterEvent> for ExecutionEvent {
    fn from(event: InterpreterEvent) -> Self {
        match event.event_type.as_str() {
            "result" => ExecutionEvent::Result(event.payload),
            "stdout" => ExecutionEvent::Stdout(match event.payload {
                Value::String(text) => text,
                other => other
                    .get("text")
                    .or_else(|| other.get("stdout"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| other.to_string()),
            }),
            "structuredContent" => ExecutionEvent::StructuredContent(event.payload),
            other => ExecutionEvent::Other(other.to_string()),
        }
    }
}

/// Folds a stream of events into the single text the model sees.
///
/// Priority: the last `result`, else all `stdout` concatenated, else the
/// last `structuredContent`, else [`NO_OUTPUT`].
#[derive(Debug, Default)]
pub struct EventReducer {
    last_result: Option<Value>,
    stdout: Option<String>,
    last_structured: Option<Value>,
}

impl EventReducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: ExecutionEvent) {
        match event {
            ExecutionEvent::Result(v) => self.last_result = Some(v),
            ExecutionEvent::Stdout(text) => self.stdout.get_or_insert_with(String::new).push_str(&text),
            ExecutionEvent::StructuredContent(v) => self.last_structured = Some(v),
            ExecutionEvent::Other(kind) => debug!(kind = %kind, "Ignoring sandbox event"),
        }
    }

    pub fn finish(self) -> String {
        if let Some(result) = self.last_result {
            return result.to_string();
        }
        if let Some(stdout) = self.stdout {
            return stdout;
        }
        if let Some(structured) = self.last_structured {
            return structured.to_string();
        }
        NO_OUTPUT.to_string()
    }
}

#[derive(Clone)]
struct SandboxSession {
    service: Arc<dyn SandboxService>,
    interpreter_id: String,
    session_id: String,
}

#[async_trait]
impl Release for SandboxSession {
    fn label(&self) -> String {
        format!("{SERVICE} session {}", self.session_id)
    }

    async fn release(self) -> Result<(), ToolError> {
        self.service
            .stop_session(&self.interpreter_id, &self.session_id)
            .await
            .map_err(|e| ToolError::remote(SERVICE, e))
    }
}

pub struct CodeInterpreterTool {
    service: Arc<dyn SandboxService>,
    interpreter_id: String,
    session_timeout_secs: u64,
    call_timeout: Duration,
}

impl CodeInterpreterTool {
    pub fn new(
        service: Arc<dyn SandboxService>,
        interpreter_id: impl Into<String>,
        session_timeout_secs: u64,
        call_timeout: Duration,
    ) -> Self {
        Self {
            service,
            interpreter_id: interpreter_id.into(),
            session_timeout_secs,
            call_timeout,
        }
    }

    /// A start that outlives the call timeout is abandoned without a stop:
    /// no session id came back, so a session the service did open is left
    /// to its own `session_timeout_secs` expiry.
    async fn run(&self, code: String) -> Result<String, ToolError> {
        let session_id = tokio::time::timeout(
            self.call_timeout,
            self.service
                .start_session(&self.interpreter_id, self.session_timeout_secs),
        )
        .await
        .map_err(|_| {
            warn!(
                interpreter = %self.interpreter_id,
                expires_after_secs = self.session_timeout_secs,
                "Sandbox start timed out; any session it opened expires on its own"
            );
            self.timed_out()
        })?
        .map_err(|e| ToolError::remote(SERVICE, e))?;
        info!(interpreter = %self.interpreter_id, session_id = %session_id, "Sandbox session started");

        let session = Scoped::new(SandboxSession {
            service: self.service.clone(),
            interpreter_id: self.interpreter_id.clone(),
            session_id,
        });

        let outcome = tokio::time::timeout(self.call_timeout, self.drain(&session, code))
            .await
            .unwrap_or_else(|_| Err(self.timed_out()));
        session.release().await;
        outcome
    }

    async fn drain(&self, session: &SandboxSession, code: String) -> Result<String, ToolError> {
        let arguments = json!({ "code": code, "language": "python", "clearContext": false });
        let mut events = self
            .service
            .execute_code(&session.interpreter_id, &session.session_id, arguments)
            .await
            .map_err(|e| ToolError::remote(SERVICE, e))?;

        let mut reducer = EventReducer::new();
        while let Some(event) = events.next().await {
            let event = event.map_err(|e| ToolError::remote(SERVICE, e))?;
            debug!(event_type = %event.event_type, "Sandbox event");
            reducer.push(event.into());
        }
        Ok(reducer.finish())
    }

    fn timed_out(&self) -> ToolError {
        ToolError::Timeout {
            tool_name: TOOL_NAME.into(),
            timeout_secs: self.call_timeout.as_secs(),
        }
    }
}

#[async_trait]
impl Tool for CodeInterpreterTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Execute Python code in a sandboxed Code Interpreter environment. Use it for data \
         analysis, calculations and file processing. Returns the execution result as a JSON \
         string, or an error message if execution fails."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "The Python code to execute. Should be valid Python syntax."
                },
                "description": {
                    "type": "string",
                    "description": "Optional description of what the code does. Added as a comment.",
                    "default": ""
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        let Some(code) = arguments["code"].as_str() else {
            let e = ToolError::InvalidArguments("missing 'code' argument".into());
            error!(tool = TOOL_NAME, error = ?e, "Code execution failed");
            return Ok(ToolResult::failure(error_json(ERROR_CATEGORY, &e)));
        };
        let code = match arguments["description"].as_str() {
            Some(description) if !description.is_empty() => format!("# {description}\n{code}"),
            _ => code.to_string(),
        };

        match self.run(code).await {
            Ok(output) => Ok(ToolResult::ok(output)),
            Err(e) => {
                error!(tool = TOOL_NAME, error = ?e, "Code execution failed");
                Ok(ToolResult::failure(error_json(ERROR_CATEGORY, &e)))
            }
        }
    }
}
