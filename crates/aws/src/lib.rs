//! Signed clients for the managed services the runtime delegates to.
//!
//! Everything the runtime does not own (model inference, sandboxed code
//! execution, remote browsers, conversational memory, deployed runtimes) is
//! reached through the thin clients in this crate. They share one request
//! path: build a URL, sign it with AWS Signature V4 using ambient
//! credentials, send it with `reqwest`, and map failures into
//! [`PlatformError`].

pub mod browser;
pub mod client;
pub mod code_interpreter;
pub mod credentials;
pub mod error;
pub mod eventstream;
pub mod memory;
pub mod runtime;
pub mod sigv4;

pub use browser::{AutomationEndpoint, BrowserClient, BrowserSessionInfo};
pub use client::{SignedClient, agentcore_endpoint, bedrock_runtime_endpoint, error_for_status};
pub use code_interpreter::{CodeInterpreterClient, InterpreterEvent};
pub use credentials::{Credentials, CredentialsProvider, DefaultCredentials, StaticCredentials};
pub use error::PlatformError;
pub use eventstream::{EventStreamDecoder, Frame, HeaderValue};
pub use memory::{ConversationalTurn, MemoryClient, MemoryEvent};
pub use runtime::{RuntimeClient, new_runtime_session_id};
