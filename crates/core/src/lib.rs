//! # Hands-on Core
//!
//! Domain types, traits, and error definitions for the hands-on agent runtime.
//! This crate has **no framework dependencies**: it defines the domain model
//! that every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every remote collaborator is a trait here (model backend, tool, session
//! store). Implementations live in their respective crates, which keeps the
//! dependency graph pointing inward and lets tests swap in doubles.

pub mod error;
pub mod message;
pub mod provider;
pub mod session;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use message::{Conversation, ConversationId, Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use session::{SessionKey, SessionStore};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
