//! Model provider implementations for the hands-on agent runtime.
//!
//! All providers implement the `handson_core::Provider` trait.
//! [`build_from_config`] selects one from configuration.

pub mod bedrock;
pub mod echo;
pub mod router;

pub use bedrock::BedrockProvider;
pub use echo::EchoProvider;
pub use router::build_from_config;
