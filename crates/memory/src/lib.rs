//! Session store implementations for the hands-on agent runtime.

pub mod agentcore;
pub mod in_memory;

pub use agentcore::AgentCoreSessionStore;
pub use in_memory::InMemorySessionStore;

use std::sync::Arc;
use std::time::Duration;

use handson_aws::{CredentialsProvider, MemoryClient, SignedClient};
use handson_config::AppConfig;
use handson_core::error::MemoryError;
use handson_core::session::SessionStore;

/// SigV4 service name for AgentCore data-plane calls.
pub const AGENTCORE_SERVICE: &str = "bedrock-agentcore";

/// Build the remote store when `memory.id` is configured; `None` otherwise.
pub fn build_from_config(
    config: &AppConfig,
    credentials: Arc<dyn CredentialsProvider>,
) -> Result<Option<Arc<dyn SessionStore>>, MemoryError> {
    if !config.memory_enabled() {
        return Ok(None);
    }
    let client = SignedClient::new(
        config.aws.region.clone(),
        AGENTCORE_SERVICE,
        credentials,
        Duration::from_secs(config.timeouts.remote_call_secs),
    )
    .map_err(|e| MemoryError::Storage(e.to_string()))?;
    Ok(Some(Arc::new(AgentCoreSessionStore::new(MemoryClient::new(client)))))
}
