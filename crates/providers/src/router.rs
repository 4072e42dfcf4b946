//! Provider selection from configuration.

use std::sync::Arc;
use std::time::Duration;

use handson_aws::{CredentialsProvider, SignedClient};
use handson_config::AppConfig;
use handson_core::error::ProviderError;
use handson_core::provider::Provider;
use tracing::info;

use crate::bedrock::BedrockProvider;
use crate::echo::EchoProvider;

/// SigV4 service name for the Bedrock runtime.
pub const BEDROCK_SERVICE: &str = "bedrock";

/// Build the configured provider (`bedrock` or `echo`).
pub fn build_from_config(
    config: &AppConfig,
    credentials: Arc<dyn CredentialsProvider>,
) -> Result<Arc<dyn Provider>, ProviderError> {
    let provider: Arc<dyn Provider> = match config.model.provider.as_str() {
        "echo" => Arc::new(EchoProvider::new()),
        "bedrock" => {
            let client = SignedClient::new(
                config.aws.region.clone(),
                BEDROCK_SERVICE,
                credentials,
                Duration::from_secs(config.timeouts.remote_call_secs),
            )
            .map_err(|e| ProviderError::NotConfigured(e.to_string()))?;
            Arc::new(BedrockProvider::new(client))
        }
        other => {
            return Err(ProviderError::NotConfigured(format!(
                "unknown model provider '{other}'"
            )));
        }
    };
    info!(provider = provider.name(), model = %config.model.model_id, region = %config.aws.region, "Model provider ready");
    Ok(provider)
}
