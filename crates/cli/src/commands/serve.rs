//! `handson serve`: start the HTTP runtime.

use std::sync::Arc;

use anyhow::Context;
use handson_aws::DefaultCredentials;
use handson_config::AppConfig;

pub async fn run(
    mut config: AppConfig,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    println!("Hands-on agent runtime");
    println!("   Listening: {}:{}", config.server.host, config.server.port);
    println!("   Model:     {} ({})", config.model.model_id, config.model.provider);

    let credentials = DefaultCredentials::load(&config.aws.region)
        .await
        .context("Failed to resolve AWS credentials")?;
    handson_gateway::start(&config, Arc::new(credentials))
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}
