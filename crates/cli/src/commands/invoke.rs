//! `handson invoke`: call a deployed agent runtime.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use handson_aws::{DefaultCredentials, RuntimeClient, SignedClient, new_runtime_session_id};
use handson_config::AppConfig;
use serde_json::{Value, json};
use tracing::info;

const AGENTCORE_SERVICE: &str = "bedrock-agentcore";
const QUALIFIER: &str = "DEFAULT";

pub async fn run(
    config: AppConfig,
    runtime_arn: String,
    prompt: String,
    region: Option<String>,
) -> anyhow::Result<()> {
    let region = region.unwrap_or(config.aws.region);
    let credentials = DefaultCredentials::load(&region)
        .await
        .context("Failed to resolve AWS credentials")?;
    let client = SignedClient::new(
        region,
        AGENTCORE_SERVICE,
        Arc::new(credentials),
        Duration::from_secs(config.timeouts.invocation_secs),
    )?;

    let session_id = new_runtime_session_id();
    info!(runtime_arn = %runtime_arn, session_id = %session_id, "Invoking deployed runtime");
    let body = RuntimeClient::new(client)
        .invoke(&runtime_arn, &session_id, QUALIFIER, &json!({ "input": { "prompt": prompt } }))
        .await?;

    println!("{}", render(&body));
    Ok(())
}

/// The `output.response` text when the body is an envelope, else the raw body.
fn render(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["output"]["response"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}
