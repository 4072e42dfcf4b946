//! `handson run`: one invocation through the in-process entrypoint.

use std::sync::Arc;

use anyhow::Context;
use handson_aws::DefaultCredentials;
use handson_config::AppConfig;
use handson_gateway::{GatewayState, entrypoint};
use serde_json::{Value, json};

pub async fn run(
    config: AppConfig,
    prompt: Option<String>,
    payload: Option<String>,
    session_id: Option<String>,
    actor_id: Option<String>,
) -> anyhow::Result<()> {
    let payload = build_payload(
        prompt,
        payload.as_deref(),
        session_id.or_else(|| config.session.default_session_id.clone()),
        actor_id,
    )?;

    let credentials = DefaultCredentials::load(&config.aws.region)
        .await
        .context("Failed to resolve AWS credentials")?;
    let state = GatewayState::from_config(&config, Arc::new(credentials))
        .context("Failed to build the agent")?;
    let output = entrypoint(&state, payload).await;
    println!("{}", output["response"].as_str().unwrap_or_default());
    Ok(())
}

/// The invocation payload: `--payload` verbatim, otherwise built from flags.
fn build_payload(
    prompt: Option<String>,
    raw: Option<&str>,
    session_id: Option<String>,
    actor_id: Option<String>,
) -> anyhow::Result<Value> {
    if let Some(raw) = raw {
        return serde_json::from_str(raw).context("--payload is not valid JSON");
    }

    let mut input = json!({ "prompt": prompt.unwrap_or_default() });
    if let Some(actor_id) = actor_id {
        input["actor_id"] = json!(actor_id);
    }
    let mut payload = json!({ "input": input });
    if let Some(session_id) = session_id {
        payload["session_id"] = json!(session_id);
    }
    Ok(payload)
}
