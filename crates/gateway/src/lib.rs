//! HTTP surface of the hands-on agent runtime.
//!
//! Two routes, the AgentCore runtime contract:
//! - `GET /ping`: liveness
//! - `POST /invocations`: one prompt in, one answer out
//!
//! Built on Axum. Business failures never change the status code; they are
//! folded into the response envelope by [`invocation::invoke`].

pub mod entrypoint;
pub mod invocation;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use handson_agent::AgentFactory;
use handson_aws::CredentialsProvider;
use handson_config::AppConfig;
use handson_core::Error;
use handson_tools::{ToolServices, build_registry};
use serde::Serialize;
use tracing::info;

pub use entrypoint::entrypoint;
pub use invocation::{InvocationRequest, InvocationResponse, invoke};

/// Request bodies above this are rejected with 413.
pub const BODY_LIMIT_BYTES: usize = 1024 * 1024;

/// Read-only state shared by every request.
pub struct GatewayState {
    pub factory: AgentFactory,
    pub default_actor_id: String,
    pub invocation_timeout: Duration,
    pub extended_ping: bool,
    /// Unix seconds at process start.
    pub started_at: i64,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn new(factory: AgentFactory, config: &AppConfig) -> Self {
        Self {
            factory,
            default_actor_id: config.session.default_actor_id.clone(),
            invocation_timeout: Duration::from_secs(config.timeouts.invocation_secs),
            extended_ping: config.server.extended_ping,
            started_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Wire provider, tools and optional memory from configuration.
    pub fn from_config(
        config: &AppConfig,
        credentials: Arc<dyn CredentialsProvider>,
    ) -> Result<Self, Error> {
        let provider = handson_providers::build_from_config(config, credentials.clone())?;
        let services = ToolServices::from_config(config, credentials.clone()).map_err(|e| {
            Error::Config {
                message: format!("tool services: {e}"),
            }
        })?;
        let tools = Arc::new(build_registry(config, &services, provider.clone()));

        let mut factory = AgentFactory::new(provider, tools, config);
        let store = handson_memory::build_from_config(config, credentials)?;
        if let (Some(store), Some(memory_id)) = (store, &config.memory.id) {
            info!(memory_id = %memory_id, store = store.name(), "Session memory enabled");
            factory = factory.with_store(store, memory_id);
        }
        Ok(Self::new(factory, config))
    }
}

/// Build the router with both routes, the body limit and trace logging.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/ping", get(ping_handler))
        .route("/invocations", post(invocations_handler))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl-C.
pub async fn start(
    config: &AppConfig,
    credentials: Arc<dyn CredentialsProvider>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(GatewayState::from_config(config, credentials)?);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, model = %config.model.model_id, "Agent runtime listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Agent runtime stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

// --- Handlers ---

#[derive(Serialize)]
struct PingResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_of_last_update: Option<i64>,
}

async fn ping_handler(State(state): State<SharedState>) -> Json<PingResponse> {
    Json(PingResponse {
        status: "healthy",
        time_of_last_update: state.extended_ping.then_some(state.started_at),
    })
}

async fn invocations_handler(
    State(state): State<SharedState>,
    Json(request): Json<InvocationRequest>,
) -> Json<InvocationResponse> {
    Json(invoke(&state, request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use handson_agent::testing::{ScriptedProvider, text_response};
    use handson_core::error::ProviderError;
    use handson_core::provider::{Provider, ProviderRequest, ProviderResponse};
    use handson_core::session::SessionKey;
    use handson_core::tool::ToolRegistry;
    use handson_memory::InMemorySessionStore;
    use handson_providers::EchoProvider;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn state_with(provider: Arc<dyn Provider>, config: &AppConfig) -> SharedState {
        let factory = AgentFactory::new(provider, Arc::new(ToolRegistry::new()), config);
        Arc::new(GatewayState::new(factory, config))
    }

    fn echo_app() -> Router {
        build_router(state_with(Arc::new(EchoProvider::new()), &AppConfig::default()))
    }

    fn post_json(body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/invocations")
            .header("content-type", "application/json")
            .body(body.into())
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn ping_is_healthy() {
        let req = Request::builder().uri("/ping").body(Body::empty()).unwrap();
        let response = echo_app().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "status": "healthy" }));
    }

    #[tokio::test]
    async fn extended_ping_reports_start_time() {
        let mut config = AppConfig::default();
        config.server.extended_ping = true;
        let state = state_with(Arc::new(EchoProvider::new()), &config);
        let started = state.started_at;

        let req = Request::builder().uri("/ping").body(Body::empty()).unwrap();
        let body = body_json(build_router(state).oneshot(req).await.unwrap()).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["time_of_last_update"], started);
    }

    #[tokio::test]
    async fn nested_request_echoes_session_id() {
        let body = json!({ "input": { "prompt": "こんにちは" }, "session_id": "sess-123" });
        let response = echo_app().oneshot(post_json(body.to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert!(body["output"]["response"].as_str().unwrap().contains("こんにちは"));
        assert_eq!(body["session_id"], "sess-123");
        assert!(body["output"].get("error").is_none());
    }

    #[tokio::test]
    async fn flat_request_without_session_has_no_session_key() {
        let response = echo_app()
            .oneshot(post_json(json!({ "prompt": "hello" }).to_string()))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["output"]["response"], "Echo: hello");
        assert!(body.get("session_id").is_none());
    }

    #[tokio::test]
    async fn missing_prompt_is_not_an_error() {
        let response = echo_app().oneshot(post_json("{}")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body["output"].get("error").is_none());
    }

    #[tokio::test]
    async fn malformed_requests_are_rejected_at_transport() {
        let response = echo_app().oneshot(post_json("{not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = echo_app()
            .oneshot(post_json(json!({ "prompt": 42 }).to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let prompt = "x".repeat(BODY_LIMIT_BYTES + 1);
        let response = echo_app()
            .oneshot(post_json(json!({ "prompt": prompt }).to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn provider_failure_is_a_200_envelope() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(
            ProviderError::AuthenticationFailed("expired token".into()),
        )]));
        let app = build_router(state_with(provider, &AppConfig::default()));

        let response = app
            .oneshot(post_json(json!({ "prompt": "hi", "session_id": "s" }).to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let text = body["output"]["response"].as_str().unwrap();
        assert!(text.starts_with("An error occurred: "));
        assert!(text.contains("expired token"));
        assert_eq!(body["output"]["error"]["kind"], "provider");
        assert_eq!(body["session_id"], "s");
    }

    struct StalledProvider;

    #[async_trait]
    impl Provider for StalledProvider {
        fn name(&self) -> &str {
            "stalled"
        }
        async fn complete(&self, _: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn invocation_timeout_yields_envelope() {
        let mut config = AppConfig::default();
        config.timeouts.invocation_secs = 3;
        let app = build_router(state_with(Arc::new(StalledProvider), &config));

        let response = app.oneshot(post_json(r#"{"prompt":"slow"}"#)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["output"]["error"]["kind"], "timeout");
        assert!(body["output"]["response"].as_str().unwrap().contains("timed out after 3s"));
    }

    #[tokio::test]
    async fn memory_rehydrates_by_session() {
        let mut config = AppConfig::default();
        config.memory.id = Some("mem-1".into());
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(text_response("Nice to meet you, Sam.")),
            Ok(text_response("Your name is Sam.")),
            Ok(text_response("Who?")),
        ]));
        let store = InMemorySessionStore::new();
        let factory = AgentFactory::new(provider.clone(), Arc::new(ToolRegistry::new()), &config)
            .with_store(Arc::new(store.clone()), "mem-1");
        let app = build_router(Arc::new(GatewayState::new(factory, &config)));

        let first = json!({ "input": { "prompt": "I am Sam", "actor_id": "u-1" }, "session_id": "conv-1" });
        app.clone().oneshot(post_json(first.to_string())).await.unwrap();
        let second = json!({ "input": { "prompt": "What is my name?", "actor_id": "u-1" }, "session_id": "conv-1" });
        let body = body_json(app.clone().oneshot(post_json(second.to_string())).await.unwrap()).await;
        assert_eq!(body["output"]["response"], "Your name is Sam.");

        let history: Vec<String> = provider.requests()[1]
            .messages
            .iter()
            .map(|m| m.content.clone())
            .collect();
        assert!(history.contains(&"I am Sam".to_string()));
        assert!(history.contains(&"Nice to meet you, Sam.".to_string()));
        let key = SessionKey::new("mem-1", "conv-1", "u-1").unwrap();
        assert_eq!(store.len(&key).await, 4);

        // No session id: a fresh one is used and not echoed.
        let body = body_json(app.oneshot(post_json(r#"{"prompt":"Who am I?"}"#)).await.unwrap()).await;
        assert!(body.get("session_id").is_none());
        assert_eq!(provider.requests()[2].messages.len(), 1);
    }

    #[tokio::test]
    async fn entrypoint_returns_response_only() {
        let state = state_with(Arc::new(EchoProvider::new()), &AppConfig::default());
        let out = entrypoint(&state, json!({ "prompt": "ping" })).await;
        assert_eq!(out, json!({ "response": "Echo: ping" }));

        let out = entrypoint(&state, json!({ "input": { "prompt": 1 } })).await;
        assert!(out["response"].as_str().unwrap().starts_with("An error occurred: invalid payload"));
    }
}
