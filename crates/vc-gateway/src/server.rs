//! HTTP server: provider webhooks, media streams, and the agent tool endpoint

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, RawQuery, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use vc_core::config::ServeConfig;
use vc_core::{
    CallManager, EventOutcome, ProviderAdapter, ToolManager, WebhookParseResult, WebhookRequest,
};
use vc_media::MediaStreamBridge;

use crate::error::{GatewayError, Result};
use crate::stream;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub manager: CallManager,
    pub provider: Arc<dyn ProviderAdapter>,
    /// Present when media streaming is enabled
    pub bridge: Option<Arc<MediaStreamBridge>>,
    pub tools: Arc<ToolManager>,
    /// Public webhook URL without query string, as the provider signs it
    pub webhook_url: String,
}

/// Build the gateway router
pub fn router(state: AppState, serve: &ServeConfig) -> Router {
    let mut router = Router::new()
        .route(&serve.webhook_path, post(webhook))
        .route("/tools", get(list_tools))
        .route("/tools/{name}", post(invoke_tool))
        .route("/calls", get(list_calls))
        .route("/health", get(health));

    if state.bridge.is_some() {
        router = router.route(&serve.stream_path, get(stream::websocket_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Start serving until `shutdown` resolves
pub async fn serve(
    state: AppState,
    serve: &ServeConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = router(state, serve);
    let listener = tokio::net::TcpListener::bind((serve.bind.as_str(), serve.port)).await?;
    info!("Voice call gateway listening on {}", listener.local_addr()?);
    info!("Webhook endpoint: {}", serve.webhook_path);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn webhook(
    State(state): State<AppState>,
    method: Method,
    RawQuery(raw_query): RawQuery,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let url = match raw_query {
        Some(raw) if !raw.is_empty() => format!("{}?{}", state.webhook_url, raw),
        _ => state.webhook_url.clone(),
    };
    let headers = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_lowercase(), value.to_string()))
        })
        .collect();

    let request = WebhookRequest {
        method: method.to_string(),
        url,
        headers,
        query,
        body,
    };
    webhook_response(process_webhook(&state, &request).await)
}

/// Parse a webhook with the provider and apply its events in order.
///
/// When the manager refuses an inbound call the provider's rejection
/// response replaces the normal one.
pub async fn process_webhook(state: &AppState, request: &WebhookRequest) -> WebhookParseResult {
    let result = state.provider.parse_webhook(request);
    if result.status_code >= 400 {
        warn!(
            status = result.status_code,
            "Webhook rejected by {} adapter",
            state.provider.name()
        );
        return result;
    }

    let mut rejected = false;
    for event in &result.events {
        let event_type = event.kind.type_name();
        let outcome = state.manager.process_event(event.clone()).await;
        debug!(
            event_id = %event.id,
            event_type,
            outcome = outcome_label(&outcome),
            "Webhook event processed"
        );
        if outcome == EventOutcome::Rejected {
            rejected = true;
        }
    }

    if rejected {
        if let Some(response) = state.provider.rejection_response() {
            return response;
        }
    }
    result
}

fn outcome_label(outcome: &EventOutcome) -> &'static str {
    match outcome {
        EventOutcome::Applied(_) => "applied",
        EventOutcome::Duplicate => "duplicate",
        EventOutcome::Rejected => "rejected",
        EventOutcome::CallEnded => "call-ended",
        EventOutcome::UnknownCall => "unknown-call",
    }
}

fn webhook_response(result: WebhookParseResult) -> Response {
    let status = StatusCode::from_u16(result.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut headers = HeaderMap::new();
    for (name, value) in &result.response_headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "Dropping invalid response header"),
        }
    }
    (status, headers, result.response_body.unwrap_or_default()).into_response()
}

async fn invoke_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: String,
) -> Result<Response> {
    let input: Value = if body.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(&body).map_err(|e| GatewayError::InvalidRequest(e.to_string()))?
    };

    let tool = state
        .tools
        .get(&name)
        .ok_or_else(|| GatewayError::ToolNotFound(name.clone()))?;

    info!(tool = %name, "Tool invoked");
    let result = tool.execute(input).await?;
    if result.is_error {
        debug!(tool = %name, "Tool reported failure: {}", result.output);
    }

    Ok(([(header::CONTENT_TYPE, "application/json")], result.output).into_response())
}

async fn list_tools(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.tools.definitions())
}

async fn list_calls(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.manager.active_calls().await)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "provider": state.provider.name(),
        "activeCalls": state.manager.active_calls().await.len(),
        "activeStreams": state.bridge.as_ref().map(|b| b.active_streams()).unwrap_or(0),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;
    use vc_core::config::InboundPolicy;
    use vc_core::{
        AdmissionPolicy, CallRegistry, ManagerSettings, MemoryCallStore, MockProvider,
    };

    fn test_state(admission: AdmissionPolicy) -> AppState {
        let provider = Arc::new(MockProvider::new());
        let settings = ManagerSettings {
            from_number: "+15550000000".to_string(),
            admission,
            ..Default::default()
        };
        let manager = CallManager::new(
            settings,
            CallRegistry::new(),
            provider.clone(),
            Arc::new(MemoryCallStore::new()),
        );
        let mut tools = ToolManager::new();
        vc_tools::register_call_tools(&mut tools, manager.clone(), None);

        AppState {
            manager,
            provider,
            bridge: None,
            tools: Arc::new(tools),
            webhook_url: "https://example.test/voice/webhook".to_string(),
        }
    }

    fn app(state: AppState) -> Router {
        router(state, &ServeConfig::default())
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn ringing_event(id: &str) -> String {
        json!({
            "id": id,
            "callId": "",
            "providerCallId": "CA100",
            "timestamp": "2026-01-01T00:00:00Z",
            "direction": "inbound",
            "from": "+15551234567",
            "to": "+15550000000",
            "type": "call.ringing"
        })
        .to_string()
    }

    fn post(uri: &str, body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app(test_state(AdmissionPolicy::open()))
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["provider"], "mock");
        assert_eq!(body["activeCalls"], 0);
    }

    #[tokio::test]
    async fn test_webhook_admits_inbound_call() {
        let state = test_state(AdmissionPolicy::open());

        let response = app(state.clone())
            .oneshot(post("/voice/webhook", ringing_event("evt-1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let calls = state.manager.active_calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].provider_call_id.as_deref(), Some("CA100"));

        let listed = app(state)
            .oneshot(Request::builder().uri("/calls").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(listed).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_webhook_refused_inbound_call() {
        let state = test_state(AdmissionPolicy::new(InboundPolicy::Disabled, &[], 7));

        let request = WebhookRequest {
            method: "POST".to_string(),
            body: ringing_event("evt-2"),
            ..Default::default()
        };
        let result = process_webhook(&state, &request).await;

        assert_eq!(result.status_code, 200);
        assert!(state.manager.active_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_webhook_body() {
        let response = app(test_state(AdmissionPolicy::open()))
            .oneshot(post("/voice/webhook", "not json".to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_tool_endpoint() {
        let state = test_state(AdmissionPolicy::open());

        let response = app(state.clone())
            .oneshot(post(
                "/tools/initiate_call",
                json!({"to": "+15551112222", "mode": "conversation"}).to_string(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        let call_id = body["callId"].as_str().unwrap().to_string();

        let status = app(state)
            .oneshot(post("/tools/get_status", json!({"callId": call_id}).to_string()))
            .await
            .unwrap();
        let body = body_json(status).await;
        assert_eq!(body["status"], "initiated");
    }

    #[tokio::test]
    async fn test_tool_definitions_listed() {
        let response = app(test_state(AdmissionPolicy::open()))
            .oneshot(Request::builder().uri("/tools").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let body = body_json(response).await;
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec!["continue_call", "end_call", "get_status", "initiate_call", "speak_to_user"]
        );
        assert_eq!(body[0]["input_schema"]["required"][0], "callId");
    }

    #[tokio::test]
    async fn test_unknown_tool_and_bad_json() {
        let state = test_state(AdmissionPolicy::open());

        let missing = app(state.clone())
            .oneshot(post("/tools/launch_rocket", "{}".to_string()))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let bad = app(state)
            .oneshot(post("/tools/get_status", "{".to_string()))
            .await
            .unwrap();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stream_route_absent_without_bridge() {
        let response = app(test_state(AdmissionPolicy::open()))
            .oneshot(Request::builder().uri("/voice/stream").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_webhook_response_headers() {
        let result = WebhookParseResult::ok(Vec::new()).with_body("application/xml", "<Response/>");
        let response = webhook_response(result);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/xml"
        );
    }
}
