//! REST API server
//!
//! Exposes the orchestrator over HTTP.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::agent::Orchestrator;
use crate::error::GenerationError;
use crate::finance::FinancialInputs;
use crate::models::{AssistantType, GenerationRequest, Scope};

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default)]
    pub assistant_type: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub document_ids: Vec<String>,
    #[serde(default)]
    pub use_documents: bool,
    #[serde(default)]
    pub web_search: bool,
    #[serde(default)]
    pub escalate: bool,
    #[serde(default)]
    pub sections: Vec<String>,
    #[serde(default)]
    pub financial_inputs: Option<FinancialInputs>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn error_with(message: String, data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            ..Self::error(message)
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

/// =============================
/// Helpers
/// =============================

fn stable_uuid_from_string(input: &str) -> uuid::Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    uuid::Uuid::from_bytes(bytes)
}

/// Non-UUID identifiers map to a stable UUID so callers can use their own keys.
fn parse_or_stable_uuid(value: Option<&str>, fallback_seed: &str) -> uuid::Uuid {
    match value {
        Some(v) if !v.trim().is_empty() => {
            uuid::Uuid::parse_str(v).unwrap_or_else(|_| stable_uuid_from_string(v))
        }
        _ => stable_uuid_from_string(fallback_seed),
    }
}

type Reply = (StatusCode, Json<ApiResponse>);

fn bad_request(message: impl Into<String>) -> Reply {
    (StatusCode::BAD_REQUEST, Json(ApiResponse::error(message.into())))
}

/// Validate the body and turn it into a pipeline request.
pub fn to_generation_request(req: GenerateRequest) -> Result<GenerationRequest, String> {
    if req.prompt.trim().is_empty() {
        return Err("prompt must not be empty".to_string());
    }

    let assistant_type = match req.assistant_type.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(AssistantType::parse(raw).ok_or_else(|| format!("unknown assistant_type \"{}\"", raw))?),
    };

    if let Some(inputs) = &req.financial_inputs {
        if let Err(fields) = inputs.validate() {
            return Err(GenerationError::InvalidFinancialInputs(fields).to_string());
        }
    }

    let scope = Scope {
        tenant_id: parse_or_stable_uuid(req.tenant_id.as_deref(), "default-tenant"),
        user_id: parse_or_stable_uuid(req.user_id.as_deref(), "anonymous-user"),
        document_ids: req.document_ids,
    };

    let mut request = GenerationRequest::new(scope, req.prompt.trim());
    request.assistant_type = assistant_type;
    request.use_documents = req.use_documents;
    request.force_web_search = req.web_search;
    request.escalate = req.escalate;
    request.sections = req.sections;
    request.financial_inputs = req.financial_inputs;
    Ok(request)
}

fn error_reply(err: GenerationError) -> Reply {
    match err {
        GenerationError::QuotaExceeded { message, reset_at } => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ApiResponse::error_with(
                format!("Quota exceeded: {}", message),
                serde_json::json!({ "reset_at": reset_at.to_rfc3339() }),
            )),
        ),
        GenerationError::InvalidPlan(message) => bad_request(format!("Invalid request: {}", message)),
        other => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(format!("Generation failed: {}", other))),
        ),
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Generation Endpoint
/// =============================

async fn generate(
    State(state): State<ApiState>,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> Reply {
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(format!("Invalid request body: {}", rejection.body_text())),
    };

    let request = match to_generation_request(req) {
        Ok(request) => request,
        Err(message) => return bad_request(message),
    };

    info!(
        request_id = %request.request_id,
        tenant_id = %request.scope.tenant_id,
        "Received generation request"
    );

    match state.orchestrator.run(request).await {
        Ok(response) => (StatusCode::OK, Json(ApiResponse::success(response))),
        Err(e) => {
            warn!(error = %e, "Generation request rejected");
            error_reply(e)
        }
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/generate", post(generate))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExecutorConfig, PolicyConfig};
    use crate::execution::Executor;
    use crate::llm::MockModelProvider;
    use crate::planner::RulePlanner;
    use crate::state::InMemoryQuota;
    use crate::verification::PolicyValidator;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn router(quota: u32) -> Router {
        let executor = Executor::new(
            ExecutorConfig::default(),
            Arc::new(MockModelProvider::new("## Answer\nOpen earlier on weekends.\n\n## Sources\nNone.")),
            PolicyValidator::new(PolicyConfig::default()),
            Arc::new(InMemoryQuota::new(quota)),
        );
        create_router(Arc::new(Orchestrator::new(Box::new(RulePlanner::new()), executor)))
    }

    fn post_json(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/generate")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn read(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = router(1)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_generate_returns_response() {
        let response = router(5)
            .oneshot(post_json(r#"{"prompt": "How can my bakery sell more?", "assistant_type": "general"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = read(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["assistant_type"], "general");
        assert_eq!(body["data"]["sections"][0]["title"], "Answer");
        assert_eq!(body["data"]["validation"]["valid"], true);
    }

    #[tokio::test]
    async fn test_quota_exhaustion_is_429_with_reset() {
        let app = router(1);
        let body = r#"{"prompt": "hello", "tenant_id": "acme"}"#;

        let first = app.clone().oneshot(post_json(body)).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(post_json(body)).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = read(second).await;
        assert_eq!(body["success"], false);
        assert!(body["data"]["reset_at"].is_string());
    }

    #[tokio::test]
    async fn test_invalid_bodies_are_400() {
        let cases = [
            r#"{"prompt": "   "}"#,
            r#"{"prompt": "hi", "assistant_type": "poem"}"#,
            r#"{"prompt": "hi", "financial_inputs": {"arpu": 10, "cogs_pct": 0.2, "churn_rate": 3.0, "new_customers_per_month": 5}}"#,
            r#"{"prompt": "#,
        ];
        for case in cases {
            let response = router(5).oneshot(post_json(case)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", case);
            assert_eq!(read(response).await["success"], false);
        }
    }

    #[test]
    fn test_identifiers_are_stable() {
        let id = uuid::Uuid::new_v4();
        assert_eq!(parse_or_stable_uuid(Some(&id.to_string()), "x"), id);
        assert_eq!(
            parse_or_stable_uuid(Some("acme"), "x"),
            parse_or_stable_uuid(Some("acme"), "y")
        );
        assert_eq!(parse_or_stable_uuid(None, "seed"), parse_or_stable_uuid(Some(""), "seed"));
    }
}
