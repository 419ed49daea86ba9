use std::sync::Arc;

use axum::routing::{any, get, post};
use axum::{Json, Router};

use crate::state::GatewayState;

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Assembles the gateway's Axum router: the LLM reverse proxy under
/// `/v1/*`, the MCP proxy under `/mcp/*`, and a health endpoint (§4.6, §6).
pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/{*rest}", any(crate::llm_proxy::proxy))
        .route(
            "/mcp/{folder}/{invocation_ts}/{instance_id}/{*tail}",
            post(crate::mcp_proxy::proxy),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
