//! `GET /api/groups`, `GET /api/messages`, `POST /api/send` (§6).

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use pynchy_bus::BroadcastOptions;
use pynchy_core::types::ChatJid;
use pynchy_store::Workspace;
use serde::{Deserialize, Serialize};

use super::HttpState;

pub async fn list_groups(State(state): State<Arc<HttpState>>) -> Result<Json<Vec<Workspace>>, ApiError> {
    let workspaces = state.store.list_workspaces()?;
    Ok(Json(workspaces))
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    jid: String,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn list_messages(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Vec<pynchy_store::Message>>, ApiError> {
    let jid = ChatJid::from(query.jid);
    let messages = state.store.recent_messages_for_chat(&jid, query.limit.max(1))?;
    Ok(Json(messages))
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    jid: String,
    content: String,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    delivered_to: usize,
}

pub async fn send_message(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<SendRequest>,
) -> Result<Json<SendResponse>, ApiError> {
    let jid = ChatJid::from(req.jid);
    let outcomes = state
        .bus
        .broadcast(&jid, &req.content, &BroadcastOptions::host())
        .await
        .map_err(|e| ApiError(StatusCode::BAD_GATEWAY, e.to_string()))?;
    let delivered_to = outcomes.iter().filter(|o| o.error.is_none()).count();
    Ok(Json(SendResponse { delivered_to }))
}

pub struct ApiError(StatusCode, String);

impl From<pynchy_store::StoreError> for ApiError {
    fn from(e: pynchy_store::StoreError) -> Self {
        ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.0, self.1).into_response()
    }
}
