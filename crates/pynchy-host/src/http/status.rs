//! `GET /status` and `GET /health` (§6).

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::boot_warnings;

use super::HttpState;

pub async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    version: &'static str,
    workspace_count: usize,
    boot_warnings: Vec<boot_warnings::BootWarning>,
}

pub async fn status(State(state): State<Arc<HttpState>>) -> Json<StatusResponse> {
    let workspace_count = state.store.list_workspaces().map(|ws| ws.len()).unwrap_or(0);
    let warnings = boot_warnings::current(&state.data_root);

    Json(StatusResponse { version: env!("CARGO_PKG_VERSION"), workspace_count, boot_warnings: warnings })
}
