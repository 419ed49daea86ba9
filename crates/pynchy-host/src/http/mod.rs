//! The host's own HTTP surface (§6 "HTTP surface"): status/control API plus
//! an SSE mirror of the internal event bus, bound loopback-only alongside
//! the embedded LLM/MCP gateway router built by `pynchy-gateway::app`.

pub mod api;
pub mod sse;
pub mod status;

use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use pynchy_bus::OutboundBus;
use pynchy_store::StateStore;
use tower_http::trace::TraceLayer;

pub use sse::HostEvent;

/// Shared state for every handler in this module — a thin read surface
/// over the state store and the event broadcaster, distinct from
/// `pynchy_gateway::GatewayState` (the LLM/MCP proxy's own state).
pub struct HttpState {
    pub store: Arc<StateStore>,
    pub bus: Arc<OutboundBus>,
    pub events: sse::HostEventBus,
    pub data_root: PathBuf,
}

pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(status::health))
        .route("/status", get(status::status))
        .route("/api/groups", get(api::list_groups))
        .route("/api/messages", get(api::list_messages))
        .route("/api/send", post(api::send_message))
        .route("/api/events", get(sse::events))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
