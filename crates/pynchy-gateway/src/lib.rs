//! LLM + MCP gateway (§4.6): the reverse proxy that authenticates containers
//! with an ephemeral key, substitutes real provider credentials, and routes
//! MCP traffic through the per-invocation security gate. Runs inside the
//! host process as an Axum router mounted by `pynchy-host`'s lifecycle
//! orchestrator — it has no binary of its own, since the gateway must share
//! the approval coordinator, outbound bus, and gate registry with the rest
//! of the single-process runtime (§5).

pub mod app;
pub mod cop;
pub mod error;
pub mod llm_proxy;
pub mod mcp;
pub mod mcp_proxy;
pub mod state;

pub use app::build_router;
pub use error::{GatewayError, Result};
pub use mcp::{McpInstance, McpLaunch, McpRegistry, McpServerSpec};
pub use state::{AnthropicCredential, GatewayState};
