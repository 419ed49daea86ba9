use std::sync::Arc;

use dashmap::DashMap;
use pynchy_approval::ApprovalCoordinator;
use pynchy_bus::OutboundBus;
use pynchy_core::config::{GatewayConfig, SecretsConfig};
use pynchy_core::types::ChatJid;
use pynchy_security::GateRegistry;
use rand::Rng;

use crate::mcp::McpRegistry;

/// Which provider credential the LLM proxy injects for a request, resolved
/// once at startup from `[secrets]` (§4.6 "Anthropic API key -> OAuth token
/// -> CLI-stored OAuth, in that order").
#[derive(Debug, Clone)]
pub enum AnthropicCredential {
    ApiKey(String),
    OauthToken(String),
}

/// Process-wide gateway state shared across every Axum handler.
pub struct GatewayState {
    pub config: GatewayConfig,
    /// `gw-<32 urlsafe bytes>`, checked against every inbound request's
    /// `Authorization`/`X-Api-Key` header.
    pub ephemeral_key: String,
    pub anthropic_credential: Option<AnthropicCredential>,
    pub openai_api_key: Option<String>,
    pub gates: GateRegistry,
    pub approvals: Arc<ApprovalCoordinator>,
    pub bus: Arc<OutboundBus>,
    /// Shared (not owned) so the idle-checker background loop can hold its
    /// own `Arc<McpRegistry>` alongside the one embedded here.
    pub mcp: Arc<McpRegistry>,
    pub http: reqwest::Client,
    /// Which chat to notify for approvals raised during a given
    /// `(folder, invocation_ts)` invocation; populated by the orchestrator
    /// alongside the security gate itself.
    pub invocation_chat_jids: DashMap<(String, String), ChatJid>,
}

impl GatewayState {
    pub fn new(
        config: GatewayConfig,
        secrets: &SecretsConfig,
        gates: GateRegistry,
        approvals: Arc<ApprovalCoordinator>,
        bus: Arc<OutboundBus>,
        mcp: McpRegistry,
    ) -> Self {
        let anthropic_credential = secrets
            .anthropic_api_key
            .clone()
            .map(AnthropicCredential::ApiKey)
            .or_else(|| secrets.claude_oauth_token.clone().map(AnthropicCredential::OauthToken));

        Self {
            config,
            ephemeral_key: generate_ephemeral_key(),
            anthropic_credential,
            openai_api_key: secrets.openai_api_key.clone(),
            gates,
            approvals,
            bus,
            mcp: Arc::new(mcp),
            http: reqwest::Client::new(),
            invocation_chat_jids: DashMap::new(),
        }
    }

    pub fn check_auth(&self, header: Option<&str>, api_key_header: Option<&str>) -> bool {
        let bearer = header.and_then(|h| h.strip_prefix("Bearer "));
        bearer == Some(self.ephemeral_key.as_str()) || api_key_header == Some(self.ephemeral_key.as_str())
    }

    /// Called when a new agent invocation starts (alongside registering its
    /// security gate), so the MCP proxy knows which chat to notify for an
    /// approval raised mid-invocation.
    pub fn register_invocation(&self, folder: &str, invocation_ts: &str, chat_jid: ChatJid) {
        self.invocation_chat_jids.insert((folder.to_string(), invocation_ts.to_string()), chat_jid);
    }

    pub fn unregister_invocation(&self, folder: &str, invocation_ts: &str) {
        self.invocation_chat_jids.remove(&(folder.to_string(), invocation_ts.to_string()));
    }
}

/// `gw-<32 urlsafe bytes>` (§4.6). Immutable after start (§5 "Shared
/// resources").
fn generate_ephemeral_key() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
    let mut rng = rand::thread_rng();
    let body: String = (0..32).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char).collect();
    format!("gw-{body}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ephemeral_key_has_expected_shape() {
        let key = generate_ephemeral_key();
        assert!(key.starts_with("gw-"));
        assert_eq!(key.len(), 3 + 32);
    }
}
