//! Wires `RouterEngine`'s invocation lifecycle into the gateway's security
//! gate registry (§4.9, §4.10): every cold start/warm pipe registers a gate
//! before the container can make its first MCP call, and every settle tears
//! it back down.

use std::collections::HashMap;
use std::sync::Arc;

use pynchy_core::config::WorkspaceSecurityConfig;
use pynchy_core::types::ChatJid;
use pynchy_gateway::GatewayState;
use pynchy_router::InvocationGateHook;
use pynchy_security::GatePolicy;

/// Thin adapter: `pynchy-router` only knows about the `InvocationGateHook`
/// seam, never about `pynchy-gateway` directly, so this lives in the host
/// binary where both crates are already dependencies.
pub struct GatewayGateHook {
    gateway: Arc<GatewayState>,
}

impl GatewayGateHook {
    pub fn new(gateway: Arc<GatewayState>) -> Self {
        Self { gateway }
    }
}

impl InvocationGateHook for GatewayGateHook {
    fn register_invocation(
        &self,
        folder: &str,
        invocation_ts: &str,
        chat_jid: &str,
        is_admin: bool,
        security: &WorkspaceSecurityConfig,
    ) {
        let policy = to_gate_policy(is_admin, security);
        self.gateway.gates.register(folder, invocation_ts, policy);
        self.gateway.register_invocation(folder, invocation_ts, ChatJid::from(chat_jid));
    }

    fn unregister_invocation(&self, folder: &str, invocation_ts: &str) {
        self.gateway.gates.unregister(folder, invocation_ts);
        self.gateway.unregister_invocation(folder, invocation_ts);
    }
}

fn to_gate_policy(is_admin: bool, security: &WorkspaceSecurityConfig) -> GatePolicy {
    let tool_tiers: HashMap<String, _> = security.tool_tiers.clone();
    GatePolicy {
        is_admin,
        tool_tiers,
        default_tier: security.default_tier,
        max_calls_per_hour: security.max_calls_per_hour,
        tool_rate_limits: security.tool_rate_limits.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pynchy_core::config::RiskTier;

    #[test]
    fn admin_flag_carries_through_to_policy() {
        let security = WorkspaceSecurityConfig {
            tool_tiers: HashMap::new(),
            default_tier: RiskTier::RulesEngine,
            max_calls_per_hour: 120,
            tool_rate_limits: HashMap::new(),
        };
        let policy = to_gate_policy(true, &security);
        assert!(policy.is_admin);
        assert_eq!(policy.max_calls_per_hour, 120);
    }
}
